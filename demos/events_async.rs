use clap::Parser as ClapParser;
use ctf_reader::{build_trace, Advance, AsyncReadMedium, Notification, NotificationIterator};
use std::path::PathBuf;
use tokio::fs::File;

#[path = "fixture.rs"]
mod fixture;

/// CTF events async reader demo
#[derive(Debug, clap::Parser)]
struct Opts {
    /// The binary CTF stream file
    pub stream: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), ctf_reader::Error> {
    tracing_subscriber::fmt::init();

    let opts = Opts::parse();
    let trace = build_trace(&fixture::minimal_root()).unwrap();

    let file = File::open(&opts.stream).await.unwrap();
    let medium = AsyncReadMedium::new(file);
    let mut iter = NotificationIterator::new(trace, medium);

    loop {
        match iter.advance()? {
            Advance::Notification(Notification::Event(ev)) => println!("{ev:#?}"),
            Advance::Notification(_) => {}
            Advance::Again => {
                iter.medium_mut().fill().await?;
            }
            Advance::Done => break,
        }
    }

    Ok(())
}
