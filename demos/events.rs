use clap::Parser as ClapParser;
use ctf_reader::{build_trace, Advance, Notification, NotificationIterator, ReadMedium};
use std::{fs, path::PathBuf};
use tracing::error;

#[path = "fixture.rs"]
mod fixture;

/// CTF events reader demo.
///
/// TSDL source parsing is out of scope for this crate; a real embedding
/// application hands this crate an `ast::Root` produced by its own
/// grammar front-end. This demo hard-codes a minimal one instead, so it
/// only needs a binary stream file on the command line.
#[derive(Debug, clap::Parser)]
struct Opts {
    /// The binary CTF stream file
    pub stream: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();

    let opts = Opts::parse();
    let trace = build_trace(&fixture::minimal_root()).unwrap();

    let stream = fs::File::open(&opts.stream).unwrap();
    let medium = ReadMedium::new(stream);
    let mut iter = NotificationIterator::new(trace, medium);

    loop {
        match iter.advance() {
            Ok(Advance::Notification(Notification::Event(ev))) => println!("{ev:#?}"),
            Ok(Advance::Notification(_)) => {}
            Ok(Advance::Again) => continue,
            Ok(Advance::Done) => break,
            Err(e) => {
                error!("{e}");
                break;
            }
        }
    }
}
