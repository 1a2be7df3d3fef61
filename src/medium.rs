//! Medium (component G, §4.G): the external byte-source contract consumed
//! by the BTR and the notification iterator.

use bytes::BytesMut;
use std::io::Read;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Result of a [`Medium::request_bytes`] call.
pub enum MediumStatus<'a> {
    Ok { addr: &'a [u8] },
    Eof,
    Again,
    Error(String),
}

/// The external byte source. `Stream` is the opaque per-data-stream handle
/// returned by `borrow_stream`; simple single-stream mediums use `()`.
pub trait Medium {
    type Stream;

    /// Returns any non-zero prefix of up to `max_size` bytes starting at the
    /// medium's internal cursor, and advances that cursor by the returned
    /// length. `Again` permits the caller to retry later with identical
    /// semantics; the medium must not have consumed anything in that case.
    fn request_bytes(&mut self, max_size: usize) -> MediumStatus<'_>;

    /// Resolves a stream-class + data-stream-id pair to a concrete stream
    /// handle. Out of scope in this core is the logic that locates trace
    /// directories and stream files (§1); implementors here return a
    /// placeholder and may be extended by a filesystem plugin.
    fn borrow_stream(&mut self, stream_class_id: u64, data_stream_id: i64) -> Self::Stream;

    /// Optional: repositions the medium's cursor. Mediums that don't support
    /// seeking return `false`.
    fn seek(&mut self, _absolute_byte_offset: u64) -> bool {
        false
    }
}

/// A `Medium` over an in-memory byte slice. Never returns `Again`; returns
/// `Eof` once the slice is exhausted. Useful for tests and for traces
/// already fully buffered in memory.
pub struct SliceMedium<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> SliceMedium<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceMedium { data, cursor: 0 }
    }
}

impl<'a> Medium for SliceMedium<'a> {
    type Stream = ();

    fn request_bytes(&mut self, max_size: usize) -> MediumStatus<'_> {
        if self.cursor >= self.data.len() {
            return MediumStatus::Eof;
        }
        let end = (self.cursor + max_size).min(self.data.len());
        let addr = &self.data[self.cursor..end];
        self.cursor = end;
        MediumStatus::Ok { addr }
    }

    fn borrow_stream(&mut self, _stream_class_id: u64, _data_stream_id: i64) -> Self::Stream {}
}

/// A `Medium` over a [`tokio::io::AsyncRead`]. `request_bytes` never blocks:
/// it only ever serves what [`AsyncReadMedium::fill`] has already pulled in,
/// returning `Again` when the internal buffer is dry. A caller driving
/// [`crate::iterator::NotificationIterator`] against one of these awaits
/// `fill` whenever `advance` reports `Again` (§4.G "dual sync/async
/// ergonomics") rather than this trait itself growing an async method.
pub struct AsyncReadMedium<R> {
    reader: R,
    buf: BytesMut,
    chunk_size: usize,
    last_chunk: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> AsyncReadMedium<R> {
    pub fn new(reader: R) -> Self {
        AsyncReadMedium {
            reader,
            buf: BytesMut::new(),
            chunk_size: 64 * 1024,
            last_chunk: Vec::new(),
            eof: false,
        }
    }

    /// Pulls up to one chunk from the reader into the internal buffer.
    /// Returns `false` once the reader has reported EOF.
    pub async fn fill(&mut self) -> std::io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let mut scratch = vec![0u8; self.chunk_size];
        let n = self.reader.read(&mut scratch).await?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        trace!(bytes = n, "async medium read chunk");
        self.buf.extend_from_slice(&scratch[..n]);
        Ok(true)
    }
}

impl<R> Medium for AsyncReadMedium<R> {
    type Stream = ();

    fn request_bytes(&mut self, max_size: usize) -> MediumStatus<'_> {
        if self.buf.is_empty() {
            return if self.eof {
                MediumStatus::Eof
            } else {
                MediumStatus::Again
            };
        }
        let take = max_size.min(self.buf.len());
        let chunk = self.buf.split_to(take);
        self.last_chunk = chunk.to_vec();
        MediumStatus::Ok {
            addr: self.last_chunk.as_slice(),
        }
    }

    fn borrow_stream(&mut self, _stream_class_id: u64, _data_stream_id: i64) -> Self::Stream {}
}

/// A `Medium` over a [`std::io::Read`], pulling fixed-size chunks into an
/// internal [`BytesMut`] buffer. Never returns `Again`: reads from a
/// blocking `Read` either produce bytes, hit EOF, or fail outright.
pub struct ReadMedium<R> {
    reader: R,
    buf: BytesMut,
    chunk_size: usize,
    /// Holds the most recently returned chunk so `request_bytes` can hand
    /// back a borrow of it.
    last_chunk: Vec<u8>,
}

impl<R: Read> ReadMedium<R> {
    pub fn new(reader: R) -> Self {
        ReadMedium {
            reader,
            buf: BytesMut::new(),
            chunk_size: 64 * 1024,
            last_chunk: Vec::new(),
        }
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        ReadMedium {
            reader,
            buf: BytesMut::new(),
            chunk_size,
            last_chunk: Vec::new(),
        }
    }
}

impl<R: Read> Medium for ReadMedium<R> {
    type Stream = ();

    fn request_bytes(&mut self, max_size: usize) -> MediumStatus<'_> {
        if self.buf.is_empty() {
            let want = max_size.min(self.chunk_size).max(1);
            let mut scratch = vec![0u8; want];
            match self.reader.read(&mut scratch) {
                Ok(0) => return MediumStatus::Eof,
                Ok(n) => {
                    trace!(bytes = n, "medium read chunk");
                    self.buf.extend_from_slice(&scratch[..n]);
                }
                Err(e) => return MediumStatus::Error(e.to_string()),
            }
        }
        let take = max_size.min(self.buf.len());
        let chunk = self.buf.split_to(take);
        // SAFETY-free trick: we can't return a borrow tied to the freshly
        // split chunk without storing it, so keep it in a side buffer.
        self.last_chunk = chunk.to_vec();
        MediumStatus::Ok {
            addr: self.last_chunk.as_slice(),
        }
    }

    fn borrow_stream(&mut self, _stream_class_id: u64, _data_stream_id: i64) -> Self::Stream {}
}
