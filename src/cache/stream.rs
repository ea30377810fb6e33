//! Byte Streams
//!
//! One stored representation (primary body or alternative data). A stream is
//! written through a single [`StreamWriter`], then sealed; after sealing the
//! content is immutable and shared zero-copy by any number of readers.
//!
//! # Read policy
//!
//! Reads never block. [`ByteStream::content`] and [`ByteStream::reader`] on an
//! unsealed stream fail with [`Error::StreamNotReady`] (or
//! [`Error::StreamAborted`] once the writer was dropped unsealed), so a reader
//! can only ever observe the complete sealed content. Callers that want to
//! wait for completion use [`ByteStream::wait_sealed`], which is a
//! notification and does not hand out bytes.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Lifecycle phase of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Writer still open
    Open,
    /// Content sealed and readable
    Sealed,
    /// Writer dropped before sealing
    Aborted,
}

enum StreamState {
    Writing(BytesMut),
    Sealed(Bytes),
    Aborted,
}

struct StreamInner {
    content_type: String,
    limit: Option<usize>,
    state: Mutex<StreamState>,
    phase: watch::Sender<StreamPhase>,
}

/// Shared, read-only handle to a stored representation
#[derive(Clone)]
pub struct ByteStream {
    inner: Arc<StreamInner>,
}

impl ByteStream {
    /// Open a new stream, returning its only writer and a read handle
    pub fn open(content_type: impl Into<String>) -> (StreamWriter, ByteStream) {
        Self::open_with_limit(content_type, None)
    }

    /// Open a stream that rejects content larger than `limit` bytes
    pub fn open_with_limit(
        content_type: impl Into<String>,
        limit: Option<usize>,
    ) -> (StreamWriter, ByteStream) {
        let (phase, _) = watch::channel(StreamPhase::Open);
        let inner = Arc::new(StreamInner {
            content_type: content_type.into(),
            limit,
            state: Mutex::new(StreamState::Writing(BytesMut::new())),
            phase,
        });
        let writer = StreamWriter {
            inner: inner.clone(),
        };
        (writer, ByteStream { inner })
    }

    /// Build an already-sealed stream from complete content
    pub fn sealed(content_type: impl Into<String>, data: impl Into<Bytes>) -> ByteStream {
        let (phase, _) = watch::channel(StreamPhase::Sealed);
        ByteStream {
            inner: Arc::new(StreamInner {
                content_type: content_type.into(),
                limit: None,
                state: Mutex::new(StreamState::Sealed(data.into())),
                phase,
            }),
        }
    }

    /// Declared content type
    pub fn content_type(&self) -> &str {
        &self.inner.content_type
    }

    /// Current phase
    pub fn phase(&self) -> StreamPhase {
        *self.inner.phase.borrow()
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.phase() == StreamPhase::Sealed
    }

    /// Sealed content length
    pub fn len(&self) -> Option<usize> {
        match &*self.inner.state.lock() {
            StreamState::Sealed(data) => Some(data.len()),
            _ => None,
        }
    }

    /// True when sealed with no content
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Sealed content (zero-copy)
    pub fn content(&self) -> Result<Bytes> {
        match &*self.inner.state.lock() {
            StreamState::Sealed(data) => Ok(data.clone()),
            StreamState::Writing(_) => Err(Error::StreamNotReady),
            StreamState::Aborted => Err(Error::StreamAborted),
        }
    }

    /// Open a reader over the sealed content
    pub fn reader(&self) -> Result<StreamReader> {
        Ok(StreamReader {
            data: self.content()?,
            pos: 0,
        })
    }

    /// Wait until the writer seals or abandons the stream
    pub async fn wait_sealed(&self) -> Result<()> {
        let mut rx = self.inner.phase.subscribe();
        let phase = *rx
            .wait_for(|p| *p != StreamPhase::Open)
            .await
            .map_err(|_| Error::Internal("stream phase channel closed".to_string()))?;
        match phase {
            StreamPhase::Sealed => Ok(()),
            _ => Err(Error::StreamAborted),
        }
    }

    /// True when both handles refer to the same stream
    #[inline]
    pub fn ptr_eq(&self, other: &ByteStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("content_type", &self.inner.content_type)
            .field("phase", &self.phase())
            .field("len", &self.len())
            .finish()
    }
}

/// Write-once handle for a stream
pub struct StreamWriter {
    inner: Arc<StreamInner>,
}

impl StreamWriter {
    /// Append bytes
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.inner.state.lock();
        match &mut *state {
            StreamState::Writing(buf) => {
                if let Some(limit) = self.inner.limit {
                    let size = buf.len() + data.len();
                    if size > limit {
                        return Err(Error::StreamTooLarge { size, limit });
                    }
                }
                buf.extend_from_slice(data);
                Ok(())
            }
            StreamState::Sealed(_) | StreamState::Aborted => Err(Error::StreamSealed),
        }
    }

    /// Seal the stream; content becomes immutable and readable
    pub fn seal(&mut self) -> Result<ByteStream> {
        {
            let mut state = self.inner.state.lock();
            let buf = match &mut *state {
                StreamState::Writing(buf) => std::mem::take(buf),
                StreamState::Sealed(_) | StreamState::Aborted => return Err(Error::StreamSealed),
            };
            *state = StreamState::Sealed(buf.freeze());
        }
        self.inner.phase.send_replace(StreamPhase::Sealed);
        Ok(self.stream())
    }

    /// Bytes written so far
    pub fn written(&self) -> usize {
        match &*self.inner.state.lock() {
            StreamState::Writing(buf) => buf.len(),
            StreamState::Sealed(data) => data.len(),
            StreamState::Aborted => 0,
        }
    }

    /// Read handle for the stream being written
    pub fn stream(&self) -> ByteStream {
        ByteStream {
            inner: self.inner.clone(),
        }
    }
}

impl io::Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        StreamWriter::write(self, buf).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        let aborted = {
            let mut state = self.inner.state.lock();
            if matches!(&*state, StreamState::Writing(_)) {
                *state = StreamState::Aborted;
                true
            } else {
                false
            }
        };
        if aborted {
            tracing::debug!(
                content_type = %self.inner.content_type,
                "Stream writer dropped before sealing"
            );
            self.inner.phase.send_replace(StreamPhase::Aborted);
        }
    }
}

/// Cursor over sealed stream content
#[derive(Debug, Clone)]
pub struct StreamReader {
    data: Bytes,
    pos: usize,
}

impl StreamReader {
    /// Next chunk of at most `max` bytes, `None` at EOF
    pub fn next_chunk(&mut self, max: usize) -> Option<Bytes> {
        if self.pos >= self.data.len() || max == 0 {
            return None;
        }
        let end = (self.pos + max).min(self.data.len());
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        Some(chunk)
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl io::Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.next_chunk(buf.len()) {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Read;

    #[test]
    fn test_write_then_seal() {
        let (mut writer, stream) = ByteStream::open("text/plain");
        writer.write(b"response ").unwrap();
        writer.write(b"body").unwrap();

        assert_eq!(stream.phase(), StreamPhase::Open);
        writer.seal().unwrap();

        assert!(stream.is_sealed());
        assert_eq!(stream.content().unwrap().as_ref(), b"response body");
        assert_eq!(stream.len(), Some(13));
        assert_eq!(stream.content_type(), "text/plain");
    }

    #[test]
    fn test_write_after_seal_fails() {
        let (mut writer, _stream) = ByteStream::open("text/plain");
        writer.write(b"x").unwrap();
        writer.seal().unwrap();

        assert_matches!(writer.write(b"y"), Err(Error::StreamSealed));
        assert_matches!(writer.seal(), Err(Error::StreamSealed));
    }

    #[test]
    fn test_read_before_seal_fails() {
        let (mut writer, stream) = ByteStream::open("text/plain");
        writer.write(b"partial").unwrap();

        assert_matches!(stream.content(), Err(Error::StreamNotReady));
        assert_matches!(stream.reader(), Err(Error::StreamNotReady));
        assert_eq!(stream.len(), None);
    }

    #[test]
    fn test_dropped_writer_aborts() {
        let (mut writer, stream) = ByteStream::open("text/plain");
        writer.write(b"torn").unwrap();
        drop(writer);

        assert_eq!(stream.phase(), StreamPhase::Aborted);
        assert_matches!(stream.content(), Err(Error::StreamAborted));
    }

    #[test]
    fn test_size_limit() {
        let (mut writer, _stream) = ByteStream::open_with_limit("text/plain", Some(4));
        writer.write(b"1234").unwrap();
        assert_matches!(
            writer.write(b"5"),
            Err(Error::StreamTooLarge { size: 5, limit: 4 })
        );
        assert_eq!(writer.written(), 4);
    }

    #[test]
    fn test_reader_chunks_then_eof() {
        let stream = ByteStream::sealed("text/plain", "abcdefg");
        let mut reader = stream.reader().unwrap();

        assert_eq!(reader.next_chunk(3).unwrap().as_ref(), b"abc");
        assert_eq!(reader.remaining(), 4);
        assert_eq!(reader.next_chunk(10).unwrap().as_ref(), b"defg");
        assert!(reader.next_chunk(10).is_none());
    }

    #[test]
    fn test_io_read() {
        let stream = ByteStream::sealed("text/plain", "hello");
        let mut out = String::new();
        stream.reader().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_io_write() {
        use std::io::Write;

        let (mut writer, stream) = ByteStream::open("text/plain");
        write!(writer, "{}-{}", "a", 1).unwrap();
        writer.seal().unwrap();
        assert_eq!(stream.content().unwrap().as_ref(), b"a-1");
    }

    #[test]
    fn test_readers_survive_handle_drop() {
        let stream = ByteStream::sealed("text/binary", "XYZ");
        let reader = stream.reader().unwrap();
        drop(stream);
        assert_eq!(reader.remaining(), 3);
    }

    #[test]
    fn test_ptr_eq() {
        let a = ByteStream::sealed("t", "x");
        let b = ByteStream::sealed("t", "x");
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }

    #[tokio::test]
    async fn test_wait_sealed() {
        let (mut writer, stream) = ByteStream::open("text/plain");
        let waiter = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.wait_sealed().await })
        };

        writer.write(b"done").unwrap();
        writer.seal().unwrap();

        waiter.await.unwrap().unwrap();
        assert!(stream.is_sealed());
    }

    #[tokio::test]
    async fn test_wait_sealed_reports_abort() {
        let (writer, stream) = ByteStream::open("text/plain");
        drop(writer);
        assert_matches!(stream.wait_sealed().await, Err(Error::StreamAborted));
    }
}
