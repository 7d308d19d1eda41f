//! StreamPump: drains the generator's output into the sink.
//!
//! Runs on its own thread, started before the generator call and joined after
//! it. Without a concurrent drain the generator would block on a full pipe
//! while the caller is blocked on the generator.
//!
//! Memory is bounded by one chunk regardless of stream size.

use log::{debug, trace};
use std::io::{self, ErrorKind, Read, Write};

use crate::error::ExportError;

pub const DEFAULT_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct StreamPump {
    chunk: usize,
}

impl Default for StreamPump {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_BYTES)
    }
}

impl StreamPump {
    pub fn new(chunk: usize) -> Self {
        Self {
            chunk: chunk.max(1),
        }
    }

    /// Copy `source` to `sink` until a zero-length read.
    /// Returns the number of bytes forwarded.
    pub fn run<R: Read, W: Write + ?Sized>(&self, mut source: R, sink: &mut W) -> Result<u64, ExportError> {
        let mut buf = vec![0u8; self.chunk];
        let mut total: u64 = 0;

        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("pump: read failed after {} bytes: {}", total, e);
                    return Err(ExportError::Transfer(e));
                }
            };
            write_chunk(sink, &buf[..n]).map_err(|e| {
                debug!("pump: write failed after {} bytes: {}", total, e);
                ExportError::Transfer(e)
            })?;
            total += n as u64;
            trace!("pump: forwarded {} bytes (total {})", n, total);
        }

        sink.flush().map_err(ExportError::Transfer)?;
        debug!("pump: source closed, {} bytes forwarded", total);
        Ok(total)
    }
}

/// Write loop: retry partial writes until the chunk is out.
fn write_chunk<W: Write + ?Sized>(sink: &mut W, mut chunk: &[u8]) -> io::Result<()> {
    while !chunk.is_empty() {
        match sink.write(chunk) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "sink accepted no bytes",
                ))
            }
            Ok(n) => chunk = &chunk[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Yields the scripted reads one by one.
    struct Scripted(VecDeque<io::Result<Vec<u8>>>);

    impl Read for Scripted {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(bytes)) => {
                    out[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    /// Accepts at most 2 bytes per write.
    struct Trickle(Vec<u8>);

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(2);
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stops_at_zero_length_read() {
        let src = Scripted(
            vec![Ok(b"abc".to_vec()), Ok(Vec::new()), Ok(b"never".to_vec())].into(),
        );
        let mut sink = Vec::new();
        let n = StreamPump::new(16).run(src, &mut sink).unwrap();
        assert_eq!(n, 3);
        assert_eq!(sink, b"abc");
    }

    #[test]
    fn partial_writes_are_retried() {
        let src = Scripted(vec![Ok(b"hello".to_vec()), Ok(b"!".to_vec())].into());
        let mut sink = Trickle(Vec::new());
        StreamPump::new(16).run(src, &mut sink).unwrap();
        assert_eq!(sink.0, b"hello!");
    }

    #[test]
    fn read_error_is_transfer_failure() {
        let src = Scripted(
            vec![
                Ok(b"ab".to_vec()),
                Err(io::Error::new(ErrorKind::Other, "boom")),
            ]
            .into(),
        );
        let mut sink = Vec::new();
        let err = StreamPump::new(16).run(src, &mut sink).unwrap_err();
        assert!(matches!(err, ExportError::Transfer(_)));
        assert_eq!(sink, b"ab");
    }

    #[test]
    fn zero_write_is_transfer_failure() {
        let src = Scripted(vec![Ok(b"abc".to_vec())].into());
        let mut full: &mut [u8] = &mut [];
        let err = StreamPump::new(16).run(src, &mut full).unwrap_err();
        match err {
            ExportError::Transfer(e) => assert_eq!(e.kind(), ErrorKind::WriteZero),
            other => panic!("unexpected {other:?}"),
        }
    }
}
