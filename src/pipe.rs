//! Bounded in-process byte pipe between the generator and the pump thread.
//!
//! Chunks of at most `chunk` bytes travel over a `crossbeam_channel::bounded`
//! queue of `depth` slots: the writer blocks when the queue is full, the reader
//! blocks when it is empty.
//!
//! Close semantics:
//! - all writers dropped → reader drains what is queued, then read() returns 0;
//! - reader dropped → write() fails with BrokenPipe (generator unblocks instead of hanging).

use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{self, Read, Write};

pub fn pipe(depth: usize, chunk: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(depth.max(1));
    (
        PipeWriter {
            tx,
            chunk: chunk.max(1),
        },
        PipeReader {
            rx,
            cur: Vec::new(),
            pos: 0,
        },
    )
}

/// Write end, handed to the generator.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
    chunk: usize,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(self.chunk);
        self.tx
            .send(buf[..n].to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stream reader closed"))?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read end, drained by the pump.
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    cur: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.cur.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.cur = chunk;
                    self.pos = 0;
                }
                // все writer'ы закрыты и очередь пуста
                Err(_) => return Ok(0),
            }
        }
        let n = (self.cur.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.cur[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
