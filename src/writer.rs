//! Buffered writer with bounded backward seek (`spec.md` §4.C), grounded on
//! `stdlimwr.c`: a fixed-size ring buffer flushed in fixed chunks. A
//! backward seek only succeeds while the target position is still inside
//! the unflushed window `[st, cur)` -- once bytes are flushed to the sink
//! they can no longer be taken back, matching the source's ring-bound
//! restriction exactly.

use std::io::{self, Write};

pub const BUFLEN: usize = 32 * 1024;
pub const WRITELEN: usize = 8 * 1024;

pub struct Writer<W: Write> {
    sink: W,
    buf: Vec<u8>,
    /// Logical offset of the first byte not yet flushed to the sink.
    st: u32,
    /// Logical offset one past the last byte written so far.
    cur: u32,
}

impl<W: Write> Writer<W> {
    pub fn new(sink: W) -> Self {
        Writer {
            sink,
            buf: vec![0u8; BUFLEN],
            st: 0,
            cur: 0,
        }
    }

    /// Flush up to `WRITELEN` bytes of the committed prefix to the sink. A
    /// short/failed write is fatal -- matching the source's "bail on first
    /// write error" policy (§9 design notes): it does not retry.
    fn flush_chunk(&mut self) -> io::Result<()> {
        let bufpos = (self.st as usize) % BUFLEN;
        let pending = (self.cur - self.st) as usize;
        let want = WRITELEN.min(BUFLEN - bufpos).min(pending);
        if want == 0 {
            return Ok(());
        }
        let n = self.sink.write(&self.buf[bufpos..bufpos + want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "writer: sink accepted zero bytes",
            ));
        }
        self.st += n as u32;
        Ok(())
    }

    pub fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            let used = (self.cur - self.st) as usize;
            if used == BUFLEN {
                self.flush_chunk()?;
                continue;
            }
            let bufpos = (self.cur as usize) % BUFLEN;
            let room = BUFLEN - used;
            let space_to_wrap = BUFLEN - bufpos;
            let take = room.min(space_to_wrap).min(bytes.len() - offset);
            self.buf[bufpos..bufpos + take].copy_from_slice(&bytes[offset..offset + take]);
            self.cur += take as u32;
            offset += take;
        }
        Ok(())
    }

    pub fn tell(&self) -> u32 {
        self.cur
    }

    /// Backward seek: only succeeds if `n` is still in the unflushed window.
    /// Bytes from `n` to the old `cur` are discarded (truncated).
    pub fn seek(&mut self, n: u32) -> io::Result<bool> {
        assert!(n <= self.cur, "writer: forward seek requested");
        if n >= self.st {
            self.cur = n;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn close(mut self) -> io::Result<()> {
        while self.st != self.cur {
            self.flush_chunk()?;
        }
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_close_flushes_everything() {
        let mut out = Vec::new();
        {
            let mut w = Writer::new(&mut out);
            w.put(b"hello").unwrap();
            w.close().unwrap();
        }
        assert_eq!(out, b"hello");
    }

    #[test]
    fn seek_to_zero_truncates_unflushed_output() {
        let mut out = Vec::new();
        {
            let mut w = Writer::new(&mut out);
            w.put(b"hello").unwrap();
            assert_eq!(w.seek(0).unwrap(), true);
            w.close().unwrap();
        }
        assert_eq!(out, b"");
    }

    #[test]
    fn seek_before_flushed_prefix_fails() {
        let mut out = Vec::new();
        let mut w = Writer::new(&mut out);
        let big = vec![b'x'; BUFLEN + WRITELEN];
        w.put(&big).unwrap();
        assert_eq!(w.seek(0).unwrap(), false);
    }
}
