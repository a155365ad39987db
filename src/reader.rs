//! Buffered reader with bounded backward seek (`spec.md` §4.B), grounded on
//! `stdlimrd.c`: a fixed-size ring buffer refilled in fixed chunks, with a
//! `peek` that never blocks (returns `Unknown` rather than reading) so the
//! marker-driven predictive dispatch in the interpreter can skip a branch
//! without stealing a byte.

use std::io::{self, Read};

/// Ring capacity: how far back a seek can reach (`BUFLEN` in `stdlimrd.c`).
pub const BUFLEN: usize = 32 * 1024;
/// Refill granularity (`READLEN` in `stdlimrd.c`).
pub const READLEN: usize = 8 * 1024;

/// Result of a non-blocking `peek`. `Unknown` means "the ring has no
/// buffered-but-unread byte at this position and reading one might block" --
/// distinct from `Eof`, which means the underlying source is known to have
/// ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peek {
    Char(u8),
    Eof,
    Unknown,
}

/// Result of `get_char`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetChar {
    Char(u8),
    Eof,
}

pub struct Reader<R: Read> {
    src: R,
    buf: Vec<u8>,
    /// Logical offset of the first byte currently held in the ring.
    st: u32,
    /// Number of valid bytes held in the ring, starting at `st`.
    len: u32,
    /// Current logical read position; `st <= cur <= st + len`.
    cur: u32,
    /// High-water mark: how many bytes have ever been pulled from `src`.
    max_read: u32,
    eof_seen: bool,
}

impl<R: Read> Reader<R> {
    pub fn new(src: R) -> Self {
        Reader {
            src,
            buf: vec![0u8; BUFLEN],
            st: 0,
            len: 0,
            cur: 0,
            max_read: 0,
            eof_seen: false,
        }
    }

    fn exhausted(&self) -> bool {
        self.cur == self.st + self.len
    }

    /// Pull up to `READLEN` more bytes from the source into the ring,
    /// sliding `st` forward if the ring would overflow `BUFLEN`.
    fn fill_buf(&mut self) -> io::Result<()> {
        if !self.exhausted() {
            return Ok(());
        }
        if self.eof_seen {
            return Ok(());
        }
        let bufpos = ((self.st + self.len) as usize) % BUFLEN;
        let want = READLEN.min(BUFLEN - bufpos);
        let n = self.src.read(&mut self.buf[bufpos..bufpos + want])?;
        if n == 0 {
            self.eof_seen = true;
            return Ok(());
        }
        self.len += n as u32;
        self.max_read += n as u32;
        if self.len as usize > BUFLEN {
            let overflow = self.len - BUFLEN as u32;
            self.st += overflow;
            self.len = BUFLEN as u32;
        }
        Ok(())
    }

    pub fn get_char(&mut self) -> io::Result<GetChar> {
        if self.exhausted() {
            self.fill_buf()?;
            if self.exhausted() {
                return Ok(GetChar::Eof);
            }
        }
        let byte = self.buf[(self.cur as usize) % BUFLEN];
        self.cur += 1;
        Ok(GetChar::Char(byte))
    }

    /// Non-blocking peek: never calls into the source.
    pub fn peek(&self) -> Peek {
        if self.exhausted() {
            Peek::Unknown
        } else {
            Peek::Char(self.buf[(self.cur as usize) % BUFLEN])
        }
    }

    pub fn eof(&mut self) -> io::Result<bool> {
        if self.exhausted() {
            self.fill_buf()?;
        }
        Ok(self.exhausted())
    }

    pub fn tell(&self) -> u32 {
        self.cur
    }

    pub fn max_read(&self) -> u32 {
        self.max_read
    }

    /// Backward-only seek. A forward seek request is an internal invariant
    /// violation (the interpreter never asks for one) and aborts, matching
    /// `stdlimseek`'s `abort()` on the same condition.
    pub fn seek(&mut self, n: u32) -> bool {
        assert!(n <= self.cur, "reader: forward seek requested");
        if n >= self.st {
            self.cur = n;
            true
        } else {
            false
        }
    }

    fn buffered_len(&self) -> u32 {
        self.st + self.len - self.cur
    }

    fn fill_until(&mut self, need: u32) -> io::Result<()> {
        while self.buffered_len() < need {
            let before = self.max_read;
            self.fill_buf()?;
            if self.max_read == before {
                break; // source is exhausted, no more to fetch
            }
        }
        Ok(())
    }

    fn matches_at_cursor(&self, bytes: &[u8]) -> bool {
        if self.buffered_len() < bytes.len() as u32 {
            return false;
        }
        bytes
            .iter()
            .enumerate()
            .all(|(i, &b)| self.buf[((self.cur as usize) + i) % BUFLEN] == b)
    }

    /// Atomically consume `bytes` if they match exactly at the current
    /// position; advances on success, leaves position untouched on failure.
    pub fn consume(&mut self, bytes: &[u8]) -> io::Result<bool> {
        self.fill_until(bytes.len() as u32)?;
        if self.matches_at_cursor(bytes) {
            self.cur += bytes.len() as u32;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Non-consuming match.
    pub fn at(&mut self, bytes: &[u8]) -> io::Result<bool> {
        self.fill_until(bytes.len() as u32)?;
        Ok(self.matches_at_cursor(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn echoes_bytes_until_eof() {
        let mut r = Reader::new(Cursor::new(b"abc".to_vec()));
        assert_eq!(r.get_char().unwrap(), GetChar::Char(b'a'));
        assert_eq!(r.get_char().unwrap(), GetChar::Char(b'b'));
        assert_eq!(r.get_char().unwrap(), GetChar::Char(b'c'));
        assert_eq!(r.get_char().unwrap(), GetChar::Eof);
        assert_eq!(r.max_read(), 3);
    }

    #[test]
    fn peek_never_blocks_and_reports_unknown_when_exhausted() {
        let mut r = Reader::new(Cursor::new(Vec::<u8>::new()));
        assert_eq!(r.peek(), Peek::Unknown);
        assert_eq!(r.eof().unwrap(), true);
    }

    #[test]
    fn peek_sees_buffered_char_without_consuming() {
        let mut r = Reader::new(Cursor::new(b"x".to_vec()));
        // force a fill via eof(), which should not consume the char
        assert_eq!(r.eof().unwrap(), false);
        assert_eq!(r.peek(), Peek::Char(b'x'));
        assert_eq!(r.get_char().unwrap(), GetChar::Char(b'x'));
    }

    #[test]
    fn consume_checks_out_or_leaves_position_unchanged() {
        let mut r = Reader::new(Cursor::new(b"abc".to_vec()));
        assert_eq!(r.consume(b"ab").unwrap(), true);
        assert_eq!(r.tell(), 2);
        let mut r2 = Reader::new(Cursor::new(b"ac".to_vec()));
        assert_eq!(r2.consume(b"ab").unwrap(), false);
        assert_eq!(r2.tell(), 0);
    }

    #[test]
    fn at_never_advances() {
        let mut r = Reader::new(Cursor::new(b"ab".to_vec()));
        assert_eq!(r.at(b"ab").unwrap(), true);
        assert_eq!(r.tell(), 0);
    }

    #[test]
    fn backward_seek_within_ring_succeeds() {
        let mut r = Reader::new(Cursor::new(b"abcdef".to_vec()));
        for _ in 0..4 {
            r.get_char().unwrap();
        }
        assert_eq!(r.seek(1), true);
        assert_eq!(r.get_char().unwrap(), GetChar::Char(b'b'));
    }
}
