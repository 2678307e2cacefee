//! Growable in-memory stream, used for headers, the registry blob and tests.

use std::io::SeekFrom;

use cqdb_error::{CqError, Result};

use crate::stream::Stream;

/// An in-memory byte stream backed by a `Vec<u8>`.
///
/// Writes append at the end of the buffer and leave the cursor there;
/// reads consume from the cursor. Seeking clamps to `[0, len]`.
#[derive(Debug, Default, Clone)]
pub struct MemoryStream {
    buf: Vec<u8>,
    pos: usize,
}

impl MemoryStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing bytes, cursor at the start.
    #[must_use]
    pub fn from_vec(buf: Vec<u8>) -> Self {
        MemoryStream { buf, pos: 0 }
    }

    /// Discard contents and rewind.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// Borrow the underlying bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Lowercase hex of the whole buffer, handy in tests.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(self.buf.len() * 2);
        for b in &self.buf {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

impl Stream for MemoryStream {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let available = self.buf.len() - self.pos;
        if buf.len() > available {
            return Err(CqError::EndOfStream);
        }
        buf.copy_from_slice(&self.buf[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(buf);
        self.pos = self.buf.len();
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => self.buf.len() as i64 + n,
        };
        self.pos = target.clamp(0, self.buf.len() as i64) as usize;
        Ok(self.pos as u64)
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn eof(&mut self) -> Result<bool> {
        Ok(self.pos >= self.buf.len())
    }
}
