//! The byte-stream abstraction shared by memory buffers and cluster files.

use std::io::SeekFrom;

use cqdb_error::{CqError, Result};

/// A seekable byte stream with explicit end-of-stream semantics.
///
/// Reads are exact: a read that would pass the last byte fails with
/// [`CqError::EndOfStream`] rather than returning a short count. Writes on a
/// read-only stream fail with [`CqError::ReadOnly`].
pub trait Stream {
    /// Fill `buf` exactly, or fail with `EndOfStream`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` at the current position.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Reposition the cursor. Seeking past either end clamps to the
    /// nearest valid position.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Current byte position.
    fn tell(&self) -> u64;

    /// Whether the cursor sits at (or past) the last byte.
    fn eof(&mut self) -> Result<bool>;

    /// Push buffered bytes to the underlying medium.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// A stream is empty when nothing has been written and nothing can be
    /// read.
    fn is_empty(&mut self) -> Result<bool> {
        Ok(self.tell() == 0 && self.eof()?)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn write_u64_le(&mut self, value: u64) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }
}

/// Serialize into a [`Stream`].
pub trait Encode {
    fn encode<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<()>;
}

/// Deserialize from a [`Stream`].
pub trait Decode: Sized {
    fn decode<S: Stream + ?Sized>(stream: &mut S) -> Result<Self>;
}

/// Number of bytes `value` occupies when encoded.
pub fn encoded_len<T: Encode>(value: &T) -> Result<u64> {
    let mut probe = crate::MemoryStream::new();
    value.encode(&mut probe)?;
    Ok(probe.tell())
}

/// Map an `io::Error` from an exact read onto the stream error taxonomy.
pub(crate) fn map_read_err(err: std::io::Error) -> CqError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        CqError::EndOfStream
    } else {
        CqError::Io(err)
    }
}
