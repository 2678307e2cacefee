//! File-backed stream with a shadow cursor.
//!
//! The OS cursor and the logical position are kept in lock step by doing all
//! positioning through [`FileStream::seek`]; the logical position is the one
//! reported by `tell`. Reads past the end fail with `EndOfStream`, and
//! seeking past either end clamps to the nearest valid offset, matching the
//! in-memory stream.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use cqdb_error::{CqError, Result};

use crate::stream::{map_read_err, Stream};

/// A stream over one OS file.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    path: PathBuf,
    pos: u64,
    readonly: bool,
}

impl FileStream {
    /// Open `path`.
    ///
    /// Read-only mode requires the file to exist. Read-write mode opens an
    /// existing file without truncating it, creating it when absent;
    /// `clear` forces truncation.
    pub fn open(path: impl AsRef<Path>, readonly: bool, clear: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = if readonly {
            OpenOptions::new().read(true).open(path)
        } else if clear {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)
        }
        .map_err(|e| CqError::fs(path, e))?;

        Ok(FileStream {
            file,
            path: path.to_path_buf(),
            pos: 0,
            readonly,
        })
    }

    /// Whether a file exists at `path`.
    #[must_use]
    pub fn accessible(path: impl AsRef<Path>) -> bool {
        path.as_ref().is_file()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Close and reopen the underlying handle, preserving the logical
    /// position, so that bytes appended by another handle since open become
    /// visible to subsequent reads.
    pub fn refresh_tail(&mut self) -> Result<()> {
        let reopened = OpenOptions::new()
            .read(true)
            .write(!self.readonly)
            .open(&self.path)
            .map_err(|e| CqError::fs(&self.path, e))?;
        self.file = reopened;
        let pos = self.pos;
        self.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .map_err(|e| CqError::fs(&self.path, e))?
            .len())
    }
}

impl Stream for FileStream {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf).map_err(|e| {
            // A failed exact read leaves the OS cursor unspecified; put it
            // back on the shadow position so the stream stays coherent.
            let _ = self.file.seek(SeekFrom::Start(self.pos));
            map_read_err(e)
        })?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.readonly {
            return Err(CqError::ReadOnly);
        }
        self.file.write_all(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.len()? as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => len + n,
        };
        let clamped = target.clamp(0, len) as u64;
        self.file.seek(SeekFrom::Start(clamped))?;
        self.pos = clamped;
        Ok(clamped)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn eof(&mut self) -> Result<bool> {
        Ok(self.pos >= self.len()?)
    }

    fn flush(&mut self) -> Result<()> {
        if !self.readonly {
            self.file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        (dir, path)
    }

    #[test]
    fn fresh_file_is_empty() {
        let (_dir, path) = tmp_path("fresh.cq");
        let mut stream = FileStream::open(&path, false, false).unwrap();
        assert_eq!(stream.tell(), 0);
        assert!(stream.eof().unwrap());
        assert!(stream.is_empty().unwrap());
        assert!(matches!(stream.read_u8(), Err(CqError::EndOfStream)));
    }

    #[test]
    fn write_read_and_seek() {
        let (_dir, path) = tmp_path("wrs.cq");
        let mut stream = FileStream::open(&path, false, false).unwrap();
        stream.write_u8(0).unwrap();
        assert_eq!(stream.tell(), 1);
        stream.write_u8(1).unwrap();
        assert_eq!(stream.tell(), 2);

        stream.seek(SeekFrom::Current(-1)).unwrap();
        assert_eq!(stream.tell(), 1);
        assert!(!stream.eof().unwrap());
        stream.seek(SeekFrom::End(-2)).unwrap();
        assert_eq!(stream.tell(), 0);
        assert_eq!(stream.read_u8().unwrap(), 0);
        assert_eq!(stream.read_u8().unwrap(), 1);
        assert!(stream.eof().unwrap());
    }

    #[test]
    fn seek_clamps_past_end() {
        let (_dir, path) = tmp_path("clamp.cq");
        let mut stream = FileStream::open(&path, false, false).unwrap();
        stream.write_all(b"ab").unwrap();
        stream.seek(SeekFrom::Start(100)).unwrap();
        assert_eq!(stream.tell(), 2);
        stream.seek(SeekFrom::Current(-100)).unwrap();
        assert_eq!(stream.tell(), 0);
    }

    #[test]
    fn readonly_rejects_writes() {
        let (_dir, path) = tmp_path("ro.cq");
        {
            let mut writer = FileStream::open(&path, false, false).unwrap();
            writer.write_all(b"abc").unwrap();
        }
        let mut reader = FileStream::open(&path, true, false).unwrap();
        assert!(matches!(reader.write_u8(0), Err(CqError::ReadOnly)));
        assert_eq!(reader.read_u8().unwrap(), b'a');
    }

    #[test]
    fn readonly_open_requires_existing_file() {
        let (_dir, path) = tmp_path("absent.cq");
        assert!(matches!(
            FileStream::open(&path, true, false),
            Err(CqError::Fs { .. })
        ));
    }

    #[test]
    fn clear_truncates() {
        let (_dir, path) = tmp_path("clear.cq");
        {
            let mut writer = FileStream::open(&path, false, false).unwrap();
            writer.write_all(b"abc").unwrap();
        }
        let mut stream = FileStream::open(&path, false, true).unwrap();
        assert!(stream.is_empty().unwrap());
    }

    #[test]
    fn refresh_tail_sees_concurrent_appends() {
        let (_dir, path) = tmp_path("tail.cq");
        let mut writer = FileStream::open(&path, false, false).unwrap();
        writer.write_all(b"ab").unwrap();
        writer.flush().unwrap();

        let mut reader = FileStream::open(&path, true, false).unwrap();
        assert_eq!(reader.read_u8().unwrap(), b'a');
        assert_eq!(reader.read_u8().unwrap(), b'b');

        writer.write_all(b"c").unwrap();
        writer.flush().unwrap();

        reader.refresh_tail().unwrap();
        assert_eq!(reader.tell(), 2);
        assert!(!reader.eof().unwrap());
        assert_eq!(reader.read_u8().unwrap(), b'c');
    }
}
