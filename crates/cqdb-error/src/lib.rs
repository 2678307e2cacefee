use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for CQDB operations.
///
/// One flat enum with structured variants for the stable error kinds of the
/// database, chronology, codec and filesystem layers.
#[derive(Error, Debug)]
pub enum CqError {
    // === Database errors ===
    /// An operation required a begun segment, but none is active.
    #[error("database not ready: no segment begun")]
    NotReady,

    /// Write attempted through a read-only handle.
    #[error("database is read-only")]
    ReadOnly,

    /// `begin_segment` called with a segment id below the current tip.
    #[error("segment {segment} precedes tip {tip}")]
    SegmentOrder { segment: u64, tip: u64 },

    /// A backpointer reference to an offset at or past the write position.
    #[error("reference sid {sid} is not behind offset {offset}")]
    ReferenceOrder { sid: u64, offset: u64 },

    /// The on-disk registry was created with a different cluster size.
    #[error("registry cluster size is {actual}, expected {expected}")]
    ClusterSizeMismatch { expected: u32, actual: u32 },

    // === Chronology errors ===
    /// `push_event` called with a timestamp below the current time.
    #[error("timestamp {timestamp} precedes current time {current}")]
    TimeOrder { timestamp: u64, current: u64 },

    /// A reflection replay decoded to a different in-memory state.
    #[error("reflection mismatch: {detail}")]
    ReflectionMismatch { detail: String },

    // === Codec / stream errors ===
    /// Malformed bytes: bad magic, varint overflow, impossible delta.
    #[error("corrupt data: {detail}")]
    Corrupt { detail: String },

    /// A read would pass the last byte of the stream.
    #[error("end of stream")]
    EndOfStream,

    // === Filesystem errors ===
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem error with the offending path.
    #[error("filesystem error at '{}': {source}", .path.display())]
    Fs {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CqError {
    /// Build a [`CqError::Corrupt`] from anything displayable.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        CqError::Corrupt {
            detail: detail.into(),
        }
    }

    /// Attach a path to an I/O error.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CqError::Fs {
            path: path.into(),
            source,
        }
    }

    /// Whether this error indicates reading past the end of a stream.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, CqError::EndOfStream)
    }
}

/// Result alias used throughout CQDB.
pub type Result<T> = std::result::Result<T, CqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = CqError::SegmentOrder { segment: 1, tip: 2 };
        assert_eq!(err.to_string(), "segment 1 precedes tip 2");

        let err = CqError::corrupt("magic invalid");
        assert_eq!(err.to_string(), "corrupt data: magic invalid");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: CqError = io.into();
        assert!(matches!(err, CqError::Io(_)));
    }

    #[test]
    fn end_of_stream_predicate() {
        assert!(CqError::EndOfStream.is_end_of_stream());
        assert!(!CqError::NotReady.is_end_of_stream());
    }
}
