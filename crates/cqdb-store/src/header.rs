//! Cluster index headers.
//!
//! The same type serves as *forward index* (describing the cluster whose
//! data body precedes it on the timeline) and *back index* (the view of the
//! previous cluster's forward index from the head of the current file).
//!
//! Wire layout:
//! ```text
//! Offset  Size  Description
//!   0       2   Magic: "CQ"
//!   2       1   Version
//!   3       *   Segment map (delta-encoded incmap of segment id to offset)
//! ```

use cqdb_error::{CqError, Result};
use cqdb_io::{Decode, Encode, IncMap, Stream};
use cqdb_types::{Id, NULL_ID};

/// Two-byte magic at the head of every cluster file.
pub const HEADER_MAGIC: [u8; 2] = *b"CQ";

/// Current header format version.
pub const HEADER_VERSION: u8 = 1;

/// A cluster header: version plus the segment id → file offset map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    version: u8,
    /// Id of the cluster whose file head holds this header.
    cluster: Id,
    segments: IncMap,
}

impl Header {
    #[must_use]
    pub fn new(version: u8, cluster: Id) -> Self {
        Header {
            version,
            cluster,
            segments: IncMap::new(),
        }
    }

    /// Wipe the segment map and retag.
    pub fn reset(&mut self, version: u8, cluster: Id) {
        self.version = version;
        self.cluster = cluster;
        self.segments.clear();
    }

    /// Copy another header's contents. Versions must agree.
    pub fn adopt(&mut self, other: &Header) {
        debug_assert_eq!(self.version, other.version);
        self.cluster = other.cluster;
        self.segments = other.segments.clone();
    }

    /// Record that `segment` starts at byte `position`.
    pub fn mark_segment(&mut self, segment: Id, position: Id) {
        self.segments.insert(segment, position);
    }

    #[must_use]
    pub fn segment_position(&self, segment: Id) -> Option<Id> {
        self.segments.get(segment)
    }

    #[must_use]
    pub fn has_segment(&self, segment: Id) -> bool {
        self.segments.contains(segment)
    }

    #[must_use]
    pub fn first_segment(&self) -> Option<Id> {
        self.segments.first_key()
    }

    #[must_use]
    pub fn last_segment(&self) -> Option<Id> {
        self.segments.last_key()
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub fn cluster(&self) -> Id {
        self.cluster
    }

    pub(crate) fn set_cluster(&mut self, cluster: Id) {
        self.cluster = cluster;
    }
}

impl Default for Header {
    fn default() -> Self {
        Header::new(HEADER_VERSION, NULL_ID)
    }
}

impl Encode for Header {
    fn encode<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<()> {
        stream.write_all(&HEADER_MAGIC)?;
        stream.write_u8(self.version)?;
        self.segments.encode(stream)
    }
}

impl Decode for Header {
    fn decode<S: Stream + ?Sized>(stream: &mut S) -> Result<Self> {
        let mut magic = [0u8; 2];
        stream.read_exact(&mut magic)?;
        if magic != HEADER_MAGIC {
            return Err(CqError::corrupt(format!(
                "magic invalid (expected 'CQ', got '{}{}')",
                magic[0] as char, magic[1] as char
            )));
        }
        let version = stream.read_u8()?;
        let segments = IncMap::decode(stream)?;
        Ok(Header {
            version,
            cluster: NULL_ID,
            segments,
        })
    }
}
