//! CQDB: an append-only, segmented, time-indexed event log with
//! content-addressed object deduplication and delta-encoded references.
//!
//! The log is sharded into fixed-size *clusters*, one file each. Every
//! cluster file begins with the index of the preceding cluster, and its own
//! index lives at the head of the next file, so any *segment* (a caller
//! chosen monotonic label, e.g. a block height) can be sought with at most
//! two file opens and no central index.
//!
//! ```no_run
//! use cqdb::{Chronology, DbOptions, Hash256, Object, Replayer, Result};
//!
//! struct Nop;
//! impl Replayer<Hash256, Object<Hash256>> for Nop {
//!     fn replay_event(
//!         _chronology: &mut Chronology<Hash256, Object<Hash256>, Self>,
//!         _cmd: u8,
//!         _known: bool,
//!     ) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let options = DbOptions::new("/tmp/db", "cluster").cluster_size(1008);
//! let mut chronology: Chronology<Hash256, Object<Hash256>, Nop> =
//!     Chronology::open(options)?;
//! chronology.load()?;
//! chronology.begin_segment(1)?;
//! chronology.push_event(1_557_974_775, 0x05)?;
//! # Ok(())
//! # }
//! ```

pub use cqdb_chronology::{
    compress_reference, compress_references, decode_time, decompress_reference,
    decompress_references, encode_time, pack_event_header, unpack_event_header, Chronology,
    RefResolver, Replayer, CMD_MASK, KNOWN_BIT, TIME_SHIFT,
};
pub use cqdb_error::{CqError, Result};
pub use cqdb_io::{
    encoded_len, ensure_dir, list_dir, random_bytes, read_varint, remove_dir_recursive,
    remove_file, varint_len, write_varint, Bitfield, CondVarint, Decode, Encode, FileStream,
    IdSet, IncMap, MemoryStream, Stream,
};
pub use cqdb_store::{
    read_hash, write_hash, Database, DbOptions, Header, Object, Registry, StoredObject,
    HEADER_MAGIC, HEADER_VERSION, REGISTRY_FILE,
};
pub use cqdb_types::{ContentHash, Hash256, Id, NULL_ID, UNKNOWN_ID};
