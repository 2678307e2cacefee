//! Byte streams and serialization primitives.
//!
//! This crate holds the codec floor of CQDB: the [`Stream`] abstraction with
//! its in-memory and file-backed variants, Bitcoin-style varints with
//! continuation carry, conditional varints packed into shared header bits,
//! delta-encoded ordered maps and sets, and the dense bitfield used by the
//! reference compressor.

mod bitfield;
mod fs;
mod incmap;
mod random;
mod stream;
mod varint;

pub mod file;
pub mod memory;

pub use bitfield::Bitfield;
pub use file::FileStream;
pub use fs::{ensure_dir, list_dir, remove_dir_recursive, remove_file};
pub use incmap::{IdSet, IncMap};
pub use memory::MemoryStream;
pub use random::random_bytes;
pub use stream::{encoded_len, Decode, Encode, Stream};
pub use varint::{read_varint, varint_len, write_varint, CondVarint};

pub use cqdb_error::{CqError, Result};
