//! The chronology: an event log over the CQDB database layer.
//!
//! Events carry a 5-bit application command, a compressed timestamp delta,
//! and an optional payload referencing content-addressed objects. Objects
//! written through the log become *known* and later references to them
//! compress into relative backpointers; unknown references fall back to raw
//! hashes.

mod chronology;
mod compress;
mod event;
mod time;

pub use chronology::{Chronology, Replayer};
pub use compress::{
    compress_reference, compress_references, decompress_reference, decompress_references,
    RefResolver,
};
pub use event::{pack_event_header, unpack_event_header, CMD_MASK, KNOWN_BIT, TIME_SHIFT};
pub use time::{decode_time, encode_time};

pub use cqdb_error::{CqError, Result};
