//! Timestamp delta compression.
//!
//! Two bits of the event header carry `min(Δt, 3)`. Codes 0..=2 encode the
//! delta entirely; code 3 is followed by `varint(Δt - 3)` in the stream.

use cqdb_error::Result;
use cqdb_io::{read_varint, Stream};

/// Largest delta the header bits encode on their own.
const INLINE_DELTA_MAX: u64 = 2;

/// Compress `timestamp - prev` into a 2-bit code and an optional varint
/// payload. The caller must have validated `timestamp >= prev`.
#[must_use]
pub fn encode_time(prev: u64, timestamp: u64) -> (u8, Option<u64>) {
    let delta = timestamp - prev;
    if delta <= INLINE_DELTA_MAX {
        (delta as u8, None)
    } else {
        (3, Some(delta - 3))
    }
}

/// Reconstruct a timestamp from the 2-bit code, reading the overflow
/// varint when the code is saturated.
pub fn decode_time<S: Stream + ?Sized>(prev: u64, code: u8, stream: &mut S) -> Result<u64> {
    debug_assert!(code <= 3);
    let mut timestamp = prev + u64::from(code);
    if u64::from(code) > INLINE_DELTA_MAX {
        timestamp += read_varint(stream)?;
    }
    Ok(timestamp)
}
