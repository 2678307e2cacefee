//! Core identifiers and hash types shared by every CQDB layer.

mod hash;

pub use hash::{ContentHash, Hash256};

/// Absolute positions, segment ids and cluster ids are all 64-bit.
pub type Id = u64;

/// Sentinel for "no id" (absent cluster, unset position).
pub const NULL_ID: Id = u64::MAX;

/// Sentinel sid for objects that have not been written to a cluster yet.
pub const UNKNOWN_ID: Id = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_distinct() {
        assert_ne!(NULL_ID, UNKNOWN_ID);
    }
}
