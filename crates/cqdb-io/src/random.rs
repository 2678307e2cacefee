//! OS randomness helper. The core never calls this; it exists for callers
//! and tests that need throwaway content hashes.

use rand::RngCore;

/// Fill `buf` with random bytes.
pub fn random_bytes(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}
