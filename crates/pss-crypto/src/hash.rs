//! keccak256 hashing.
//!
//! keccak256 is the legacy (pre-NIST) Keccak used for signing prehashes and
//! topic derivation. It is not SHA3-256.

use sha3::{Digest, Keccak256};

/// Hash a single buffer with keccak256.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}
