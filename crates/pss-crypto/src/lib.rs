//! # PSS Crypto
//!
//! Envelope cryptography for PSS (Postal Service over Swarm).
//!
//! This crate provides:
//! - The padded, optionally signed plaintext envelope and its parser
//! - AES-256-GCM symmetric sealing with a trailing nonce
//! - ECIES over secp256k1 for asymmetric sealing
//! - Recoverable 65-byte ECDSA signatures over keccak256
//! - An in-memory symmetric key store behind the [`CryptoBackend`] seam
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Notes |
//! |----------|-----------|-------|
//! | Signatures | secp256k1 ECDSA | recoverable, `r \|\| s \|\| v` |
//! | Symmetric | AES-256-GCM | `ciphertext \|\| nonce(12)` |
//! | Asymmetric | ECIES (ECDH + HKDF-SHA256 + AES-256-GCM) | ephemeral key prefix |
//! | Hash | keccak256 | signing prehash, topic derivation |
//!
//! ## Envelope layout
//!
//! ```text
//! +-------+------------+---------+---------+-------------+
//! | flags | size (0-3) | payload | padding | sig (0/65)  |
//! +-------+------------+---------+---------+-------------+
//! |<------ multiple of the padding block (default 256) ->|
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod backend;
pub mod ecies;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod keys;
pub mod random;
pub mod signatures;

pub use backend::{CryptoBackend, DefaultCrypto};
pub use envelope::{ReceivedMessage, UnwrapParams, WrapParams};
pub use error::CryptoError;
pub use keys::{PrivateKey, PublicKey};

/// Convenience alias for crypto results
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Length of a recoverable secp256k1 signature (`r || s || v`)
pub const SIGNATURE_LENGTH: usize = 65;

/// Length of an uncompressed SEC1 public key
pub const PUBLIC_KEY_LENGTH: usize = 65;

/// Length of a compressed SEC1 public key
pub const COMPRESSED_PUBLIC_KEY_LENGTH: usize = 33;

/// AES-256-GCM key length
pub const SYM_KEY_LENGTH: usize = 32;

/// AES-GCM nonce length (appended to symmetric ciphertexts)
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-GCM authentication tag length
pub const AES_TAG_LENGTH: usize = 16;

/// keccak256 output size
pub const KECCAK_OUTPUT_SIZE: usize = 32;

/// Default padding block for envelopes
pub const DEFAULT_PADDING_BLOCK: usize = 256;

/// Smallest padding block accepted by [`DefaultCrypto`]
pub const MIN_PADDING_BLOCK: usize = 16;
