//! Crypto backend seam and the default in-memory implementation.
//!
//! Everything PSS needs from cryptography goes through [`CryptoBackend`],
//! injected at construction. The symmetric key store lives behind the same
//! seam so that external key-agreement ceremonies can share its id space.

use crate::aead::SymmetricKey;
use crate::envelope::{self, ReceivedMessage, UnwrapParams, WrapParams, validate_padding_block};
use crate::random::random_32;
use crate::{CryptoError, DEFAULT_PADDING_BLOCK, PublicKey};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Capability set used by the PSS key store and dispatcher.
pub trait CryptoBackend: Send + Sync {
    /// Pad, optionally sign, and seal a plaintext.
    ///
    /// # Errors
    ///
    /// See [`envelope::wrap`].
    fn wrap(&self, plaintext: &[u8], params: &WrapParams<'_>) -> Result<Vec<u8>, CryptoError>;

    /// Open a ciphertext.
    ///
    /// # Errors
    ///
    /// See [`envelope::unwrap`].
    fn unwrap(
        &self,
        ciphertext: &[u8],
        params: &UnwrapParams<'_>,
    ) -> Result<ReceivedMessage, CryptoError>;

    /// Fetch symmetric key material by id.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnknownKeyId`] if the id is not stored.
    fn get_sym_key(&self, id: &str) -> Result<SymmetricKey, CryptoError>;

    /// Generate and store a fresh symmetric key, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SecureRandom`] if the CSPRNG misbehaves.
    fn generate_sym_key(&self) -> Result<String, CryptoError>;

    /// Store externally supplied symmetric key material, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSymKey`] for wrong-length or all-zero
    /// material.
    fn add_sym_key(&self, key: &[u8]) -> Result<String, CryptoError>;

    /// Serialize a public key to its uncompressed form.
    fn serialize_public_key(&self, key: &PublicKey) -> Vec<u8>;

    /// Parse a public key from SEC1 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] for malformed points.
    fn unmarshal_public_key(&self, bytes: &[u8]) -> Result<PublicKey, CryptoError>;

    /// Serialize a public key to its compressed form.
    fn compress_public_key(&self, key: &PublicKey) -> Vec<u8>;
}

/// Default backend: AES-256-GCM, ECIES, and an in-memory key table.
#[derive(Debug)]
pub struct DefaultCrypto {
    padding_block: usize,
    sym_keys: DashMap<String, SymmetricKey>,
}

impl DefaultCrypto {
    /// Create a backend padding envelopes to `padding_block`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPaddingBlock`] unless the block is at
    /// least 16 and a power of two.
    pub fn new(padding_block: usize) -> Result<Self, CryptoError> {
        validate_padding_block(padding_block)?;
        Ok(Self {
            padding_block,
            sym_keys: DashMap::new(),
        })
    }

    /// Configured padding block
    #[must_use]
    pub fn padding_block(&self) -> usize {
        self.padding_block
    }

    /// Number of stored symmetric keys
    #[must_use]
    pub fn sym_key_count(&self) -> usize {
        self.sym_keys.len()
    }

    fn store(&self, key: SymmetricKey) -> Result<String, CryptoError> {
        loop {
            let id = format!("0x{}", hex::encode(random_32()?));
            if let Entry::Vacant(slot) = self.sym_keys.entry(id.clone()) {
                slot.insert(key);
                tracing::trace!(key = %&id[..10], "stored symmetric key");
                return Ok(id);
            }
        }
    }
}

impl Default for DefaultCrypto {
    fn default() -> Self {
        Self {
            padding_block: DEFAULT_PADDING_BLOCK,
            sym_keys: DashMap::new(),
        }
    }
}

impl CryptoBackend for DefaultCrypto {
    fn wrap(&self, plaintext: &[u8], params: &WrapParams<'_>) -> Result<Vec<u8>, CryptoError> {
        envelope::wrap(plaintext, params, self.padding_block)
    }

    fn unwrap(
        &self,
        ciphertext: &[u8],
        params: &UnwrapParams<'_>,
    ) -> Result<ReceivedMessage, CryptoError> {
        envelope::unwrap(ciphertext, params)
    }

    fn get_sym_key(&self, id: &str) -> Result<SymmetricKey, CryptoError> {
        self.sym_keys
            .get(id)
            .map(|key| key.value().clone())
            .ok_or_else(|| CryptoError::UnknownKeyId(id.to_string()))
    }

    fn generate_sym_key(&self) -> Result<String, CryptoError> {
        self.store(SymmetricKey::generate()?)
    }

    fn add_sym_key(&self, key: &[u8]) -> Result<String, CryptoError> {
        self.store(SymmetricKey::from_slice(key)?)
    }

    fn serialize_public_key(&self, key: &PublicKey) -> Vec<u8> {
        key.to_uncompressed().to_vec()
    }

    fn unmarshal_public_key(&self, bytes: &[u8]) -> Result<PublicKey, CryptoError> {
        PublicKey::from_sec1_bytes(bytes)
    }

    fn compress_public_key(&self, key: &PublicKey) -> Vec<u8> {
        key.to_compressed().to_vec()
    }
}
