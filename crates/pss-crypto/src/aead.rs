//! AES-256-GCM symmetric sealing.
//!
//! Symmetric envelopes are sealed with a fresh random 96-bit nonce which is
//! appended *after* the sealed body:
//!
//! ```text
//! +----------------------------+-----------+
//! | AES-GCM-Seal(envelope)+tag | nonce(12) |
//! +----------------------------+-----------+
//! ```

use crate::random::fill_random;
use crate::{AES_NONCE_LENGTH, AES_TAG_LENGTH, CryptoError, SYM_KEY_LENGTH};
use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, KeyInit};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-GCM nonce (12 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; AES_NONCE_LENGTH]);

impl Nonce {
    /// Create a nonce from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; AES_NONCE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create a nonce from a slice.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; AES_NONCE_LENGTH] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Generate a random nonce from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SecureRandom`] if the OS CSPRNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; AES_NONCE_LENGTH];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; AES_NONCE_LENGTH] {
        &self.0
    }
}

/// AES-256-GCM key (32 bytes).
///
/// Construction rejects wrong lengths and all-zero material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYM_KEY_LENGTH]);

impl SymmetricKey {
    /// Create a key from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSymKey`] if the slice is not 32 bytes or
    /// is entirely zero.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SYM_KEY_LENGTH] =
            slice.try_into().map_err(|_| CryptoError::InvalidSymKey)?;
        if bytes.iter().all(|&b| b == 0) {
            return Err(CryptoError::InvalidSymKey);
        }
        Ok(Self(bytes))
    }

    /// Generate a fresh random key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SecureRandom`] if the CSPRNG misbehaves.
    pub fn generate() -> Result<Self, CryptoError> {
        let bytes = crate::random::random_32()?;
        Ok(Self(bytes))
    }

    /// Get raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SYM_KEY_LENGTH] {
        &self.0
    }

    /// Seal `plaintext` under a fresh nonce, returning `ciphertext || nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SecureRandom`] if no nonce can be drawn, or
    /// [`CryptoError::EncryptionFailed`] if sealing fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::generate()?;
        let mut out = self.seal(&nonce, plaintext)?;
        out.extend_from_slice(nonce.as_bytes());
        Ok(out)
    }

    /// Split the trailing nonce off `data` and open the sealed body.
    ///
    /// Returns the plaintext and the nonce that was used.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if `data` is too short to
    /// hold a nonce and tag, or if authentication fails.
    pub fn decrypt(&self, data: &[u8]) -> Result<(Vec<u8>, Nonce), CryptoError> {
        if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
            return Err(CryptoError::DecryptionFailed);
        }
        let (body, nonce_bytes) = data.split_at(data.len() - AES_NONCE_LENGTH);
        let nonce = Nonce::from_slice(nonce_bytes).ok_or(CryptoError::DecryptionFailed)?;
        let plaintext = self.open(&nonce, body)?;
        Ok((plaintext, nonce))
    }

    pub(crate) fn seal(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.0).map_err(|_| CryptoError::EncryptionFailed)?;
        cipher
            .encrypt(aes_gcm::Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    pub(crate) fn open(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.0).map_err(|_| CryptoError::DecryptionFailed)?;
        cipher
            .decrypt(aes_gcm::Nonce::from_slice(&nonce.0), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}
