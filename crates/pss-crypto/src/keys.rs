//! secp256k1 key pairs.
//!
//! Public keys travel as 65-byte uncompressed SEC1 points. The hex encoding
//! of that form, prefixed with `0x`, is the key id used throughout PSS.

use crate::{COMPRESSED_PUBLIC_KEY_LENGTH, CryptoError, PUBLIC_KEY_LENGTH};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use std::fmt;

/// Long-lived secp256k1 private key.
///
/// The scalar is wiped from memory on drop.
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generate a new random private key.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::random(&mut OsRng),
        }
    }

    /// Load a private key from its 32-byte scalar.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the scalar is zero or not
    /// below the curve order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        SigningKey::from_slice(bytes)
            .map(|inner| Self { inner })
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Export the 32-byte scalar.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes().into()
    }

    /// Get the matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: k256::PublicKey::from(self.inner.verifying_key()),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.inner
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &self.public_key().key_id())
            .finish_non_exhaustive()
    }
}

/// secp256k1 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: k256::PublicKey,
}

impl PublicKey {
    /// Parse a SEC1 encoded point (compressed or uncompressed).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the encoding is malformed
    /// or the point is not on the curve.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        k256::PublicKey::from_sec1_bytes(bytes)
            .map(|inner| Self { inner })
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Parse a key id (`0x` + hex of the SEC1 point).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] on bad hex or a bad point.
    pub fn from_key_id(id: &str) -> Result<Self, CryptoError> {
        let digits = id.strip_prefix("0x").unwrap_or(id);
        let bytes = hex::decode(digits).map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Serialize as a 65-byte uncompressed point.
    #[must_use]
    pub fn to_uncompressed(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let point = self.inner.to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Serialize as a 33-byte compressed point.
    #[must_use]
    pub fn to_compressed(&self) -> [u8; COMPRESSED_PUBLIC_KEY_LENGTH] {
        let point = self.inner.to_encoded_point(true);
        let mut out = [0u8; COMPRESSED_PUBLIC_KEY_LENGTH];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Key id: `0x` followed by the lowercase hex of the uncompressed point.
    #[must_use]
    pub fn key_id(&self) -> String {
        format!("0x{}", hex::encode(self.to_uncompressed()))
    }

    pub(crate) fn as_k256(&self) -> &k256::PublicKey {
        &self.inner
    }

    pub(crate) fn from_k256(inner: k256::PublicKey) -> Self {
        Self { inner }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_compressed()))
    }
}
