//! ECIES over secp256k1.
//!
//! ```text
//! +---------------------+-----------+------------------------+
//! | ephemeral pub (65)  | nonce(12) | AES-256-GCM body + tag |
//! +---------------------+-----------+------------------------+
//! ```
//!
//! The AES key is HKDF-SHA256 over the ECDH shared x-coordinate, salted with
//! the ephemeral public key.

use crate::aead::{Nonce, SymmetricKey};
use crate::{
    AES_NONCE_LENGTH, AES_TAG_LENGTH, CryptoError, PUBLIC_KEY_LENGTH, PrivateKey, PublicKey,
    SYM_KEY_LENGTH,
};
use hkdf::Hkdf;
use k256::ecdh::{EphemeralSecret, diffie_hellman};
use rand_core::OsRng;
use sha2::Sha256;
use zeroize::Zeroize;

const HKDF_INFO: &[u8] = b"pss-ecies";

/// Fixed overhead added by [`encrypt`]
pub const ECIES_OVERHEAD: usize = PUBLIC_KEY_LENGTH + AES_NONCE_LENGTH + AES_TAG_LENGTH;

/// Encrypt `plaintext` to `receiver`.
///
/// # Errors
///
/// Returns [`CryptoError::SecureRandom`] or [`CryptoError::EncryptionFailed`]
/// if sealing fails.
pub fn encrypt(receiver: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = PublicKey::from_k256(ephemeral.public_key()).to_uncompressed();
    let shared = ephemeral.diffie_hellman(receiver.as_k256());

    let key = derive_key(shared.raw_secret_bytes().as_slice(), &ephemeral_public)?;
    let nonce = Nonce::generate()?;
    let body = key.seal(&nonce, plaintext)?;

    let mut out = Vec::with_capacity(ECIES_OVERHEAD + plaintext.len());
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(nonce.as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decrypt an ECIES ciphertext with the receiver's private key.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPublicKey`] when the ephemeral key prefix is
/// missing or not a curve point (the frame is not addressed to any key), and
/// [`CryptoError::DecryptionFailed`] when the body does not authenticate.
pub fn decrypt(receiver: &PrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < PUBLIC_KEY_LENGTH {
        return Err(CryptoError::InvalidPublicKey);
    }
    let (ephemeral_bytes, rest) = data.split_at(PUBLIC_KEY_LENGTH);
    let ephemeral = PublicKey::from_sec1_bytes(ephemeral_bytes)?;

    if rest.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce_bytes, body) = rest.split_at(AES_NONCE_LENGTH);
    let nonce = Nonce::from_slice(nonce_bytes).ok_or(CryptoError::DecryptionFailed)?;

    let shared = diffie_hellman(
        receiver.signing_key().as_nonzero_scalar(),
        ephemeral.as_k256().as_affine(),
    );
    let key = derive_key(shared.raw_secret_bytes().as_slice(), ephemeral_bytes)?;
    key.open(&nonce, body)
}

fn derive_key(shared_x: &[u8], salt: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_x);
    let mut okm = [0u8; SYM_KEY_LENGTH];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let key = SymmetricKey::from_slice(&okm);
    okm.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let receiver = PrivateKey::generate();
        let sealed = encrypt(&receiver.public_key(), b"dark routed").unwrap();
        assert_eq!(sealed.len(), ECIES_OVERHEAD + 11);
        assert_eq!(decrypt(&receiver, &sealed).unwrap(), b"dark routed");
    }

    #[test]
    fn test_wrong_receiver_fails() {
        let receiver = PrivateKey::generate();
        let other = PrivateKey::generate();
        let sealed = encrypt(&receiver.public_key(), b"secret").unwrap();
        assert_eq!(
            decrypt(&other, &sealed).unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_garbage_prefix_is_invalid_public_key() {
        let receiver = PrivateKey::generate();
        assert_eq!(
            decrypt(&receiver, &[0u8; 128]).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
        assert_eq!(
            decrypt(&receiver, &[4u8; 10]).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
    }

    #[test]
    fn test_truncated_body_fails() {
        let receiver = PrivateKey::generate();
        let sealed = encrypt(&receiver.public_key(), b"x").unwrap();
        assert_eq!(
            decrypt(&receiver, &sealed[..PUBLIC_KEY_LENGTH + 4]).unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_ciphertexts_are_randomized() {
        let receiver = PrivateKey::generate().public_key();
        let a = encrypt(&receiver, b"same").unwrap();
        let b = encrypt(&receiver, b"same").unwrap();
        assert_ne!(a, b);
    }
}
