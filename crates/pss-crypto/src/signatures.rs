//! Recoverable secp256k1 signatures.
//!
//! Signatures are 65 bytes, `r || s || v`, where `v` is the recovery id
//! (0 or 1). The signed message is always a 32-byte keccak256 prehash, so
//! the signer's public key can be recovered without being transmitted.

use crate::{CryptoError, PrivateKey, PublicKey, SIGNATURE_LENGTH};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

/// 65-byte recoverable ECDSA signature
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature([u8; SIGNATURE_LENGTH]);

impl RecoverableSignature {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IncorrectSignature`] if `bytes` is not exactly
    /// 65 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; SIGNATURE_LENGTH] = bytes
            .try_into()
            .map_err(|_| CryptoError::IncorrectSignature)?;
        Ok(Self(arr))
    }

    /// Get the raw `r || s || v` bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    /// Recovery id byte
    #[must_use]
    pub fn v(&self) -> u8 {
        self.0[SIGNATURE_LENGTH - 1]
    }

    /// Recover the signer from the prehash this signature was made over.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IncorrectSignature`] for a malformed `r`/`s`,
    /// a recovery id other than 0 or 1, or a point that does not verify.
    pub fn recover(&self, prehash: &[u8; 32]) -> Result<PublicKey, CryptoError> {
        let v = self.v();
        if v > 1 {
            return Err(CryptoError::IncorrectSignature);
        }
        let recovery_id = RecoveryId::from_byte(v).ok_or(CryptoError::IncorrectSignature)?;
        let signature = Signature::from_slice(&self.0[..SIGNATURE_LENGTH - 1])
            .map_err(|_| CryptoError::IncorrectSignature)?;

        let verifying_key = VerifyingKey::recover_from_prehash(prehash, &signature, recovery_id)
            .map_err(|_| CryptoError::IncorrectSignature)?;
        Ok(PublicKey::from_k256(k256::PublicKey::from(&verifying_key)))
    }
}

impl std::fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecoverableSignature({}..)", hex::encode(&self.0[..8]))
    }
}

/// Sign a keccak256 prehash.
///
/// # Errors
///
/// Returns [`CryptoError::IncorrectSignature`] if the signing primitive
/// rejects the input.
pub fn sign_prehash(
    key: &PrivateKey,
    prehash: &[u8; 32],
) -> Result<RecoverableSignature, CryptoError> {
    let (signature, recovery_id) = key
        .signing_key()
        .sign_prehash_recoverable(prehash)
        .map_err(|_| CryptoError::IncorrectSignature)?;

    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..SIGNATURE_LENGTH - 1].copy_from_slice(&signature.to_bytes());
    out[SIGNATURE_LENGTH - 1] = recovery_id.to_byte();
    Ok(RecoverableSignature(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::keccak256;

    #[test]
    fn test_sign_and_recover() {
        let key = PrivateKey::generate();
        let digest = keccak256(b"pss envelope");

        let sig = sign_prehash(&key, &digest).unwrap();
        assert!(sig.v() <= 1);

        let recovered = sig.recover(&digest).unwrap();
        assert_eq!(recovered, key.public_key());
    }

    #[test]
    fn test_recover_wrong_digest_yields_other_key() {
        let key = PrivateKey::generate();
        let sig = sign_prehash(&key, &keccak256(b"one")).unwrap();

        match sig.recover(&keccak256(b"two")) {
            Ok(other) => assert_ne!(other, key.public_key()),
            Err(e) => assert_eq!(e, CryptoError::IncorrectSignature),
        }
    }

    #[test]
    fn test_invalid_recovery_id() {
        let key = PrivateKey::generate();
        let digest = keccak256(b"msg");
        let mut bytes = *sign_prehash(&key, &digest).unwrap().as_bytes();
        bytes[64] = 27;

        let sig = RecoverableSignature::from_slice(&bytes).unwrap();
        assert_eq!(sig.recover(&digest), Err(CryptoError::IncorrectSignature));
    }

    #[test]
    fn test_zero_signature_rejected() {
        let sig = RecoverableSignature::from_slice(&[0u8; SIGNATURE_LENGTH]).unwrap();
        assert_eq!(
            sig.recover(&keccak256(b"msg")),
            Err(CryptoError::IncorrectSignature)
        );
    }

    #[test]
    fn test_from_slice_length() {
        assert!(RecoverableSignature::from_slice(&[0u8; 64]).is_err());
        assert!(RecoverableSignature::from_slice(&[0u8; 66]).is_err());
    }
}
