//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
///
/// Errors are typed by kind, not by the primitive that produced them. The
/// type is `Clone` so a parse-once result can be handed to every observer of
/// a [`ReceivedMessage`](crate::ReceivedMessage).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Public key serialization, coordinate, or on-curve check failed
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Symmetric key has the wrong length or is all zero
    #[error("invalid symmetric key")]
    InvalidSymKey,

    /// Neither a receiver key nor a symmetric key was supplied
    #[error("no key supplied for encryption or decryption")]
    NoKey,

    /// Signature flag set but the signature did not recover a valid sender
    #[error("incorrect signature")]
    IncorrectSignature,

    /// Signature flag set but nothing precedes the signature
    #[error("empty signature")]
    EmptySignature,

    /// Envelope contained no bytes
    #[error("empty message")]
    EmptyMessage,

    /// Declared payload size exceeds the envelope
    #[error("incorrect payload size")]
    IncorrectSize,

    /// CSPRNG produced a short read or all-zero output
    #[error("secure random generation failed")]
    SecureRandom,

    /// AEAD sealing failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD authentication failure or malformed ciphertext
    #[error("decryption failed")]
    DecryptionFailed,

    /// Key id is not present in the store
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),

    /// Padding block is smaller than the minimum or not a power of two
    #[error("invalid padding block: {0}")]
    InvalidPaddingBlock(usize),
}
