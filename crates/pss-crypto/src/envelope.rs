//! Envelope wrapping and unwrapping.
//!
//! The plaintext envelope is
//!
//! ```text
//! byte 0      flags: bits 0-1 = size field length k (0-3), bit 2 = signed
//! 1..=k       payload length, little-endian
//! ...         payload
//! ...         CSPRNG padding, never all zero
//! last 65     recoverable signature over everything before it (if signed)
//! ```
//!
//! The whole envelope, signature included, is a multiple of the padding
//! block. Wrapping then seals it with AES-256-GCM or ECIES.

use crate::aead::{Nonce, SymmetricKey};
use crate::hash::keccak256;
use crate::random::secure_random;
use crate::signatures::{RecoverableSignature, sign_prehash};
use crate::{CryptoError, MIN_PADDING_BLOCK, PrivateKey, PublicKey, SIGNATURE_LENGTH, ecies};
use std::ops::Range;
use std::sync::OnceLock;

/// Flags bit set when a signature is appended
pub const SIGNATURE_FLAG: u8 = 0b100;

/// Mask over the flags byte selecting the size field length
pub const SIZE_FIELD_MASK: u8 = 0b011;

/// Longest payload size field the two flag bits can express (payloads
/// below 16 MiB)
pub const MAX_SIZE_FIELD_LENGTH: usize = 3;

const PADDING_ATTEMPTS: usize = 8;

/// Keys used to seal an envelope.
///
/// Exactly one of `receiver` or `symmetric_key` must be set.
#[derive(Debug, Default, Clone, Copy)]
pub struct WrapParams<'a> {
    /// Signs the envelope when present
    pub sender: Option<&'a PrivateKey>,
    /// Seals with ECIES to this key
    pub receiver: Option<&'a PublicKey>,
    /// Seals with AES-256-GCM under this key
    pub symmetric_key: Option<&'a [u8]>,
}

impl<'a> WrapParams<'a> {
    /// Parameters for symmetric sealing.
    #[must_use]
    pub fn symmetric(key: &'a [u8]) -> Self {
        Self {
            symmetric_key: Some(key),
            ..Self::default()
        }
    }

    /// Parameters for asymmetric sealing.
    #[must_use]
    pub fn asymmetric(receiver: &'a PublicKey) -> Self {
        Self {
            receiver: Some(receiver),
            ..Self::default()
        }
    }

    /// Sign the envelope with `sender`.
    #[must_use]
    pub fn signed_by(mut self, sender: &'a PrivateKey) -> Self {
        self.sender = Some(sender);
        self
    }
}

/// Keys used to open an envelope.
///
/// Exactly one of `receiver` or `symmetric_key` must be set. When `sender`
/// is present, the envelope must carry a signature recovering to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnwrapParams<'a> {
    /// Expected signer
    pub sender: Option<&'a PublicKey>,
    /// Opens ECIES ciphertexts
    pub receiver: Option<&'a PrivateKey>,
    /// Opens AES-256-GCM ciphertexts
    pub symmetric_key: Option<&'a [u8]>,
}

impl<'a> UnwrapParams<'a> {
    /// Parameters for symmetric opening.
    #[must_use]
    pub fn symmetric(key: &'a [u8]) -> Self {
        Self {
            symmetric_key: Some(key),
            ..Self::default()
        }
    }

    /// Parameters for asymmetric opening.
    #[must_use]
    pub fn asymmetric(receiver: &'a PrivateKey) -> Self {
        Self {
            receiver: Some(receiver),
            ..Self::default()
        }
    }

    /// Require a signature from `sender`.
    #[must_use]
    pub fn expect_sender(mut self, sender: &'a PublicKey) -> Self {
        self.sender = Some(sender);
        self
    }
}

/// Check that a padding block is usable.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPaddingBlock`] unless the block is at least
/// 16 bytes and a power of two.
pub fn validate_padding_block(block: usize) -> Result<(), CryptoError> {
    if block < MIN_PADDING_BLOCK || !block.is_power_of_two() {
        return Err(CryptoError::InvalidPaddingBlock(block));
    }
    Ok(())
}

/// Minimum number of little-endian bytes needed to hold `len`.
#[must_use]
pub fn size_field_length(len: usize) -> usize {
    let mut field = 1;
    let mut rest = len;
    while rest >= 256 {
        field += 1;
        rest /= 256;
    }
    field
}

/// Build the plaintext envelope for `payload`.
///
/// # Errors
///
/// Returns [`CryptoError::IncorrectSize`] for payloads of 16 MiB or more,
/// [`CryptoError::SecureRandom`] if padding cannot be drawn, or a signing
/// error.
pub fn build_envelope(
    payload: &[u8],
    sender: Option<&PrivateKey>,
    padding_block: usize,
) -> Result<Vec<u8>, CryptoError> {
    validate_padding_block(padding_block)?;

    let field_len = size_field_length(payload.len());
    if field_len > MAX_SIZE_FIELD_LENGTH {
        return Err(CryptoError::IncorrectSize);
    }
    let signature_len = if sender.is_some() { SIGNATURE_LENGTH } else { 0 };
    let raw_size = 1 + field_len + payload.len() + signature_len;
    let padding_len = padding_block - raw_size % padding_block;

    let mut flags = field_len as u8;
    if sender.is_some() {
        flags |= SIGNATURE_FLAG;
    }

    let mut buf = Vec::with_capacity(raw_size + padding_len);
    buf.push(flags);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..field_len]);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&padding(padding_len)?);

    if let Some(key) = sender {
        let signature = sign_prehash(key, &keccak256(&buf))?;
        buf.extend_from_slice(signature.as_bytes());
    }

    Ok(buf)
}

/// Random padding of `len` bytes. Any non-empty padding must contain a
/// non-zero byte, including the one to three byte tails `secure_random`
/// lets through unchecked.
fn padding(len: usize) -> Result<Vec<u8>, CryptoError> {
    for _ in 0..PADDING_ATTEMPTS {
        match secure_random(len) {
            Ok(bytes) if bytes.is_empty() || bytes.iter().any(|&b| b != 0) => return Ok(bytes),
            _ => continue,
        }
    }
    Err(CryptoError::SecureRandom)
}

/// Positions of the parts of a validated envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeLayout {
    /// Raw flags byte
    pub flags: u8,
    /// Payload byte range
    pub payload: Range<usize>,
    /// Padding byte range
    pub padding: Range<usize>,
    /// Recovered signer, if signed
    pub sender: Option<PublicKey>,
}

/// Validate a plaintext envelope and locate its parts.
///
/// # Errors
///
/// - [`CryptoError::EmptyMessage`] for an empty envelope
/// - [`CryptoError::EmptySignature`] when the signature flag is set but
///   nothing but the flags byte precedes the signature
/// - [`CryptoError::IncorrectSignature`] when no signer can be recovered
/// - [`CryptoError::IncorrectSize`] when the declared payload overruns the
///   envelope
pub fn parse_envelope(raw: &[u8]) -> Result<EnvelopeLayout, CryptoError> {
    let Some(&flags) = raw.first() else {
        return Err(CryptoError::EmptyMessage);
    };

    let mut end = raw.len();
    let mut sender = None;
    if flags & SIGNATURE_FLAG != 0 {
        if end <= SIGNATURE_LENGTH + 1 {
            return Err(CryptoError::EmptySignature);
        }
        end -= SIGNATURE_LENGTH;
        let signature = RecoverableSignature::from_slice(&raw[end..])?;
        sender = Some(signature.recover(&keccak256(&raw[..end]))?);
    }

    let field_len = (flags & SIZE_FIELD_MASK) as usize;
    let payload_start = 1 + field_len;
    if payload_start > end {
        return Err(CryptoError::IncorrectSize);
    }

    let mut size_bytes = [0u8; 4];
    size_bytes[..field_len].copy_from_slice(&raw[1..payload_start]);
    let size = u32::from_le_bytes(size_bytes) as usize;

    let payload_end = payload_start
        .checked_add(size)
        .filter(|&e| e <= end)
        .ok_or(CryptoError::IncorrectSize)?;

    Ok(EnvelopeLayout {
        flags,
        payload: payload_start..payload_end,
        padding: payload_end..end,
        sender,
    })
}

/// Pad, optionally sign, and seal `plaintext`.
///
/// # Errors
///
/// Returns [`CryptoError::NoKey`] unless exactly one of the receiver or
/// symmetric key is set, [`CryptoError::InvalidSymKey`] for unusable
/// symmetric material, or any envelope or sealing error.
pub fn wrap(
    plaintext: &[u8],
    params: &WrapParams<'_>,
    padding_block: usize,
) -> Result<Vec<u8>, CryptoError> {
    match (params.receiver, params.symmetric_key) {
        (None, Some(key_bytes)) => {
            let key = SymmetricKey::from_slice(key_bytes)?;
            let envelope = build_envelope(plaintext, params.sender, padding_block)?;
            key.encrypt(&envelope)
        }
        (Some(receiver), None) => {
            let envelope = build_envelope(plaintext, params.sender, padding_block)?;
            ecies::encrypt(receiver, &envelope)
        }
        _ => Err(CryptoError::NoKey),
    }
}

/// Open `ciphertext` into a [`ReceivedMessage`].
///
/// Only the outer sealing is checked here; the envelope is validated lazily
/// by the message observers.
///
/// # Errors
///
/// Returns [`CryptoError::NoKey`] unless exactly one of the receiver or
/// symmetric key is set, [`CryptoError::InvalidSymKey`] for unusable
/// symmetric material, [`CryptoError::InvalidPublicKey`] when an asymmetric
/// ciphertext carries no usable ephemeral key, or
/// [`CryptoError::DecryptionFailed`].
pub fn unwrap(ciphertext: &[u8], params: &UnwrapParams<'_>) -> Result<ReceivedMessage, CryptoError> {
    match (params.receiver, params.symmetric_key) {
        (None, Some(key_bytes)) => {
            let key = SymmetricKey::from_slice(key_bytes)?;
            let (raw, nonce) = key.decrypt(ciphertext)?;
            Ok(ReceivedMessage::new(raw, Some(nonce), params.sender.cloned()))
        }
        (Some(receiver), None) => {
            let raw = ecies::decrypt(receiver, ciphertext)?;
            Ok(ReceivedMessage::new(raw, None, params.sender.cloned()))
        }
        _ => Err(CryptoError::NoKey),
    }
}

/// A decrypted envelope.
///
/// The envelope is parsed and validated once, on the first call to any
/// observer; later calls return the cached outcome. Safe to share between
/// threads.
#[derive(Debug)]
pub struct ReceivedMessage {
    raw: Vec<u8>,
    salt: Option<Nonce>,
    expected_sender: Option<PublicKey>,
    layout: OnceLock<Result<EnvelopeLayout, CryptoError>>,
}

impl ReceivedMessage {
    fn new(raw: Vec<u8>, salt: Option<Nonce>, expected_sender: Option<PublicKey>) -> Self {
        Self {
            raw,
            salt,
            expected_sender,
            layout: OnceLock::new(),
        }
    }

    fn layout(&self) -> Result<&EnvelopeLayout, CryptoError> {
        self.layout
            .get_or_init(|| self.validate())
            .as_ref()
            .map_err(Clone::clone)
    }

    fn validate(&self) -> Result<EnvelopeLayout, CryptoError> {
        let layout = parse_envelope(&self.raw)?;
        if let Some(expected) = &self.expected_sender {
            if layout.sender.as_ref() != Some(expected) {
                return Err(CryptoError::IncorrectSignature);
            }
        }
        Ok(layout)
    }

    /// User payload.
    ///
    /// # Errors
    ///
    /// Returns the envelope validation error, if any.
    pub fn payload(&self) -> Result<&[u8], CryptoError> {
        let layout = self.layout()?;
        Ok(&self.raw[layout.payload.clone()])
    }

    /// Recovered signer, or `None` for an unsigned envelope.
    ///
    /// # Errors
    ///
    /// Returns the envelope validation error, if any.
    pub fn sender(&self) -> Result<Option<&PublicKey>, CryptoError> {
        Ok(self.layout()?.sender.as_ref())
    }

    /// Padding bytes between payload and signature.
    ///
    /// # Errors
    ///
    /// Returns the envelope validation error, if any.
    pub fn padding(&self) -> Result<&[u8], CryptoError> {
        let layout = self.layout()?;
        Ok(&self.raw[layout.padding.clone()])
    }

    /// The whole decrypted envelope.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// AES-GCM nonce for symmetric messages.
    #[must_use]
    pub fn salt(&self) -> Option<&Nonce> {
        self.salt.as_ref()
    }
}
