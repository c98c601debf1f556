//! Error types for PSS.
//!
//! Errors are typed by kind. Outbound operations and key registration
//! surface them unchanged; inbound processing converts them into tracing
//! events and counters and never propagates them to the transport layer.

use pss_crypto::CryptoError;
use std::borrow::Cow;
use thiserror::Error;

/// PSS errors
#[derive(Debug, Error, Clone)]
pub enum PssError {
    // ============ Wire & Crypto Errors ============
    /// Message codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Envelope or key error from the crypto engine
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    // ============ Key Store Errors ============
    /// Peer hint length out of range
    #[error("invalid peer address length: {0}")]
    InvalidPeerAddress(usize),

    /// No cached symmetric key could open an inbound message
    #[error("no symmetric key could decrypt the message")]
    NoDecryptKey,

    /// No binding for the requested key id and topic
    #[error("no key binding for {0}")]
    UnknownKey(String),

    // ============ Dispatch Errors ============
    /// Outbox rejected an enqueue
    #[error("outbox full")]
    OutboxFull,

    /// Digest already present in the forward cache
    #[error("duplicate message")]
    DuplicateMessage,

    /// Transport forwarder failed
    #[error("forward failed: {0}")]
    Forward(Cow<'static, str>),

    /// Handler reported a failure
    #[error("handler failed: {0}")]
    Handler(Cow<'static, str>),

    // ============ Configuration Errors ============
    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Configuration could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),
}

impl PssError {
    /// Returns true if retrying the same operation later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, PssError::OutboxFull | PssError::Forward(_))
    }

    /// Returns true if the error concerns key material or key bindings
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            PssError::NoDecryptKey
                | PssError::UnknownKey(_)
                | PssError::Crypto(
                    CryptoError::InvalidPublicKey
                        | CryptoError::InvalidSymKey
                        | CryptoError::NoKey
                        | CryptoError::UnknownKeyId(_)
                )
        )
    }

    /// Create a forward error with static context (zero allocation)
    #[must_use]
    pub const fn forward(context: &'static str) -> Self {
        PssError::Forward(Cow::Borrowed(context))
    }

    /// Create a handler error with static context (zero allocation)
    #[must_use]
    pub const fn handler(context: &'static str) -> Self {
        PssError::Handler(Cow::Borrowed(context))
    }

    /// Create an invalid configuration error with static context
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        PssError::InvalidConfig(Cow::Borrowed(context))
    }
}

/// Message codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a field was complete
    #[error("message too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Flags field length prefix was not exactly 1
    #[error("invalid flags field length: {0}")]
    InvalidFlagsLength(usize),

    /// Recipient hint longer than an overlay address
    #[error("recipient hint too long: {0} bytes")]
    RecipientTooLong(usize),

    /// Payload larger than the configured bound
    #[error("payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge {
        /// Declared payload size
        size: usize,
        /// Configured bound
        max: usize,
    },

    /// Bytes left over after the payload
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Result type for PSS operations
pub type Result<T> = std::result::Result<T, PssError>;
