//! # PSS Core
//!
//! Postal Service over Swarm: topic-addressed, end-to-end encrypted messaging
//! relayed hop by hop through an overlay network.
//!
//! This crate provides:
//! - The [`Message`] wire format and its codec
//! - The [`KeyStore`] of topic-scoped key bindings and the symmetric decrypt cache
//! - The [`ForwardCache`] suppressing duplicates and echoes
//! - The [`Outbox`], a bounded transmit queue with retry
//! - The [`node::Pss`] dispatcher joining them to an [`Overlay`] and a
//!   [`Forwarder`]
//!
//! Envelope cryptography lives in `pss-crypto`.
//!
//! ## Message flow
//!
//! ```text
//!  send ──▶ wrap ──▶ Message ──▶ ForwardCache.add ──▶ Outbox ──▶ Forwarder
//!
//!  Forwarder ──▶ handle ──▶ expired? dup? ──▶ recipient? ──▶ open ──▶ handlers
//!                                                 │                    │
//!                                                 └──────▶ Outbox ◀────┘ (relay)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod forward_cache;
pub mod keystore;
pub mod message;
pub mod node;
pub mod outbox;
pub mod overlay;
pub mod shutdown;

pub use error::{CodecError, PssError, Result};
pub use forward_cache::ForwardCache;
pub use keystore::{Decrypted, KeyStore, PeerRecord};
pub use message::{Digest, Message, MessageCodec, MessageFlags, Topic};
pub use node::{Disposition, Handler, HandlerCaps, KeyMaterial, Pss, PssConfig, PssStats};
pub use outbox::{Forwarder, Outbox, OutboxStats, forward_fn};
pub use overlay::{Overlay, PSS_CAPABILITY, proximity_order};
pub use shutdown::{Shutdown, ShutdownListener};

/// Full overlay address length; the recipient hint is at most this long
pub const ADDRESS_LENGTH: usize = 32;

/// Topic length
pub const TOPIC_LENGTH: usize = 4;

/// Default upper bound on a message payload (2 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 2 * 1024 * 1024;

/// Default outbox capacity
pub const DEFAULT_OUTBOX_CAPACITY: usize = 100_000;

/// Short form of a key id or hex string for logs
pub(crate) fn label(id: &str) -> &str {
    id.get(..10).unwrap_or(id)
}
