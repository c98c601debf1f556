//! Dispatcher layer for PSS
//!
//! [`Pss`] ties the lower components together:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Pss dispatcher                       │
//! │   send / send_raw / send_sym / send_asym   │   handle    │
//! ├─────────────────────────────────────────────────────────┤
//! │  KeyStore  │  ForwardCache  │  Outbox  │  Handlers       │
//! ├─────────────────────────────────────────────────────────┤
//! │  CryptoBackend (pss-crypto)  │  Overlay  │  Forwarder    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The overlay and the transport forwarder are supplied by the embedding
//! node; PSS never opens sockets itself.

pub mod config;
pub mod handler;
pub mod inbound;
pub mod outbound;
pub mod pss;
pub mod stats;

pub use config::PssConfig;
pub use handler::{Handler, HandlerCaps, HandlerRegistry, InboundMessage};
pub use inbound::Disposition;
pub use outbound::KeyMaterial;
pub use pss::Pss;
pub use stats::PssStats;
