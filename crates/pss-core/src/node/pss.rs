//! The PSS dispatcher: construction, lifecycle, and key management.
//!
//! # Example
//!
//! ```no_run
//! use pss_core::node::{Handler, KeyMaterial, Pss, PssConfig};
//! use pss_core::outbox::forward_fn;
//! use pss_core::{Overlay, Topic};
//! use pss_crypto::PrivateKey;
//! use std::sync::Arc;
//!
//! struct Solo([u8; 32]);
//!
//! impl Overlay for Solo {
//!     fn base_address(&self) -> &[u8] { &self.0 }
//!     fn is_closest_to(&self, _: &[u8], _: &str) -> bool { true }
//!     fn neighbourhood_depth(&self) -> usize { 0 }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let forwarder = forward_fn(|_msg| async { Ok(()) });
//!     let pss = Pss::new(
//!         PssConfig::default(),
//!         PrivateKey::generate(),
//!         Arc::new(Solo([0u8; 32])),
//!         forwarder,
//!     )?;
//!     pss.start();
//!
//!     let topic = Topic::from_name("chat");
//!     let _unregister = pss.register(topic, Handler::new(|msg| {
//!         println!("{} bytes", msg.payload.len());
//!         Ok(())
//!     }));
//!
//!     let key_id = pss.generate_symmetric_key(topic, &[0x12], true)?;
//!     pss.send_sym(&key_id, topic, b"hello").await?;
//!
//!     pss.stop();
//!     Ok(())
//! }
//! ```

use crate::error::Result;
use crate::forward_cache::ForwardCache;
use crate::keystore::KeyStore;
use crate::message::{Message, MessageCodec, Topic};
use crate::node::config::PssConfig;
use crate::node::handler::{Handler, HandlerRegistry};
use crate::node::stats::{PssStats, StatsCounters};
use crate::outbox::{Forwarder, Outbox, OutboxStats};
use crate::overlay::Overlay;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use pss_crypto::aead::SymmetricKey;
use pss_crypto::{CryptoBackend, DefaultCrypto, PrivateKey, PublicKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{Instant, interval_at};

/// Transport forwarder that records relayed digests after hand-off, so
/// echoes of a message this node already passed on are suppressed.
struct RelayForwarder {
    transport: Arc<dyn Forwarder>,
    fwd_cache: Arc<ForwardCache>,
}

#[async_trait]
impl Forwarder for RelayForwarder {
    async fn forward(&self, message: &Message) -> Result<()> {
        self.transport.forward(message).await?;
        self.fwd_cache.add(message);
        Ok(())
    }
}

/// Dispatcher state shared by every clone of [`Pss`]
pub(crate) struct PssInner {
    pub(crate) config: PssConfig,
    pub(crate) private_key: PrivateKey,
    pub(crate) public_key: PublicKey,
    pub(crate) crypto: Arc<dyn CryptoBackend>,
    pub(crate) overlay: Arc<dyn Overlay>,
    pub(crate) keys: KeyStore,
    pub(crate) fwd_cache: Arc<ForwardCache>,
    pub(crate) outbox: Outbox,
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) codec: MessageCodec,
    pub(crate) stats: StatsCounters,
    pub(crate) running: AtomicBool,
    pub(crate) shutdown: Shutdown,
}

/// Postal Service over Swarm dispatcher
///
/// Cheap to clone; every clone drives the same node.
#[derive(Clone)]
pub struct Pss {
    pub(crate) inner: Arc<PssInner>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Constructors
// ═══════════════════════════════════════════════════════════════════════════

impl Pss {
    /// Create a dispatcher with the default crypto backend.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PssError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn new(
        config: PssConfig,
        private_key: PrivateKey,
        overlay: Arc<dyn Overlay>,
        transport: Arc<dyn Forwarder>,
    ) -> Result<Self> {
        config.validate()?;
        let crypto = Arc::new(DefaultCrypto::new(config.padding_block)?);
        Self::with_crypto(config, private_key, overlay, transport, crypto)
    }

    /// Create a dispatcher over a caller-supplied crypto backend.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PssError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn with_crypto(
        config: PssConfig,
        private_key: PrivateKey,
        overlay: Arc<dyn Overlay>,
        transport: Arc<dyn Forwarder>,
        crypto: Arc<dyn CryptoBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let fwd_cache = Arc::new(ForwardCache::new(config.forward_cache_ttl));
        let relay = Arc::new(RelayForwarder {
            transport,
            fwd_cache: fwd_cache.clone(),
        });
        let outbox = Outbox::with_max_retry_time(
            config.outbox_capacity,
            relay,
            config.outbox_max_retry_time,
        );

        let public_key = private_key.public_key();
        let inner = PssInner {
            keys: KeyStore::new(crypto.clone(), config.sym_key_decrypt_cache_capacity),
            codec: MessageCodec::new(config.max_payload_bytes),
            config,
            private_key,
            public_key,
            crypto,
            overlay,
            fwd_cache,
            outbox,
            handlers: Arc::new(HandlerRegistry::new()),
            stats: StatsCounters::default(),
            running: AtomicBool::new(false),
            shutdown: Shutdown::new(),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════════════════════

impl Pss {
    /// Start the outbox sender loop, the forward-cache sweeper, and the
    /// key-cleaning ticker.
    ///
    /// Idempotent. A stopped dispatcher cannot be restarted. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.shutdown.is_triggered() {
            tracing::warn!("start called on a stopped dispatcher");
            return;
        }
        if inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        inner.outbox.start();
        inner.fwd_cache.clone().spawn_sweeper(inner.shutdown.listener());
        self.spawn_key_cleaner();

        tracing::info!(
            address = %hex::encode(inner.overlay.base_address()),
            key = crate::label(&inner.public_key.key_id()),
            "pss started"
        );
    }

    /// Stop background work. Idempotent.
    pub fn stop(&self) {
        let inner = &self.inner;
        inner.running.store(false, Ordering::SeqCst);
        if inner.shutdown.is_triggered() {
            return;
        }
        inner.shutdown.trigger();
        inner.outbox.stop();
        tracing::info!("pss stopped");
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop)
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn spawn_key_cleaner(&self) {
        let inner = self.inner.clone();
        let mut shutdown = inner.shutdown.listener();
        let period = inner.config.clean_keys_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = shutdown.wait() => break,
                    _ = ticker.tick() => {
                        let removed = inner.keys.clean_keys();
                        tracing::debug!(removed, "periodic key cleaning");
                    }
                }
            }
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Keys and Handlers
// ═══════════════════════════════════════════════════════════════════════════

impl Pss {
    /// Register a handler for `topic`; call the returned closure to remove it.
    pub fn register(
        &self,
        topic: Topic,
        handler: Handler,
    ) -> impl FnOnce() + Send + Sync + 'static {
        self.inner.handlers.register(topic, handler)
    }

    /// Bind a peer's public key to `topic`, returning its key id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PssError::InvalidPeerAddress`] unless the hint is 1
    /// to 32 bytes long.
    pub fn set_peer_public_key(
        &self,
        public_key: &PublicKey,
        topic: Topic,
        peer_hint: &[u8],
    ) -> Result<String> {
        self.inner.keys.set_peer_public_key(public_key, topic, peer_hint)
    }

    /// Generate a symmetric key bound to `(topic, peer_hint)`.
    ///
    /// # Errors
    ///
    /// See [`KeyStore::generate_symmetric_key`].
    pub fn generate_symmetric_key(
        &self,
        topic: Topic,
        peer_hint: &[u8],
        add_to_cache: bool,
    ) -> Result<String> {
        self.inner
            .keys
            .generate_symmetric_key(topic, peer_hint, add_to_cache)
    }

    /// Install symmetric key bytes bound to `(topic, peer_hint)`.
    ///
    /// # Errors
    ///
    /// See [`KeyStore::set_symmetric_key`].
    pub fn set_symmetric_key(
        &self,
        key: &[u8],
        topic: Topic,
        peer_hint: &[u8],
        add_to_cache: bool,
    ) -> Result<String> {
        self.inner
            .keys
            .set_symmetric_key(key, topic, peer_hint, add_to_cache)
    }

    /// Symmetric key material by id
    ///
    /// # Errors
    ///
    /// Returns a crypto error for an unknown id.
    pub fn get_symmetric_key(&self, key_id: &str) -> Result<SymmetricKey> {
        self.inner.keys.symmetric_key(key_id)
    }

    /// Topics and peer hints bound to a public key id
    #[must_use]
    pub fn get_public_key_peers(&self, key_id: &str) -> HashMap<Topic, Vec<u8>> {
        self.inner.keys.public_key_peers(key_id)
    }

    /// Run a key-cleaning sweep now. Returns the number of bindings removed.
    pub fn clean_keys(&self) -> usize {
        self.inner.keys.clean_keys()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Accessors
// ═══════════════════════════════════════════════════════════════════════════

impl Pss {
    /// This node's public key
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.inner.public_key
    }

    /// This node's overlay address
    #[must_use]
    pub fn base_address(&self) -> Vec<u8> {
        self.inner.overlay.base_address().to_vec()
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &PssConfig {
        &self.inner.config
    }

    /// Key store
    #[must_use]
    pub fn key_store(&self) -> &KeyStore {
        &self.inner.keys
    }

    /// Forward cache
    #[must_use]
    pub fn forward_cache(&self) -> &ForwardCache {
        &self.inner.fwd_cache
    }

    /// Dispatcher counters
    #[must_use]
    pub fn stats(&self) -> PssStats {
        self.inner.stats.snapshot()
    }

    /// Outbox counters
    #[must_use]
    pub fn outbox_stats(&self) -> OutboxStats {
        self.inner.outbox.stats()
    }
}

impl std::fmt::Debug for Pss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pss")
            .field("address", &hex::encode(self.inner.overlay.base_address()))
            .field("running", &self.is_running())
            .field("outbox", &self.inner.outbox)
            .finish_non_exhaustive()
    }
}
