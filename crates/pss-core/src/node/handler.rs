//! Topic handler registry.

use crate::error::Result;
use crate::message::Topic;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Capabilities a handler opts into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerCaps {
    /// Accept raw messages (payload delivered verbatim, no decryption)
    pub raw: bool,
    /// Accept messages for which this node is only in the neighbourhood of
    /// the recipient hint
    pub prox: bool,
}

/// A message delivered to a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on
    pub topic: Topic,
    /// Decrypted payload, or the raw bytes for raw messages
    pub payload: Vec<u8>,
    /// Peer hint bound to the key that opened the message
    pub peer_hint: Option<Vec<u8>>,
    /// Sealed with ECIES
    pub asymmetric: bool,
    /// Symmetric key id, or the signer's public key id
    pub key_id: Option<String>,
    /// Raw message
    pub raw: bool,
}

type Callback = dyn Fn(&InboundMessage) -> Result<()> + Send + Sync;

/// A callback plus its capabilities
pub struct Handler {
    callback: Box<Callback>,
    caps: HandlerCaps,
}

impl Handler {
    /// Wrap a callback with no extra capabilities.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&InboundMessage) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
            caps: HandlerCaps::default(),
        }
    }

    /// Opt into raw messages.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.caps.raw = true;
        self
    }

    /// Opt into neighbourhood delivery.
    #[must_use]
    pub fn proximity(mut self) -> Self {
        self.caps.prox = true;
        self
    }

    /// Capabilities
    #[must_use]
    pub fn caps(&self) -> HandlerCaps {
        self.caps
    }

    pub(crate) fn call(&self, message: &InboundMessage) -> Result<()> {
        (self.callback)(message)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("caps", &self.caps).finish()
    }
}

/// Handlers keyed by topic
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<Topic, Vec<Arc<Handler>>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` for `topic`.
    ///
    /// The returned closure removes exactly this registration. It does
    /// nothing if the registry is gone or the handler was already removed.
    pub fn register(
        self: &Arc<Self>,
        topic: Topic,
        handler: Handler,
    ) -> impl FnOnce() + Send + Sync + 'static {
        let handler = Arc::new(handler);
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push(handler.clone());
        tracing::debug!(%topic, caps = ?handler.caps(), "registered handler");

        let registry: Weak<Self> = Arc::downgrade(self);
        move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(topic, &handler);
            }
        }
    }

    fn remove(&self, topic: Topic, handler: &Arc<Handler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = handlers.get_mut(&topic) {
            list.retain(|h| !Arc::ptr_eq(h, handler));
            if list.is_empty() {
                handlers.remove(&topic);
            }
            tracing::debug!(%topic, "unregistered handler");
        }
    }

    /// Snapshot of the handlers for `topic`
    #[must_use]
    pub fn handlers(&self, topic: Topic) -> Vec<Arc<Handler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Union of the capabilities of every handler for `topic`, or `None` if
    /// the topic has no handlers.
    #[must_use]
    pub fn topic_caps(&self, topic: Topic) -> Option<HandlerCaps> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let list = handlers.get(&topic)?;
        Some(list.iter().fold(HandlerCaps::default(), |acc, h| HandlerCaps {
            raw: acc.raw || h.caps.raw,
            prox: acc.prox || h.caps.prox,
        }))
    }

    /// Number of handlers for `topic`
    #[must_use]
    pub fn count(&self, topic: Topic) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, Vec::len)
    }
}
