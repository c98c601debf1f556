//! Inbound path: filter, decide, open, deliver, relay.
//!
//! ```text
//! handle(msg)
//!   ├─ expired? ───────────────────────────────▶ Expired
//!   ├─ in forward cache? ──────────────────────▶ Duplicate
//!   ├─ record digest
//!   ├─ possible recipient?
//!   │    no ──▶ relay ─────────────────────────▶ ForwardedOnly
//!   │    yes ─▶ open (raw: verbatim)
//!   │            fail ─▶ relay ────────────────▶ UndecryptableAndForwarded
//!   │            ok ───▶ handlers, maybe relay ▶ LocallyDelivered[AndForwarded]
//!   └─ relay rejected by the outbox ───────────▶ UndecryptableAndDropped
//! ```
//!
//! Nothing here returns an error to the transport. Failures become counters
//! and tracing events.

use crate::ADDRESS_LENGTH;
use crate::error::{PssError, Result};
use crate::message::{Message, unix_now};
use crate::node::handler::{HandlerCaps, InboundMessage};
use crate::node::pss::Pss;
use crate::node::stats::StatsCounters;
use crate::overlay::{PSS_CAPABILITY, is_prefix_of, proximity_order};

/// Terminal state of one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Expiry was in the past
    Expired,
    /// Already seen within the forward-cache window
    Duplicate,
    /// Opened and delivered; not relayed
    LocallyDelivered,
    /// Not for this node; relayed
    ForwardedOnly,
    /// Opened, delivered, and relayed to the rest of the neighbourhood
    LocallyDeliveredAndForwarded,
    /// Possibly for this node but no key opened it; relayed
    UndecryptableAndForwarded,
    /// Neither delivered nor relayed
    UndecryptableAndDropped,
}

impl Disposition {
    /// True if handlers saw the message
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            Disposition::LocallyDelivered | Disposition::LocallyDeliveredAndForwarded
        )
    }

    /// True if the message went into the outbox for relay
    #[must_use]
    pub fn is_forwarded(&self) -> bool {
        matches!(
            self,
            Disposition::ForwardedOnly
                | Disposition::LocallyDeliveredAndForwarded
                | Disposition::UndecryptableAndForwarded
        )
    }
}

/// Why this node considers itself a possible recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecipientMatch {
    /// Hint is a prefix of the local address
    Address,
    /// Overlay says no PSS peer is closer to the hint
    Closest,
    /// Within the neighbourhood depth, on behalf of proximity handlers
    Proximity,
}

impl Pss {
    /// Process a message received from the transport.
    ///
    /// The message itself is never modified. The returned [`Disposition`]
    /// is informational.
    pub async fn handle(&self, message: &Message) -> Disposition {
        let inner = &self.inner;
        let topic = message.topic;
        StatsCounters::bump(&inner.stats.received);

        if message.is_expired_at(unix_now()) {
            StatsCounters::bump(&inner.stats.expired);
            tracing::debug!(
                %topic,
                expiry = message.expiry,
                to = %hex::encode(&message.to),
                "dropping expired message"
            );
            return Disposition::Expired;
        }
        if let Err(error) = inner.fwd_cache.admit(message) {
            StatsCounters::bump(&inner.stats.duplicates);
            tracing::trace!(%topic, to = %hex::encode(&message.to), %error, "forward cache hit");
            return Disposition::Duplicate;
        }

        let caps = inner.handlers.topic_caps(topic);
        if message.flags.raw && caps.is_some_and(|c| !c.raw) {
            StatsCounters::bump(&inner.stats.dropped);
            tracing::warn!(%topic, "no raw handler for raw message");
            return Disposition::UndecryptableAndDropped;
        }

        let Some(matched) = self.recipient_match(message, caps) else {
            tracing::trace!(%topic, to = %hex::encode(&message.to), "not a recipient, relaying");
            return if self.relay(message).await {
                Disposition::ForwardedOnly
            } else {
                StatsCounters::bump(&inner.stats.dropped);
                Disposition::UndecryptableAndDropped
            };
        };

        let opened = match self.open(message) {
            Ok(opened) => opened,
            Err(e) => {
                StatsCounters::bump(&inner.stats.undecryptable);
                tracing::trace!(%topic, ?matched, error = %e, "could not open message");
                return if self.relay(message).await {
                    Disposition::UndecryptableAndForwarded
                } else {
                    StatsCounters::bump(&inner.stats.dropped);
                    Disposition::UndecryptableAndDropped
                };
            }
        };

        let proximity_only = matched == RecipientMatch::Proximity;
        let invoked = self.deliver(&opened, proximity_only);
        StatsCounters::bump(&inner.stats.delivered);
        tracing::debug!(%topic, ?matched, invoked, "delivered message");

        let neighbourhood = message.to.len() < ADDRESS_LENGTH || proximity_only;
        if neighbourhood && self.relay(message).await {
            Disposition::LocallyDeliveredAndForwarded
        } else {
            Disposition::LocallyDelivered
        }
    }

    fn recipient_match(
        &self,
        message: &Message,
        caps: Option<HandlerCaps>,
    ) -> Option<RecipientMatch> {
        let overlay = &self.inner.overlay;
        let local = overlay.base_address();

        if is_prefix_of(&message.to, local) {
            return Some(RecipientMatch::Address);
        }
        if overlay.is_closest_to(&message.to, PSS_CAPABILITY) {
            return Some(RecipientMatch::Closest);
        }
        if caps.is_some_and(|c| c.prox) {
            let po = proximity_order(local, &message.to);
            let depth = overlay.neighbourhood_depth();
            tracing::trace!(po, depth, "proximity check");
            if po >= depth {
                return Some(RecipientMatch::Proximity);
            }
        }
        None
    }

    fn open(&self, message: &Message) -> Result<InboundMessage> {
        let inner = &self.inner;
        if message.flags.raw {
            return Ok(InboundMessage {
                topic: message.topic,
                payload: message.payload.clone(),
                peer_hint: None,
                asymmetric: false,
                key_id: None,
                raw: true,
            });
        }

        let decrypted = if message.flags.symmetric {
            inner.keys.process_inbound_symmetric(message)?
        } else {
            inner
                .keys
                .process_inbound_asymmetric(message, &inner.private_key)?
        };
        Ok(InboundMessage {
            topic: message.topic,
            payload: decrypted.payload,
            peer_hint: decrypted.peer_hint,
            asymmetric: decrypted.asymmetric,
            key_id: decrypted.key_id,
            raw: false,
        })
    }

    /// Run every eligible handler; returns how many were invoked.
    fn deliver(&self, message: &InboundMessage, proximity_only: bool) -> usize {
        let inner = &self.inner;
        let mut invoked = 0;

        for handler in inner.handlers.handlers(message.topic) {
            let caps = handler.caps();
            if message.raw && !caps.raw {
                continue;
            }
            if proximity_only && !caps.prox {
                continue;
            }
            invoked += 1;
            if let Err(e) = handler.call(message) {
                StatsCounters::bump(&inner.stats.handler_errors);
                tracing::warn!(topic = %message.topic, error = %e, "handler failed");
            }
        }
        invoked
    }

    async fn relay(&self, message: &Message) -> bool {
        let inner = &self.inner;
        match inner.outbox.enqueue(message.clone()).await {
            Ok(()) => {
                StatsCounters::bump(&inner.stats.relayed);
                true
            }
            Err(e) => {
                if matches!(e, PssError::OutboxFull) {
                    StatsCounters::bump(&inner.stats.outbox_full);
                }
                tracing::warn!(topic = %message.topic, error = %e, "relay rejected");
                false
            }
        }
    }
}
