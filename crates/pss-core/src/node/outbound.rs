//! Outbound path: seal, stamp, and enqueue.

use crate::ADDRESS_LENGTH;
use crate::error::{PssError, Result};
use crate::message::{Message, MessageFlags, Topic, unix_now};
use crate::node::pss::Pss;
use crate::node::stats::StatsCounters;
use pss_crypto::{PublicKey, WrapParams};

/// Key used to seal an outbound payload
#[derive(Debug, Clone, Copy)]
pub enum KeyMaterial<'a> {
    /// 32-byte AES-256-GCM key
    Symmetric(&'a [u8]),
    /// Recipient public key for ECIES
    Asymmetric(&'a PublicKey),
}

impl KeyMaterial<'_> {
    /// True for [`KeyMaterial::Symmetric`]
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        matches!(self, KeyMaterial::Symmetric(_))
    }
}

fn check_recipient(to: &[u8]) -> Result<()> {
    if to.len() > ADDRESS_LENGTH {
        return Err(PssError::InvalidPeerAddress(to.len()));
    }
    Ok(())
}

impl Pss {
    /// Seal `payload` with `key`, sign it with the node key, and enqueue it
    /// for `to`.
    ///
    /// `expiry` defaults to now plus the configured message TTL.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::InvalidPeerAddress`] for a hint over 32 bytes, a
    /// crypto error if sealing fails, a codec error if the sealed message is
    /// too large, or [`PssError::OutboxFull`].
    pub async fn send(
        &self,
        to: &[u8],
        topic: Topic,
        payload: &[u8],
        key: KeyMaterial<'_>,
        expiry: Option<u32>,
    ) -> Result<()> {
        check_recipient(to)?;

        let signer = &self.inner.private_key;
        let params = match key {
            KeyMaterial::Symmetric(bytes) => WrapParams::symmetric(bytes),
            KeyMaterial::Asymmetric(public) => WrapParams::asymmetric(public),
        }
        .signed_by(signer);
        let envelope = self.inner.crypto.wrap(payload, &params)?;

        let flags = if key.is_symmetric() {
            MessageFlags::symmetric()
        } else {
            MessageFlags::asymmetric()
        };
        let message = Message {
            to: to.to_vec(),
            flags,
            expiry: self.expiry_or_default(expiry),
            topic,
            payload: envelope,
        };
        self.enqueue_outbound(message).await
    }

    /// Enqueue a payload the caller already encrypted.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::InvalidPeerAddress`], a codec error, or
    /// [`PssError::OutboxFull`].
    pub async fn send_raw(
        &self,
        to: &[u8],
        topic: Topic,
        payload: &[u8],
        expiry: Option<u32>,
    ) -> Result<()> {
        check_recipient(to)?;
        let message = Message {
            to: to.to_vec(),
            flags: MessageFlags::raw(),
            expiry: self.expiry_or_default(expiry),
            topic,
            payload: payload.to_vec(),
        };
        self.enqueue_outbound(message).await
    }

    /// Send with a stored symmetric key to the peer bound to it on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::UnknownKey`] if the key has no binding on `topic`,
    /// plus everything [`send`](Self::send) returns.
    pub async fn send_sym(&self, key_id: &str, topic: Topic, payload: &[u8]) -> Result<()> {
        let binding = self
            .inner
            .keys
            .symmetric_binding(key_id, topic)
            .ok_or_else(|| PssError::UnknownKey(format!("{key_id} on {topic}")))?;
        let key = self.inner.keys.symmetric_key(key_id)?;
        self.send(
            &binding.peer_hint,
            topic,
            payload,
            KeyMaterial::Symmetric(key.as_bytes()),
            None,
        )
        .await
    }

    /// Send to the peer whose public key id is bound on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::UnknownKey`] if the key has no binding on `topic`,
    /// plus everything [`send`](Self::send) returns.
    pub async fn send_asym(&self, pub_key_id: &str, topic: Topic, payload: &[u8]) -> Result<()> {
        let peer_hint = self
            .inner
            .keys
            .public_key_binding(pub_key_id, topic)
            .ok_or_else(|| PssError::UnknownKey(format!("{pub_key_id} on {topic}")))?;
        let public = PublicKey::from_key_id(pub_key_id)?;
        self.send(
            &peer_hint,
            topic,
            payload,
            KeyMaterial::Asymmetric(&public),
            None,
        )
        .await
    }

    fn expiry_or_default(&self, expiry: Option<u32>) -> u32 {
        expiry.unwrap_or_else(|| {
            let ttl = u32::try_from(self.inner.config.default_message_ttl.as_secs()).unwrap_or(u32::MAX);
            unix_now().saturating_add(ttl)
        })
    }

    async fn enqueue_outbound(&self, message: Message) -> Result<()> {
        let inner = &self.inner;
        inner.codec.check(&message)?;
        inner.fwd_cache.add(&message);

        let topic = message.topic;
        match inner.outbox.enqueue(message).await {
            Ok(()) => {
                StatsCounters::bump(&inner.stats.sent);
                tracing::trace!(%topic, "message queued");
                Ok(())
            }
            Err(e) => {
                if matches!(e, PssError::OutboxFull) {
                    StatsCounters::bump(&inner.stats.outbox_full);
                }
                tracing::debug!(%topic, error = %e, "send rejected");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageCodec;
    use crate::node::PssConfig;
    use crate::node::test_support::{Solo, recording_transport};
    use pss_crypto::{CryptoError, PrivateKey, UnwrapParams};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn node(config: PssConfig) -> (Pss, Arc<Mutex<Vec<Message>>>) {
        let (transport, sent) = recording_transport();
        let pss = Pss::new(
            config,
            PrivateKey::generate(),
            Arc::new(Solo::new([0x22; 32])),
            transport,
        )
        .unwrap();
        (pss, sent)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_symmetric_reaches_transport() {
        let (pss, sent) = node(PssConfig::default());
        pss.start();
        let topic = Topic::from_name("greet");
        let key: Vec<u8> = (1..=32).collect();

        pss.send(&[0xAB], topic, b"hello", KeyMaterial::Symmetric(&key), Some(4_000_000_000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let msg = &sent[0];
        assert_eq!(msg.to, vec![0xAB]);
        assert_eq!(msg.flags, MessageFlags::symmetric());
        assert_eq!(msg.expiry, 4_000_000_000);
        assert!(pss.forward_cache().check(msg));

        let opened = pss
            .inner
            .crypto
            .unwrap(&msg.payload, &UnwrapParams::symmetric(&key))
            .unwrap();
        assert_eq!(opened.payload().unwrap(), b"hello");
        assert_eq!(opened.sender().unwrap(), Some(pss.public_key()));
        assert_eq!(pss.stats().sent, 1);
    }

    #[tokio::test]
    async fn test_recipient_too_long() {
        let (pss, _sent) = node(PssConfig::default());
        let err = pss
            .send_raw(&[0u8; 33], Topic::from_name("t"), b"x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PssError::InvalidPeerAddress(33)));
    }

    #[tokio::test]
    async fn test_invalid_symmetric_key_surfaces() {
        let (pss, _sent) = node(PssConfig::default());
        let err = pss
            .send(&[], Topic::from_name("t"), b"x", KeyMaterial::Symmetric(&[0u8; 32]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PssError::Crypto(CryptoError::InvalidSymKey)));
    }

    #[tokio::test]
    async fn test_default_expiry_and_raw_flag() {
        let (pss, _sent) = node(PssConfig {
            default_message_ttl: Duration::from_secs(300),
            ..PssConfig::default()
        });
        let before = unix_now();
        pss.send_raw(&[1], Topic::from_name("t"), b"opaque", None)
            .await
            .unwrap();

        let expected = pss.expiry_or_default(None);
        assert!(expected >= before + 300);
        assert_eq!(pss.outbox_stats().enqueued, 1);
    }

    #[tokio::test]
    async fn test_payload_bound_checked_before_enqueue() {
        let (pss, _sent) = node(PssConfig {
            max_payload_bytes: 64,
            ..PssConfig::default()
        });
        let err = pss
            .send_raw(&[], Topic::from_name("t"), &[0u8; 65], None)
            .await
            .unwrap_err();
        assert!(matches!(err, PssError::Codec(_)));
        assert_eq!(pss.outbox_stats().enqueued, 0);
        assert_eq!(MessageCodec::new(64).max_payload(), 64);
    }

    #[tokio::test]
    async fn test_outbox_full_surfaces() {
        let (pss, _sent) = node(PssConfig {
            outbox_capacity: 1,
            ..PssConfig::default()
        });
        let topic = Topic::from_name("t");
        pss.send_raw(&[], topic, b"one", None).await.unwrap();
        let err = pss.send_raw(&[], topic, b"two", None).await.unwrap_err();
        assert!(matches!(err, PssError::OutboxFull));
        assert_eq!(pss.stats().outbox_full, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_sym_and_asym_use_bindings() {
        let (pss, sent) = node(PssConfig::default());
        pss.start();
        let topic = Topic::from_name("chat");

        let key_id = pss.generate_symmetric_key(topic, &[0x42], true).unwrap();
        pss.send_sym(&key_id, topic, b"sym").await.unwrap();

        let peer = PrivateKey::generate();
        let pub_id = pss
            .set_peer_public_key(&peer.public_key(), topic, &[0x43, 0x44])
            .unwrap();
        pss.send_asym(&pub_id, topic, b"asym").await.unwrap();

        assert!(matches!(
            pss.send_sym(&key_id, Topic::from_name("other"), b"x").await,
            Err(PssError::UnknownKey(_))
        ));
        assert!(matches!(
            pss.send_asym(&pub_id, Topic::from_name("other"), b"x").await,
            Err(PssError::UnknownKey(_))
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let sym = sent.iter().find(|m| m.flags.symmetric).unwrap();
        assert_eq!(sym.to, vec![0x42]);
        let asym = sent.iter().find(|m| !m.flags.symmetric).unwrap();
        assert_eq!(asym.to, vec![0x43, 0x44]);

        let opened = pss
            .inner
            .crypto
            .unwrap(&asym.payload, &UnwrapParams::asymmetric(&peer))
            .unwrap();
        assert_eq!(opened.payload().unwrap(), b"asym");
    }
}
