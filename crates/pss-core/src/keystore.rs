//! Key store: topic-scoped key bindings and the symmetric decrypt cache.
//!
//! Key material itself lives in the [`CryptoBackend`]; this module only tracks
//! which key ids are bound to which `(topic, peer hint)` pairs and which
//! symmetric keys are worth trying on inbound messages. All three structures
//! share one reader/writer lock.

use crate::error::{PssError, Result};
use crate::message::{Message, Topic};
use crate::{ADDRESS_LENGTH, label};
use pss_crypto::aead::SymmetricKey;
use pss_crypto::{CryptoBackend, PrivateKey, PublicKey, UnwrapParams};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Binding of a symmetric key to a peer on one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Overlay address prefix used when sending with this key
    pub peer_hint: Vec<u8>,
    /// Exempt from [`KeyStore::clean_keys`]
    pub protected: bool,
}

/// Result of opening an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    /// User plaintext
    pub payload: Vec<u8>,
    /// Symmetric key id, or the signer's public key id for signed asymmetric messages
    pub key_id: Option<String>,
    /// Peer hint bound to `(key_id, topic)`, if any
    pub peer_hint: Option<Vec<u8>>,
    /// True if the message was sealed with ECIES
    pub asymmetric: bool,
}

/// Fixed-capacity MRU ring of symmetric key ids.
///
/// The cursor only moves forward; slot `q` lives at `slots[q % cap]`. The
/// live window is positions `cursor` (most recent) down to
/// `max(cursor - cap + 1, 1)`.
#[derive(Debug)]
struct DecryptCache {
    slots: Vec<Option<String>>,
    cursor: usize,
}

impl DecryptCache {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            cursor: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn window(&self) -> impl Iterator<Item = usize> + '_ {
        let low = (self.cursor + 1).saturating_sub(self.capacity()).max(1);
        (low..=self.cursor).rev()
    }

    fn ids(&self) -> Vec<String> {
        let cap = self.capacity();
        self.window()
            .filter_map(|q| self.slots[q % cap].clone())
            .collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        let cap = self.capacity();
        self.window()
            .find(|&q| self.slots[q % cap].as_deref() == Some(id))
    }

    fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    fn head(&self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.slots[self.cursor % self.capacity()].as_deref()
    }

    fn push(&mut self, id: String) {
        self.cursor += 1;
        let cap = self.capacity();
        self.slots[self.cursor % cap] = Some(id);
    }

    /// Move `id` to the head, shifting the more recent entries down one.
    /// Ids outside the window are pushed.
    fn promote(&mut self, id: &str) {
        let Some(pos) = self.position(id) else {
            self.push(id.to_string());
            return;
        };
        if pos == self.cursor {
            return;
        }
        let cap = self.capacity();
        for q in pos..self.cursor {
            self.slots[q % cap] = self.slots[(q + 1) % cap].take();
        }
        self.slots[self.cursor % cap] = Some(id.to_string());
    }
}

#[derive(Debug)]
struct KeyState {
    pub_key_pool: HashMap<String, HashMap<Topic, Vec<u8>>>,
    sym_key_pool: HashMap<String, HashMap<Topic, PeerRecord>>,
    decrypt_cache: DecryptCache,
}

/// Topic-scoped key bindings over a [`CryptoBackend`]
pub struct KeyStore {
    crypto: Arc<dyn CryptoBackend>,
    state: RwLock<KeyState>,
}

fn check_peer_hint(hint: &[u8], allow_empty: bool) -> Result<()> {
    if hint.len() > ADDRESS_LENGTH || (hint.is_empty() && !allow_empty) {
        return Err(PssError::InvalidPeerAddress(hint.len()));
    }
    Ok(())
}

impl KeyStore {
    /// Create a store whose decrypt cache holds `decrypt_cache_capacity` ids.
    #[must_use]
    pub fn new(crypto: Arc<dyn CryptoBackend>, decrypt_cache_capacity: usize) -> Self {
        Self {
            crypto,
            state: RwLock::new(KeyState {
                pub_key_pool: HashMap::new(),
                sym_key_pool: HashMap::new(),
                decrypt_cache: DecryptCache::new(decrypt_cache_capacity),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, KeyState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, KeyState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Underlying crypto backend
    #[must_use]
    pub fn crypto(&self) -> &Arc<dyn CryptoBackend> {
        &self.crypto
    }

    /// Bind a peer's public key to `topic`, returning its key id.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::InvalidPeerAddress`] unless the hint is 1 to 32
    /// bytes long.
    pub fn set_peer_public_key(
        &self,
        public_key: &PublicKey,
        topic: Topic,
        peer_hint: &[u8],
    ) -> Result<String> {
        check_peer_hint(peer_hint, false)?;
        let key_id = format!("0x{}", hex::encode(self.crypto.serialize_public_key(public_key)));

        self.write()
            .pub_key_pool
            .entry(key_id.clone())
            .or_default()
            .insert(topic, peer_hint.to_vec());
        tracing::debug!(key = label(&key_id), %topic, "bound peer public key");
        Ok(key_id)
    }

    /// Generate a symmetric key, bind it unprotected, and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::InvalidPeerAddress`] for a hint over 32 bytes, or
    /// a crypto error if the CSPRNG fails.
    pub fn generate_symmetric_key(
        &self,
        topic: Topic,
        peer_hint: &[u8],
        add_to_cache: bool,
    ) -> Result<String> {
        check_peer_hint(peer_hint, true)?;
        let key_id = self.crypto.generate_sym_key()?;
        self.bind_symmetric(&key_id, topic, peer_hint, false, add_to_cache);
        Ok(key_id)
    }

    /// Store caller-supplied symmetric key bytes, bind them protected, and
    /// return the new id.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::InvalidPeerAddress`] unless the hint is 1 to 32
    /// bytes long, or a crypto error for invalid key material.
    pub fn set_symmetric_key(
        &self,
        key: &[u8],
        topic: Topic,
        peer_hint: &[u8],
        add_to_cache: bool,
    ) -> Result<String> {
        check_peer_hint(peer_hint, false)?;
        let key_id = self.crypto.add_sym_key(key)?;
        self.bind_symmetric(&key_id, topic, peer_hint, true, add_to_cache);
        Ok(key_id)
    }

    fn bind_symmetric(
        &self,
        key_id: &str,
        topic: Topic,
        peer_hint: &[u8],
        protected: bool,
        add_to_cache: bool,
    ) {
        let mut state = self.write();
        state.sym_key_pool.entry(key_id.to_string()).or_default().insert(
            topic,
            PeerRecord {
                peer_hint: peer_hint.to_vec(),
                protected,
            },
        );
        if add_to_cache {
            state.decrypt_cache.promote(key_id);
        }
        tracing::debug!(key = label(key_id), %topic, protected, add_to_cache, "bound symmetric key");
    }

    /// Symmetric key material by id
    ///
    /// # Errors
    ///
    /// Returns a crypto error if the backend does not know the id.
    pub fn symmetric_key(&self, key_id: &str) -> Result<SymmetricKey> {
        Ok(self.crypto.get_sym_key(key_id)?)
    }

    /// Binding of a symmetric key on `topic`
    #[must_use]
    pub fn symmetric_binding(&self, key_id: &str, topic: Topic) -> Option<PeerRecord> {
        self.read()
            .sym_key_pool
            .get(key_id)
            .and_then(|topics| topics.get(&topic))
            .cloned()
    }

    /// Peer hint bound to a public key on `topic`
    #[must_use]
    pub fn public_key_binding(&self, key_id: &str, topic: Topic) -> Option<Vec<u8>> {
        self.read()
            .pub_key_pool
            .get(key_id)
            .and_then(|topics| topics.get(&topic))
            .cloned()
    }

    /// Every topic and peer hint bound to a public key
    #[must_use]
    pub fn public_key_peers(&self, key_id: &str) -> HashMap<Topic, Vec<u8>> {
        self.read()
            .pub_key_pool
            .get(key_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `(key id, topic)` symmetric bindings
    #[must_use]
    pub fn symmetric_binding_count(&self) -> usize {
        self.read().sym_key_pool.values().map(HashMap::len).sum()
    }

    /// Decrypt cache contents, most recent first
    #[must_use]
    pub fn decrypt_cache_ids(&self) -> Vec<String> {
        self.read().decrypt_cache.ids()
    }

    /// Most recently successful symmetric key id
    #[must_use]
    pub fn decrypt_cache_head(&self) -> Option<String> {
        self.read().decrypt_cache.head().map(str::to_string)
    }

    /// Try every cached symmetric key on `message`, most recent first.
    ///
    /// The key that opens the message moves to the head of the cache.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::NoDecryptKey`] if no cached key opens the message,
    /// or the envelope error if the opened envelope is malformed.
    pub fn process_inbound_symmetric(&self, message: &Message) -> Result<Decrypted> {
        let candidates = self.decrypt_cache_ids();

        for key_id in candidates {
            let key = match self.crypto.get_sym_key(&key_id) {
                Ok(key) => key,
                Err(e) => {
                    tracing::trace!(key = label(&key_id), error = %e, "cached key missing from backend");
                    continue;
                }
            };
            let Ok(received) = self
                .crypto
                .unwrap(&message.payload, &UnwrapParams::symmetric(key.as_bytes()))
            else {
                continue;
            };

            let payload = received.payload()?.to_vec();
            let mut state = self.write();
            state.decrypt_cache.promote(&key_id);
            let peer_hint = state
                .sym_key_pool
                .get(&key_id)
                .and_then(|topics| topics.get(&message.topic))
                .map(|record| record.peer_hint.clone());
            drop(state);

            tracing::trace!(key = label(&key_id), topic = %message.topic, "symmetric decrypt hit");
            return Ok(Decrypted {
                payload,
                key_id: Some(key_id),
                peer_hint,
                asymmetric: false,
            });
        }

        Err(PssError::NoDecryptKey)
    }

    /// Open an ECIES-sealed message with the node key.
    ///
    /// # Errors
    ///
    /// Returns the crypto error from unwrapping or from the envelope.
    /// [`pss_crypto::CryptoError::InvalidPublicKey`] means the message was
    /// not addressed to this node.
    pub fn process_inbound_asymmetric(
        &self,
        message: &Message,
        node_key: &PrivateKey,
    ) -> Result<Decrypted> {
        let received = self
            .crypto
            .unwrap(&message.payload, &UnwrapParams::asymmetric(node_key))?;
        let payload = received.payload()?.to_vec();
        let key_id = received
            .sender()?
            .map(|sender| format!("0x{}", hex::encode(self.crypto.serialize_public_key(sender))));
        let peer_hint = key_id
            .as_deref()
            .and_then(|id| self.public_key_binding(id, message.topic));

        Ok(Decrypted {
            payload,
            key_id,
            peer_hint,
            asymmetric: true,
        })
    }

    /// Drop every symmetric binding that is neither protected nor in the
    /// decrypt cache window. Returns the number of bindings removed.
    ///
    /// Key material stays in the backend.
    pub fn clean_keys(&self) -> usize {
        let mut guard = self.write();
        let state = &mut *guard;
        let cache = &state.decrypt_cache;
        let mut removed = 0;

        state.sym_key_pool.retain(|key_id, topics| {
            let cached = cache.contains(key_id);
            let before = topics.len();
            topics.retain(|_, record| record.protected || cached);
            removed += before - topics.len();
            !topics.is_empty()
        });

        if removed > 0 {
            tracing::debug!(removed, "cleaned symmetric key bindings");
        }
        removed
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("KeyStore")
            .field("public_keys", &state.pub_key_pool.len())
            .field("symmetric_keys", &state.sym_key_pool.len())
            .field("decrypt_cache_capacity", &state.decrypt_cache.capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageFlags;
    use pss_crypto::{CryptoError, DefaultCrypto, WrapParams};

    fn store(capacity: usize) -> KeyStore {
        KeyStore::new(Arc::new(DefaultCrypto::default()), capacity)
    }

    fn sealed_with(store: &KeyStore, key_id: &str, topic: Topic, text: &[u8]) -> Message {
        let key = store.symmetric_key(key_id).unwrap();
        let payload = store
            .crypto()
            .wrap(text, &WrapParams::symmetric(key.as_bytes()))
            .unwrap();
        Message {
            to: vec![],
            flags: MessageFlags::symmetric(),
            expiry: u32::MAX,
            topic,
            payload,
        }
    }

    // ========================================================================
    // Decrypt cache ring
    // ========================================================================

    #[test]
    fn test_ring_push_and_wrap() {
        let mut ring = DecryptCache::new(3);
        assert!(ring.ids().is_empty());
        assert_eq!(ring.head(), None);

        for id in ["a", "b", "c", "d"] {
            ring.push(id.into());
        }
        assert_eq!(ring.ids(), vec!["d", "c", "b"]);
        assert!(!ring.contains("a"));
        assert_eq!(ring.head(), Some("d"));
    }

    #[test]
    fn test_ring_promote_from_middle() {
        let mut ring = DecryptCache::new(4);
        for id in ["k1", "k2", "k3", "k4", "k5"] {
            ring.push(id.into());
        }
        ring.promote("k3");
        assert_eq!(ring.ids(), vec!["k3", "k5", "k4", "k2"]);
        assert_eq!(ring.cursor, 5);
    }

    #[test]
    fn test_ring_promote_head_and_missing() {
        let mut ring = DecryptCache::new(2);
        ring.push("a".into());
        ring.promote("a");
        assert_eq!(ring.ids(), vec!["a"]);

        ring.promote("b");
        assert_eq!(ring.ids(), vec!["b", "a"]);
        ring.promote("a");
        assert_eq!(ring.ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_ring_partial_fill_promote() {
        let mut ring = DecryptCache::new(8);
        for id in ["a", "b", "c"] {
            ring.push(id.into());
        }
        ring.promote("a");
        assert_eq!(ring.ids(), vec!["a", "c", "b"]);
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    #[test]
    fn test_peer_hint_validation() {
        let ks = store(4);
        let topic = Topic::from_name("t");
        let public = PrivateKey::generate().public_key();

        assert!(matches!(
            ks.set_peer_public_key(&public, topic, &[]),
            Err(PssError::InvalidPeerAddress(0))
        ));
        assert!(matches!(
            ks.set_peer_public_key(&public, topic, &[0u8; 33]),
            Err(PssError::InvalidPeerAddress(33))
        ));
        assert!(matches!(
            ks.set_symmetric_key(&[7u8; 32], topic, &[0u8; 33], false),
            Err(PssError::InvalidPeerAddress(33))
        ));
        assert!(ks.generate_symmetric_key(topic, &[], false).is_ok());
        assert!(ks.set_peer_public_key(&public, topic, &[0u8; 32]).is_ok());
    }

    #[test]
    fn test_public_key_binding() {
        let ks = store(4);
        let public = PrivateKey::generate().public_key();
        let a = Topic::from_name("a");
        let b = Topic::from_name("b");

        let id = ks.set_peer_public_key(&public, a, &[1, 2]).unwrap();
        assert_eq!(id, public.key_id());
        ks.set_peer_public_key(&public, b, &[3]).unwrap();

        let peers = ks.public_key_peers(&id);
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[&a], vec![1, 2]);
        assert_eq!(ks.public_key_binding(&id, b), Some(vec![3]));
        assert!(ks.public_key_peers("0xunknown").is_empty());
    }

    #[test]
    fn test_invalid_symmetric_key() {
        let ks = store(4);
        let err = ks
            .set_symmetric_key(&[0u8; 32], Topic::from_name("t"), &[1], false)
            .unwrap_err();
        assert!(matches!(err, PssError::Crypto(CryptoError::InvalidSymKey)));
        assert_eq!(ks.symmetric_binding_count(), 0);
    }

    #[test]
    fn test_set_is_protected_generate_is_not() {
        let ks = store(4);
        let topic = Topic::from_name("t");
        let set = ks.set_symmetric_key(&[9u8; 32], topic, &[1], false).unwrap();
        let generated = ks.generate_symmetric_key(topic, &[1], false).unwrap();

        assert!(ks.symmetric_binding(&set, topic).unwrap().protected);
        assert!(!ks.symmetric_binding(&generated, topic).unwrap().protected);
    }

    // ========================================================================
    // Inbound processing
    // ========================================================================

    #[test]
    fn test_symmetric_hit_promotes_key() {
        let ks = store(4);
        let topic = Topic::from_name("greet");
        let ids: Vec<String> = (0..5)
            .map(|_| ks.generate_symmetric_key(topic, &[0xAA], true).unwrap())
            .collect();

        let msg = sealed_with(&ks, &ids[2], topic, b"hello");
        let opened = ks.process_inbound_symmetric(&msg).unwrap();

        assert_eq!(opened.payload, b"hello");
        assert_eq!(opened.key_id.as_deref(), Some(ids[2].as_str()));
        assert_eq!(opened.peer_hint, Some(vec![0xAA]));
        assert!(!opened.asymmetric);
        assert_eq!(ks.decrypt_cache_head().as_deref(), Some(ids[2].as_str()));
        assert_eq!(
            ks.decrypt_cache_ids(),
            vec![ids[2].clone(), ids[4].clone(), ids[3].clone(), ids[1].clone()]
        );

        assert_eq!(ks.clean_keys(), 1);
        assert!(ks.symmetric_binding(&ids[0], topic).is_none());
        assert!(ks.symmetric_binding(&ids[1], topic).is_some());
    }

    #[test]
    fn test_symmetric_miss() {
        let ks = store(4);
        let topic = Topic::from_name("t");
        let uncached = ks.generate_symmetric_key(topic, &[1], false).unwrap();
        ks.generate_symmetric_key(topic, &[1], true).unwrap();

        let msg = sealed_with(&ks, &uncached, topic, b"secret");
        assert!(matches!(
            ks.process_inbound_symmetric(&msg),
            Err(PssError::NoDecryptKey)
        ));
    }

    #[test]
    fn test_asymmetric_signed_and_unsigned() {
        let ks = store(4);
        let node = PrivateKey::generate();
        let sender = PrivateKey::generate();
        let topic = Topic::from_name("t");
        let sender_id = ks
            .set_peer_public_key(&sender.public_key(), topic, &[5, 6])
            .unwrap();

        let receiver = node.public_key();
        let signed = ks
            .crypto()
            .wrap(b"signed", &WrapParams::asymmetric(&receiver).signed_by(&sender))
            .unwrap();
        let msg = Message {
            to: vec![],
            flags: MessageFlags::asymmetric(),
            expiry: u32::MAX,
            topic,
            payload: signed,
        };
        let opened = ks.process_inbound_asymmetric(&msg, &node).unwrap();
        assert_eq!(opened.payload, b"signed");
        assert_eq!(opened.key_id, Some(sender_id));
        assert_eq!(opened.peer_hint, Some(vec![5, 6]));
        assert!(opened.asymmetric);

        let unsigned = ks
            .crypto()
            .wrap(b"anon", &WrapParams::asymmetric(&receiver))
            .unwrap();
        let msg = Message { payload: unsigned, ..msg };
        let opened = ks.process_inbound_asymmetric(&msg, &node).unwrap();
        assert_eq!(opened.key_id, None);
        assert_eq!(opened.peer_hint, None);

        let stranger = PrivateKey::generate();
        assert!(ks.process_inbound_asymmetric(&msg, &stranger).is_err());
    }

    #[test]
    fn test_clean_keys_keeps_protected_and_cached() {
        let ks = store(2);
        let topic = Topic::from_name("t");
        let protected = ks.set_symmetric_key(&[3u8; 32], topic, &[1], false).unwrap();
        let stale = ks.generate_symmetric_key(topic, &[1], true).unwrap();
        let cached_a = ks.generate_symmetric_key(topic, &[1], true).unwrap();
        let cached_b = ks.generate_symmetric_key(topic, &[1], true).unwrap();

        assert_eq!(ks.clean_keys(), 1);
        assert!(ks.symmetric_binding(&protected, topic).is_some());
        assert!(ks.symmetric_binding(&stale, topic).is_none());
        assert!(ks.symmetric_binding(&cached_a, topic).is_some());
        assert!(ks.symmetric_binding(&cached_b, topic).is_some());
        assert!(ks.symmetric_key(&stale).is_ok());
        assert_eq!(ks.clean_keys(), 0);
    }
}
