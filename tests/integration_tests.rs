//! End-to-end scenarios across pss-crypto and pss-core.
//!
//! Each section exercises one documented behaviour through the public API:
//! envelope sealing, forward-cache deduplication, outbox back-pressure and
//! retry, decrypt-cache promotion, and digest field independence.

use pss_core::message::unix_now;
use pss_core::node::{Disposition, KeyMaterial, PssConfig};
use pss_core::outbox::{Outbox, forward_fn};
use pss_core::{Message, MessageFlags, PssError, Topic};
use pss_crypto::{CryptoBackend, CryptoError, DefaultCrypto, PrivateKey, UnwrapParams, WrapParams};
use pss_integration_tests::{MockOverlay, address, init_tracing, recording_handler, standalone};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn message(to: &[u8], topic: Topic, payload: Vec<u8>, expiry: u32) -> Message {
    Message {
        to: to.to_vec(),
        flags: MessageFlags::symmetric(),
        expiry,
        topic,
        payload,
    }
}

// ============================================================================
// S1: Symmetric Echo
// ============================================================================

#[test]
fn test_s1_zero_key_rejected() {
    let crypto = DefaultCrypto::default();
    let zero = [0u8; 32];
    assert_eq!(
        crypto
            .wrap(b"hello", &WrapParams::symmetric(&zero))
            .unwrap_err(),
        CryptoError::InvalidSymKey
    );
    assert_eq!(
        crypto.add_sym_key(&zero).unwrap_err(),
        CryptoError::InvalidSymKey
    );
}

#[test]
fn test_s1_symmetric_echo() {
    let crypto = DefaultCrypto::default();
    let key: Vec<u8> = (1..=32).collect();
    let topic = Topic::from_name("greet");

    let sealed = crypto.wrap(b"hello", &WrapParams::symmetric(&key)).unwrap();
    let opened = crypto
        .unwrap(&sealed, &UnwrapParams::symmetric(&key))
        .unwrap();
    assert_eq!(opened.payload().unwrap(), b"hello");
    assert_eq!(opened.sender().unwrap(), None);

    let msg = message(&[], topic, sealed, u32::MAX);
    let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn test_s1_signed_roundtrips() {
    let crypto = DefaultCrypto::default();
    let key: Vec<u8> = (1..=32).collect();
    let sender = PrivateKey::generate();
    let receiver = PrivateKey::generate();

    let sealed = crypto
        .wrap(b"hello", &WrapParams::symmetric(&key).signed_by(&sender))
        .unwrap();
    let opened = crypto
        .unwrap(&sealed, &UnwrapParams::symmetric(&key))
        .unwrap();
    assert_eq!(opened.sender().unwrap(), Some(&sender.public_key()));

    let receiver_pub = receiver.public_key();
    let sealed = crypto
        .wrap(b"hello", &WrapParams::asymmetric(&receiver_pub).signed_by(&sender))
        .unwrap();
    let opened = crypto
        .unwrap(&sealed, &UnwrapParams::asymmetric(&receiver))
        .unwrap();
    assert_eq!(opened.payload().unwrap(), b"hello");
    assert_eq!(opened.sender().unwrap(), Some(&sender.public_key()));
}

#[tokio::test]
async fn test_s1_symmetric_echo_through_dispatcher() {
    init_tracing();
    let local = address(0x42);
    let (pss, sent) = standalone(MockOverlay::new(local), PssConfig::default());
    pss.start();

    let key: Vec<u8> = (1..=32).collect();
    let topic = Topic::from_name("greet");
    pss.set_symmetric_key(&key, topic, &local, true).unwrap();
    let (handler, inbox) = recording_handler();
    let _unregister = pss.register(topic, handler);

    pss.send(&local, topic, b"hello", KeyMaterial::Symmetric(&key), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The sent message is in our own forward cache, so a loopback is a duplicate.
    let looped = sent.lock().unwrap()[0].clone();
    assert_eq!(pss.handle(&looped).await, Disposition::Duplicate);

    // A fresh copy from a peer (cache cleared) is delivered.
    let (peer, _peer_sent) = standalone(MockOverlay::new(local), PssConfig::default());
    peer.set_symmetric_key(&key, topic, &local, true).unwrap();
    let (handler, peer_inbox) = recording_handler();
    let _unregister_peer = peer.register(topic, handler);
    assert_eq!(peer.handle(&looped).await, Disposition::LocallyDelivered);

    let delivered = peer_inbox.lock().unwrap();
    assert_eq!(delivered[0].payload, b"hello");
    assert!(inbox.lock().unwrap().is_empty());
    pss.stop();
}

// ============================================================================
// S2: Forward-Cache Dedup
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_s2_forward_cache_dedup() {
    let local = address(0x21);
    let config = PssConfig {
        forward_cache_ttl: Duration::from_secs(60),
        ..PssConfig::default()
    };
    let (pss, _sent) = standalone(MockOverlay::new(local), config);
    pss.start();

    let topic = Topic::from_name("dedup");
    let key = [0x33u8; 32];
    pss.set_symmetric_key(&key, topic, &[1], true).unwrap();
    let (handler, inbox) = recording_handler();
    let _unregister = pss.register(topic, handler);

    let sealed = DefaultCrypto::default()
        .wrap(b"once", &WrapParams::symmetric(&key))
        .unwrap();
    let msg = message(&local, topic, sealed, unix_now() + 3600);

    assert_eq!(pss.handle(&msg).await, Disposition::LocallyDelivered);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pss.handle(&msg.clone()).await, Disposition::Duplicate);
    assert_eq!(inbox.lock().unwrap().len(), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!pss.forward_cache().check(&msg));
    assert_eq!(pss.handle(&msg).await, Disposition::LocallyDelivered);
    assert_eq!(inbox.lock().unwrap().len(), 2);

    let stats = pss.stats();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.delivered, 2);
    pss.stop();
}

#[tokio::test(start_paused = true)]
async fn test_s2_sweeper_empties_cache() {
    let (pss, _sent) = standalone(MockOverlay::new(address(1)), PssConfig::default());
    pss.start();
    let msg = message(&[0x99; 32], Topic::from_name("t"), vec![1, 2, 3], unix_now() + 3600);

    assert!(pss.handle(&msg).await.is_forwarded());
    assert_eq!(pss.forward_cache().len(), 1);

    tokio::time::sleep(Duration::from_secs(130)).await;
    assert!(pss.forward_cache().is_empty());
    pss.stop();
}

// ============================================================================
// S3: Outbox Back-Pressure
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_s3_outbox_back_pressure() {
    let forwarded = Arc::new(AtomicUsize::new(0));
    let count = forwarded.clone();
    let outbox = Outbox::new(
        2,
        forward_fn(move |_msg| {
            let count = count.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );
    outbox.start();

    let topic = Topic::from_name("bp");
    let m = |n: u8| message(&[n], topic, vec![n], u32::MAX);

    outbox.enqueue(m(1)).await.unwrap();
    outbox.enqueue(m(2)).await.unwrap();
    assert!(matches!(outbox.enqueue(m(3)).await, Err(PssError::OutboxFull)));

    tokio::time::sleep(Duration::from_millis(210)).await;
    assert_eq!(outbox.free_slots(), 2);
    outbox.enqueue(m(4)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(forwarded.load(Ordering::SeqCst), 3);
    assert_eq!(outbox.stats().rejected, 1);
    outbox.stop();
}

#[tokio::test(start_paused = true)]
async fn test_outbox_accepts_exactly_capacity_when_blocked() {
    let outbox = Outbox::new(
        5,
        forward_fn(|_msg| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }),
    );
    outbox.start();

    let topic = Topic::from_name("cap");
    for n in 0..5u8 {
        outbox
            .enqueue(message(&[n], topic, vec![n], u32::MAX))
            .await
            .unwrap();
    }
    assert!(matches!(
        outbox.enqueue(message(&[9], topic, vec![9], u32::MAX)).await,
        Err(PssError::OutboxFull)
    ));
    assert_eq!(outbox.len(), 5);
    outbox.stop();
}

// ============================================================================
// S4: Outbox Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_s4_outbox_retry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let successes = Arc::new(AtomicUsize::new(0));
    let (c, s) = (calls.clone(), successes.clone());
    let outbox = Outbox::new(
        1,
        forward_fn(move |_msg| {
            let attempt = c.fetch_add(1, Ordering::SeqCst);
            let s = s.clone();
            async move {
                if attempt == 0 {
                    return Err(PssError::forward("first attempt fails"));
                }
                s.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );
    outbox.start();

    outbox
        .enqueue(message(&[1], Topic::from_name("retry"), vec![1], u32::MAX))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outbox.free_slots(), 1);
    outbox.stop();
}

// ============================================================================
// S5: MRU Cache Promotion
// ============================================================================

#[tokio::test]
async fn test_s5_mru_promotion() {
    let local = address(0x55);
    let config = PssConfig {
        sym_key_decrypt_cache_capacity: 4,
        ..PssConfig::default()
    };
    let (pss, _sent) = standalone(MockOverlay::new(local), config);
    let topic = Topic::from_name("mru");

    let ids: Vec<String> = (0..5)
        .map(|_| pss.generate_symmetric_key(topic, &[0x01], true).unwrap())
        .collect();
    let k3 = pss.get_symmetric_key(&ids[2]).unwrap();

    let sealed = DefaultCrypto::default()
        .wrap(b"three", &WrapParams::symmetric(k3.as_bytes()))
        .unwrap();
    let msg = message(&local, topic, sealed, unix_now() + 60);
    assert_eq!(pss.handle(&msg).await, Disposition::LocallyDelivered);

    let keys = pss.key_store();
    assert_eq!(keys.decrypt_cache_head(), Some(ids[2].clone()));
    assert_eq!(
        keys.decrypt_cache_ids(),
        vec![ids[2].clone(), ids[4].clone(), ids[3].clone(), ids[1].clone()]
    );

    assert_eq!(pss.clean_keys(), 1);
    assert!(keys.symmetric_binding(&ids[0], topic).is_none());
    for id in &ids[1..] {
        assert!(keys.symmetric_binding(id, topic).is_some());
    }
}

// ============================================================================
// S6: Digest Field Independence
// ============================================================================

#[tokio::test]
async fn test_s6_digest_ignores_expiry() {
    let topic = Topic::from_name("digest");
    let m = message(&[0xAA, 0xBB], topic, b"same".to_vec(), unix_now() + 60);
    let mut m2 = m.clone();
    m2.expiry += 600;
    assert_eq!(m.digest(), m2.digest());

    let (pss, _sent) = standalone(MockOverlay::new(address(0x66)), PssConfig::default());
    assert_eq!(pss.handle(&m).await, Disposition::ForwardedOnly);
    assert_eq!(pss.handle(&m2).await, Disposition::Duplicate);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_drives_dispatcher() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("pss.toml");
    std::fs::write(
        &path,
        "outbox_capacity = 3\nsym_key_decrypt_cache_capacity = 2\npadding_block = 64\n",
    )
    .unwrap();

    let config = PssConfig::from_file(&path).unwrap();
    let (pss, _sent) = standalone(MockOverlay::new(address(7)), config);
    assert_eq!(pss.config().outbox_capacity, 3);
    assert_eq!(pss.config().padding_block, 64);
}
