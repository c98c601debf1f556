//! Forward cache: TTL-bounded deduplication of messages in flight.
//!
//! Entries map a message [`Digest`] to the instant it stops suppressing
//! duplicates. The cache knows nothing about message semantics. Time is read
//! from `tokio::time::Instant` so the sweep cadence follows the runtime clock.

use crate::error::{PssError, Result};
use crate::message::{Digest, Message};
use crate::shutdown::ShutdownListener;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

/// Digest → expiry map behind a single lock
#[derive(Debug)]
pub struct ForwardCache {
    entries: Mutex<HashMap<Digest, Instant>>,
    ttl: Duration,
}

impl ForwardCache {
    /// Create an empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a cache and start its background sweeper.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_sweeper(ttl: Duration, shutdown: ShutdownListener) -> Arc<Self> {
        let cache = Arc::new(Self::new(ttl));
        cache.clone().spawn_sweeper(shutdown);
        cache
    }

    /// Entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Digest, Instant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `msg`, (re)starting its suppression window.
    pub fn add(&self, msg: &Message) {
        self.add_digest(msg.digest());
    }

    /// Record a digest directly.
    pub fn add_digest(&self, digest: Digest) {
        let expires_at = Instant::now() + self.ttl;
        self.lock().insert(digest, expires_at);
    }

    /// True if `msg` was recorded and its window has not lapsed.
    #[must_use]
    pub fn check(&self, msg: &Message) -> bool {
        self.check_digest(&msg.digest())
    }

    /// Digest form of [`check`](Self::check).
    #[must_use]
    pub fn check_digest(&self, digest: &Digest) -> bool {
        let now = Instant::now();
        self.lock()
            .get(digest)
            .is_some_and(|&expires_at| expires_at >= now)
    }

    /// Record `msg` unless it is already live in the cache.
    ///
    /// Check and insert happen under one lock, so of two concurrent callers
    /// with the same message exactly one is admitted.
    ///
    /// # Errors
    ///
    /// [`PssError::DuplicateMessage`] if the digest is recorded and its
    /// window has not lapsed. The existing window is left untouched.
    pub fn admit(&self, msg: &Message) -> Result<()> {
        let digest = msg.digest();
        let now = Instant::now();
        let mut entries = self.lock();
        if entries.get(&digest).is_some_and(|&expires_at| expires_at >= now) {
            return Err(PssError::DuplicateMessage);
        }
        entries.insert(digest, now + self.ttl);
        Ok(())
    }

    /// Delete every lapsed entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at >= now);
        before - entries.len()
    }

    /// Number of entries, lapsed or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sweep every `ttl` until `shutdown` fires.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.ttl, self.ttl);
            loop {
                tokio::select! {
                    () = shutdown.wait() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            tracing::trace!(removed, remaining = self.len(), "forward cache swept");
                        }
                    }
                }
            }
            tracing::debug!("forward cache sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageFlags, Topic};
    use crate::shutdown::Shutdown;

    fn message(payload: &[u8], expiry: u32) -> Message {
        Message {
            to: vec![0x01, 0x02],
            flags: MessageFlags::symmetric(),
            expiry,
            topic: Topic::from_name("test"),
            payload: payload.to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_then_check() {
        let cache = ForwardCache::new(Duration::from_secs(60));
        let msg = message(b"a", 100);
        assert!(!cache.check(&msg));

        cache.add(&msg);
        assert!(cache.check(&msg));
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.check(&msg));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.check(&msg));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_rejects_live_duplicate() {
        let cache = ForwardCache::new(Duration::from_secs(10));
        let msg = message(b"once", 0);

        cache.admit(&msg).unwrap();
        assert!(matches!(cache.admit(&msg), Err(PssError::DuplicateMessage)));
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.admit(&msg).unwrap();
        assert!(cache.check(&msg));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_does_not_extend_window() {
        let cache = ForwardCache::new(Duration::from_secs(10));
        let msg = message(b"window", 0);

        cache.admit(&msg).unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.admit(&msg).is_err());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cache.check(&msg));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_field_does_not_matter() {
        let cache = ForwardCache::new(Duration::from_secs(60));
        cache.add(&message(b"same", 100));
        assert!(cache.check(&message(b"same", 999)));
        assert!(!cache.check(&message(b"different", 100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_lapsed() {
        let cache = ForwardCache::new(Duration::from_secs(10));
        cache.add(&message(b"old", 1));
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.add(&message(b"new", 1));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.check(&message(b"new", 1)));
        assert_eq!(cache.sweep(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_re_add_extends_window() {
        let cache = ForwardCache::new(Duration::from_secs(10));
        let msg = message(b"x", 1);
        cache.add(&msg);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.add(&msg);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(cache.check(&msg));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let shutdown = Shutdown::new();
        let cache = ForwardCache::with_sweeper(Duration::from_secs(60), shutdown.listener());
        cache.add(&message(b"m", 1));

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(cache.is_empty());

        shutdown.trigger();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let shutdown = Shutdown::new();
        let cache = Arc::new(ForwardCache::new(Duration::from_secs(1)));
        let handle = cache.clone().spawn_sweeper(shutdown.listener());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
