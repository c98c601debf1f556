//! Outbox: bounded, back-pressured transmit queue.
//!
//! # Architecture
//!
//! ```text
//!  enqueue()                         sender loop
//!     │ pop free slot (or Full)           │
//!     ▼                                   ▼
//! ┌────────┐   slot idx   ┌─────────┐  recv   ┌───────────────┐
//! │ slots  │─────────────▶│  ready  │────────▶│ child task    │
//! │ [0..N) │              │ channel │◀────────│ forward(msg)  │
//! └────────┘              └─────────┘ requeue └───────┬───────┘
//!      ▲                                              │ ok
//!      └──────────────── free-slot queue ◀────────────┘
//! ```
//!
//! At most `N` messages are in flight. A slot index is owned by exactly one
//! party at a time: the enqueuer until it is sent on the ready channel, then
//! the child task until the slot is released.

use crate::error::{PssError, Result};
use crate::message::Message;
use crate::shutdown::{Shutdown, ShutdownListener};
use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Hands a message to the transport.
///
/// `Ok` means the message reached at least one peer. An error asks the
/// outbox to retry.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Forward a message to the next hop(s).
    async fn forward(&self, message: &Message) -> Result<()>;
}

/// [`Forwarder`] backed by an async closure
pub struct FnForwarder<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Forwarder for FnForwarder<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn forward(&self, message: &Message) -> Result<()> {
        (self.f)(message.clone()).await
    }
}

/// Wrap an async closure as a shared [`Forwarder`].
pub fn forward_fn<F, Fut>(f: F) -> Arc<dyn Forwarder>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnForwarder { f })
}

/// A queued message and its enqueue time
#[derive(Debug)]
pub struct OutboxMessage {
    /// The message
    pub message: Message,
    /// When it entered the outbox
    pub started_at: Instant,
}

/// Outbox statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    /// Slots currently holding a message
    pub in_flight: usize,
    /// Messages accepted
    pub enqueued: u64,
    /// Messages handed off successfully
    pub forwarded: u64,
    /// Failed forward attempts that were retried or expired
    pub retries: u64,
    /// Enqueues rejected with [`PssError::OutboxFull`]
    pub rejected: u64,
    /// Messages dropped after the retry ceiling
    pub expired: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    forwarded: AtomicU64,
    retries: AtomicU64,
    rejected: AtomicU64,
    expired: AtomicU64,
}

type Slot = Mutex<Option<Arc<OutboxMessage>>>;

struct OutboxInner {
    slots: Box<[Slot]>,
    free: ArrayQueue<usize>,
    ready_tx: mpsc::Sender<usize>,
    ready_rx: Mutex<Option<mpsc::Receiver<usize>>>,
    forwarder: Arc<dyn Forwarder>,
    shutdown: Shutdown,
    max_retry: Option<Duration>,
    counters: Counters,
}

/// Bounded transmit queue with per-slot retry
#[derive(Clone)]
pub struct Outbox {
    inner: Arc<OutboxInner>,
}

impl Outbox {
    /// Create an outbox with `capacity` slots forwarding through `forwarder`.
    ///
    /// Failed forwards are retried indefinitely. Nothing is sent until
    /// [`start`](Self::start) is called.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, forwarder: Arc<dyn Forwarder>) -> Self {
        Self::with_max_retry_time(capacity, forwarder, None)
    }

    /// Like [`new`](Self::new), but give up on a message whose forwarding
    /// still fails `max_retry` after enqueue. `None` retries forever.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_max_retry_time(
        capacity: usize,
        forwarder: Arc<dyn Forwarder>,
        max_retry: Option<Duration>,
    ) -> Self {
        assert!(capacity > 0, "outbox capacity must be at least 1");

        let free = ArrayQueue::new(capacity);
        for slot in 0..capacity {
            let _ = free.push(slot);
        }
        let (ready_tx, ready_rx) = mpsc::channel(capacity);

        Self {
            inner: Arc::new(OutboxInner {
                slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
                free,
                ready_tx,
                ready_rx: Mutex::new(Some(ready_rx)),
                forwarder,
                shutdown: Shutdown::new(),
                max_retry,
                counters: Counters::default(),
            }),
        }
    }

    /// Retry ceiling, if any
    #[must_use]
    pub fn max_retry_time(&self) -> Option<Duration> {
        self.inner.max_retry
    }

    /// Slot count
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Messages currently in flight
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity() - self.inner.free.len()
    }

    /// True if no message is in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free slots
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.inner.free.len()
    }

    /// True once [`stop`](Self::stop) has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> OutboxStats {
        let c = &self.inner.counters;
        OutboxStats {
            in_flight: self.len(),
            enqueued: c.enqueued.load(Ordering::Relaxed),
            forwarded: c.forwarded.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
        }
    }

    /// Queue `message` for forwarding.
    ///
    /// Never waits for a free slot. After [`stop`](Self::stop) the message
    /// is silently abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::OutboxFull`] when every slot is in flight.
    pub async fn enqueue(&self, message: Message) -> Result<()> {
        let inner = &self.inner;
        if inner.shutdown.is_triggered() {
            return Ok(());
        }

        let Some(slot) = inner.free.pop() else {
            inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PssError::OutboxFull);
        };

        *inner.slot(slot) = Some(Arc::new(OutboxMessage {
            message,
            started_at: Instant::now(),
        }));
        inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        let mut shutdown = inner.shutdown.listener();
        tokio::select! {
            biased;
            () = shutdown.wait() => {}
            sent = inner.ready_tx.send(slot) => {
                if sent.is_err() {
                    inner.release(slot);
                }
            }
        }
        Ok(())
    }

    /// Start the sender loop. Subsequent calls are no-ops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let rx = self
            .inner
            .ready_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut rx) = rx else {
            tracing::debug!("outbox already started");
            return;
        };

        let inner = self.inner.clone();
        let mut shutdown = inner.shutdown.listener();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.wait() => break,
                    next = rx.recv() => match next {
                        Some(slot) => {
                            let inner = inner.clone();
                            tokio::spawn(async move { inner.process(slot).await });
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("outbox sender loop stopped");
        });
    }

    /// Stop the sender loop and abandon pending work. Idempotent.
    pub fn stop(&self) {
        self.inner.shutdown.trigger();
    }

    /// Listener on this outbox's shutdown signal
    #[must_use]
    pub fn shutdown_listener(&self) -> ShutdownListener {
        self.inner.shutdown.listener()
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("capacity", &self.capacity())
            .field("in_flight", &self.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl OutboxInner {
    fn slot(&self, index: usize) -> MutexGuard<'_, Option<Arc<OutboxMessage>>> {
        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, index: usize) {
        *self.slot(index) = None;
        if self.shutdown.is_triggered() {
            return;
        }
        let _ = self.free.push(index);
    }

    async fn requeue(&self, index: usize) {
        let mut shutdown = self.shutdown.listener();
        tokio::select! {
            biased;
            () = shutdown.wait() => {}
            sent = self.ready_tx.send(index) => {
                if sent.is_err() {
                    self.release(index);
                }
            }
        }
    }

    async fn process(&self, index: usize) {
        let item = self.slot(index).clone();
        let Some(item) = item else {
            self.release(index);
            return;
        };

        match self.forwarder.forward(&item.message).await {
            Ok(()) => {
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    slot = index,
                    latency_ms = item.started_at.elapsed().as_millis() as u64,
                    "message forwarded"
                );
                self.release(index);
            }
            Err(e) => {
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
                if let Some(max) = self.max_retry {
                    if item.started_at.elapsed() >= max {
                        self.counters.expired.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(slot = index, error = %e, "giving up on message after retry ceiling");
                        self.release(index);
                        return;
                    }
                }
                tracing::debug!(slot = index, error = %e, "forward failed, requeueing");
                tokio::task::yield_now().await;
                self.requeue(index).await;
            }
        }
    }
}
