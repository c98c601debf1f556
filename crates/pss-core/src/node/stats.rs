//! Dispatcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of dispatcher activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PssStats {
    /// Messages passed to `handle`
    pub received: u64,
    /// Dropped because their expiry had passed
    pub expired: u64,
    /// Dropped by the forward cache
    pub duplicates: u64,
    /// Opened (or raw) and handed to handlers
    pub delivered: u64,
    /// Enqueued for relay
    pub relayed: u64,
    /// Possible recipient but no key opened the message
    pub undecryptable: u64,
    /// Neither delivered nor relayed
    pub dropped: u64,
    /// Handler callbacks that returned an error
    pub handler_errors: u64,
    /// Messages accepted by `send`/`send_raw`
    pub sent: u64,
    /// Outbox rejections, inbound or outbound
    pub outbox_full: u64,
}

impl PssStats {
    /// Fresh messages (received minus expired and duplicates)
    #[must_use]
    pub fn fresh(&self) -> u64 {
        self.received
            .saturating_sub(self.expired)
            .saturating_sub(self.duplicates)
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) received: AtomicU64,
    pub(crate) expired: AtomicU64,
    pub(crate) duplicates: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) relayed: AtomicU64,
    pub(crate) undecryptable: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) handler_errors: AtomicU64,
    pub(crate) sent: AtomicU64,
    pub(crate) outbox_full: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PssStats {
        PssStats {
            received: self.received.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            undecryptable: self.undecryptable.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            outbox_full: self.outbox_full.load(Ordering::Relaxed),
        }
    }
}
