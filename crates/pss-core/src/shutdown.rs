//! Shared shutdown signal.
//!
//! One [`Shutdown`] is fired by the owner; any number of [`ShutdownListener`]s
//! observe it. Firing is sticky: listeners created afterwards see it too.

use tokio::sync::watch;

/// Fires the shutdown signal
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create an unfired signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// True once [`trigger`](Self::trigger) has been called
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create a listener.
    #[must_use]
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observes a [`Shutdown`]
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// True once the signal has fired
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal fires.
    pub async fn wait(&mut self) {
        // The sender lives as long as its owner; if it is dropped without
        // firing, treat that as shutdown too.
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}
