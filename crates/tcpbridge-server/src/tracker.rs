//! Live bridge tracking
//!
//! Every accepted connection registers here and holds a [`BridgeGuard`] until
//! its bridge is dropped, so `active() == accepted() - closed()` whenever no
//! registration or release is in progress.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Counters {
    next_bridge_id: AtomicU64,
    accepted: AtomicU64,
    closed: AtomicU64,
    dial_failures: AtomicU64,
    active: AtomicUsize,
    idle: Notify,
}

/// Shared counters for all bridges of one acceptor
#[derive(Clone, Default)]
pub struct BridgeTracker {
    inner: Arc<Counters>,
}

impl BridgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection
    pub fn register(&self) -> BridgeGuard {
        let id = self.inner.next_bridge_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        self.inner.accepted.fetch_add(1, Ordering::SeqCst);
        BridgeGuard {
            id,
            tracker: self.clone(),
        }
    }

    pub fn accepted(&self) -> u64 {
        self.inner.accepted.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn dial_failures(&self) -> u64 {
        self.inner.dial_failures.load(Ordering::SeqCst)
    }

    pub(crate) fn record_dial_failure(&self) {
        self.inner.dial_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Resolves once no bridge is alive
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Registration of one bridge; releases it on drop
pub struct BridgeGuard {
    id: u64,
    tracker: BridgeTracker,
}

impl BridgeGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn tracker(&self) -> &BridgeTracker {
        &self.tracker
    }
}

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
