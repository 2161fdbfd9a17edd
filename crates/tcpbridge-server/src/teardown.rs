//! Bridge teardown coordination
//!
//! Both pumps of a bridge can fail independently and at the same time. The
//! coordinator serializes the close so the sockets are shut down exactly once,
//! and wakes whichever pump is still parked on I/O.

use std::sync::{Mutex, PoisonError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Lifecycle of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Accepted, upstream connect in flight
    Dialing,
    /// Both pumps armed
    Running,
    /// Sockets shut down, pumps draining
    Closing,
    /// No socket open and no operation in flight
    Closed,
}

pub struct TeardownCoordinator {
    state: Mutex<BridgeState>,
    cancel: CancellationToken,
}

impl TeardownCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BridgeState::Dialing),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> BridgeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dialing -> Running. Returns false if the bridge is already closing.
    pub fn mark_running(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            BridgeState::Dialing => {
                *state = BridgeState::Running;
                true
            }
            BridgeState::Running => true,
            BridgeState::Closing | BridgeState::Closed => false,
        }
    }

    /// Close the bridge, running `shutdown` under the lock on the first call only.
    ///
    /// Returns true if this call performed the close.
    pub fn close<F>(&self, shutdown: F) -> bool
    where
        F: FnOnce(),
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, BridgeState::Closing | BridgeState::Closed) {
            return false;
        }

        *state = BridgeState::Closing;
        shutdown();
        self.cancel.cancel();
        true
    }

    /// Closing -> Closed, once no pump holds the sockets any more
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = BridgeState::Closed;
    }

    /// Resolves when the bridge starts closing
    pub fn closing(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl Default for TeardownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
