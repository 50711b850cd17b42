//! Shutdown barrier: join N independent close notifications
//!
//! Used when tearing down a set of components that each signal completion
//! individually and asynchronously. The barrier itself is untimed; callers
//! decide whether slow shutdown is acceptable.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::dependency::DependencyEvent;

/// Resolves waiters exactly once, after `n` signals. A barrier over zero
/// components resolves immediately.
pub struct ShutdownBarrier {
    remaining: watch::Sender<usize>,
}

impl ShutdownBarrier {
    pub fn new(n: usize) -> Self {
        let (remaining, _) = watch::channel(n);
        Self { remaining }
    }

    /// Record one completion. Signals past zero are ignored.
    pub fn signal(&self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Wait until all completions arrived. Returns immediately if the
    /// barrier is already down, regardless of signal ordering or timing.
    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives in self, so wait_for cannot fail while we borrow it.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }
}

/// Signal the barrier once a dependency emits `Closed`.
///
/// A dependency that drops its event channel without emitting `Closed` is
/// treated as closed - the resource is gone either way.
pub(crate) fn signal_on_closed(
    mut events: broadcast::Receiver<DependencyEvent>,
    barrier: Arc<ShutdownBarrier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(DependencyEvent::Closed) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        barrier.signal();
    })
}
