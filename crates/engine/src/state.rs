use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::watch;

/// Shared sync bookkeeping, handed to the coordinator and anyone observing it.
///
/// `sync_started_at` is the reentrancy sentinel: 0 when idle, otherwise the
/// millisecond timestamp the running sync began. Claiming it is a compare-and-swap,
/// so two tasks on different worker threads can never both start a sync.
#[derive(Clone)]
pub struct SyncState {
    inner: Arc<Inner>,
}

struct Inner {
    sync_started_at: AtomicI64,
    last_sync_at: watch::Sender<i64>,
}

impl SyncState {
    pub fn new(last_sync_at: i64) -> Self {
        let (last_sync_at, _) = watch::channel(last_sync_at);
        Self {
            inner: Arc::new(Inner {
                sync_started_at: AtomicI64::new(0),
                last_sync_at,
            }),
        }
    }

    pub fn sync_started_at(&self) -> i64 {
        self.inner.sync_started_at.load(Ordering::Acquire)
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_started_at() != 0
    }

    pub fn last_sync_at(&self) -> i64 {
        *self.inner.last_sync_at.borrow()
    }

    /// Receiver that wakes whenever a sync succeeds.
    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.inner.last_sync_at.subscribe()
    }

    /// Claim the sentinel. `None` means a sync is already running.
    pub(crate) fn try_begin(&self, now_ms: i64) -> Option<SyncGuard> {
        self.inner
            .sync_started_at
            .compare_exchange(0, now_ms.max(1), Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard {
                inner: Arc::clone(&self.inner),
            })
    }

    pub(crate) fn mark_synced(&self, at_ms: i64) {
        self.inner.last_sync_at.send_replace(at_ms);
    }
}

impl fmt::Debug for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncState")
            .field("sync_started_at", &self.sync_started_at())
            .field("last_sync_at", &self.last_sync_at())
            .finish()
    }
}

/// Held for the duration of one sync. Dropping it, on any path, releases the sentinel.
pub(crate) struct SyncGuard {
    inner: Arc<Inner>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.inner.sync_started_at.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_until_release() {
        let state = SyncState::new(0);
        let guard = state.try_begin(100).expect("first claim");
        assert!(state.is_syncing());
        assert_eq!(state.sync_started_at(), 100);
        assert!(state.try_begin(200).is_none());

        drop(guard);
        assert!(!state.is_syncing());
        assert!(state.try_begin(300).is_some());
    }

    #[test]
    fn zero_timestamp_still_marks_busy() {
        let state = SyncState::new(0);
        let _guard = state.try_begin(0).expect("claim");
        assert!(state.is_syncing());
    }

    #[test]
    fn observers_see_last_sync() {
        let state = SyncState::new(5);
        let rx = state.subscribe();
        assert_eq!(*rx.borrow(), 5);
        state.mark_synced(42);
        assert_eq!(*rx.borrow(), 42);
        assert_eq!(state.last_sync_at(), 42);
    }
}
