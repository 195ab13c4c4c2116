//! Read-only sync status reporting.

use tokio::sync::watch;

/// Externally observable sync state: offline, N pending, syncing, failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatusSnapshot {
    pub offline: bool,
    pub syncing: bool,
    pub pending: usize,
    pub failed: usize,
}

impl SyncStatusSnapshot {
    /// Nothing pending, nothing failed, not syncing: the quiet state.
    pub const fn is_clear(&self) -> bool {
        !self.syncing && self.pending == 0 && self.failed == 0
    }
}

/// Watch-channel publisher the engine writes through.
///
/// Consumers call `subscribe()` and render the snapshot; they never write.
#[derive(Debug)]
pub struct StatusReporter {
    tx: watch::Sender<SyncStatusSnapshot>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SyncStatusSnapshot::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SyncStatusSnapshot {
        *self.tx.borrow()
    }

    pub fn set_offline(&self, offline: bool) {
        self.tx.send_modify(|snapshot| snapshot.offline = offline);
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.tx.send_modify(|snapshot| snapshot.syncing = syncing);
    }

    pub fn set_counts(&self, pending: usize, failed: usize) {
        self.tx.send_modify(|snapshot| {
            snapshot.pending = pending;
            snapshot.failed = failed;
        });
    }
}
