//! Caller-owned run handle.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::types::{ProgressSnapshot, RunPhase};

/// Cancellation and progress channel for one run.
///
/// The caller keeps a clone; the orchestrator borrows it for the run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    cancel: CancellationToken,
    progress: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for RunHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ProgressSnapshot::default());
        Self {
            cancel: CancellationToken::new(),
            progress: Arc::new(tx),
        }
    }

    /// Stop requesting pages. Records already in flight finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.borrow().clone()
    }

    pub(crate) fn publish(&self, snapshot: ProgressSnapshot) {
        self.progress.send_replace(snapshot);
    }

    pub(crate) fn set_phase(&self, phase: RunPhase) {
        self.progress.send_modify(|s| s.phase = phase);
    }
}
