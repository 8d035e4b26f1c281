//! Cooperative run control: progress reporting and cancellation at batch
//! boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Iterations finished out of the configured total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Completion on a 0–100 scale.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

/// Hooks the orchestrator calls between batches. Both default to no-ops.
pub trait RunControl {
    /// Polled before every batch; `true` aborts the run with no output.
    fn is_cancelled(&self) -> bool {
        false
    }

    fn on_progress(&mut self, _progress: Progress) {}
}

impl RunControl for () {}

/// Shareable cancellation flag; clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl RunControl for CancelToken {
    fn is_cancelled(&self) -> bool {
        CancelToken::is_cancelled(self)
    }
}
