//! Skip-if-running exclusion shared by the scrape cycle scheduler and the
//! maintenance jobs.
//!
//! A [`RunGuard`] hands out at most one [`RunPermit`] at a time. Acquiring
//! while a permit is alive fails immediately instead of waiting, so a periodic
//! trigger that fires during a long run is dropped rather than queued. The
//! permit releases the guard when dropped, which also covers panics and
//! cancelled futures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to start a run. Returns `None` if a run is already in progress.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof that the holder owns the current run.
#[derive(Debug)]
pub struct RunPermit {
    running: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
