use super::runner::{CycleReport, PipelineRunner};
use crate::run_guard::{RunGuard, RunPermit};
use crate::server::metrics;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct CycleState {
    runner: Arc<PipelineRunner>,
    guard: RunGuard,
    last_report: RwLock<Option<CycleReport>>,
}

impl CycleState {
    fn try_begin(&self) -> Option<RunPermit> {
        let permit = self.guard.try_acquire();
        if permit.is_none() {
            warn!("Scrape cycle still in progress, skipping trigger");
            metrics::record_scrape_cycle_skipped();
        }
        permit
    }

    async fn run(&self, _permit: RunPermit) -> CycleReport {
        let report = self.runner.run_once().await;
        *self.last_report.write().await = Some(report.clone());
        report
    }
}

/// Runs the scrape pipeline once on start and then every `interval`, never
/// letting two cycles overlap.
pub struct ScrapeScheduler {
    state: Arc<CycleState>,
    interval: Duration,
    shutdown_token: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ScrapeScheduler {
    pub fn new(runner: Arc<PipelineRunner>, interval: Duration) -> Self {
        Self {
            state: Arc::new(CycleState {
                runner,
                guard: RunGuard::new(),
                last_report: RwLock::new(None),
            }),
            interval,
            shutdown_token: CancellationToken::new(),
            ticker: Mutex::new(None),
        }
    }

    /// Run the first cycle and wait for it, then arm the periodic trigger.
    ///
    /// Calling `start` again after the timer is armed does not arm a second one.
    pub async fn start(&self) -> Option<CycleReport> {
        let first = self.trigger().await;
        self.arm();
        first
    }

    fn arm(&self) {
        let Ok(mut ticker) = self.ticker.lock() else {
            return;
        };
        if ticker.is_some() {
            return;
        }

        let state = Arc::clone(&self.state);
        let token = self.shutdown_token.clone();
        let period = self.interval;
        info!("Scrape cycles scheduled every {:?}", period);

        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // Skip the first immediate tick, the first cycle already ran
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        debug!("Scrape interval elapsed");
                        if let Some(permit) = state.try_begin() {
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                state.run(permit).await;
                            });
                        }
                    }
                }
            }

            debug!("Scrape timer stopped");
        }));
    }

    /// Run one cycle now and wait for it. Returns `None` without doing
    /// anything if a cycle is already running.
    pub async fn trigger(&self) -> Option<CycleReport> {
        let permit = self.state.try_begin()?;
        Some(self.state.run(permit).await)
    }

    /// Clear the periodic trigger. A cycle already running is left to finish.
    pub async fn stop(&self) {
        self.shutdown_token.cancel();
        let ticker = self.ticker.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = ticker {
            let _ = handle.await;
            info!("Scrape scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.guard.is_running()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn last_report(&self) -> Option<CycleReport> {
        self.state.last_report.read().await.clone()
    }
}
