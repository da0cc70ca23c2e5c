use super::context::JobContext;
use super::handle::{JobRunInfo, RegisteredJob, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior};
use crate::run_guard::{RunGuard, RunPermit};
use crate::server::metrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

type InFlightJobs = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

/// Manages background job scheduling and execution.
///
/// Every job gets its own timer and its own [`RunGuard`]: a tick that fires
/// while the previous run of the same job is still going is skipped, other
/// jobs are unaffected.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Context handed to jobs. Its token is cancelled on shutdown.
    job_context: JobContext,

    /// Stops the per-job timers.
    timers_token: CancellationToken,

    timers: Vec<JoinHandle<()>>,

    /// Task handles of the latest run of each job.
    in_flight: InFlightJobs,

    /// How long shutdown waits for running jobs.
    shutdown_timeout: Duration,
}

impl JobScheduler {
    pub fn new(job_context: JobContext, shared_state: Arc<RwLock<SharedJobState>>) -> Self {
        Self {
            shared_state,
            job_context,
            timers_token: CancellationToken::new(),
            timers: Vec::new(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Register a job with the scheduler.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!(
            "Registering job: {} - {} ({})",
            job_id,
            job.description(),
            job.schedule()
        );
        let mut state = self.shared_state.write().await;
        state.jobs.insert(
            job_id,
            RegisteredJob {
                job,
                guard: RunGuard::new(),
                last_run: None,
                executions: 0,
            },
        );
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Arm the timers of all registered jobs.
    pub async fn start(&mut self) {
        if !self.timers.is_empty() {
            warn!("Job scheduler already started");
            return;
        }

        let state = self.shared_state.read().await;
        info!(
            "Starting job scheduler with {} registered jobs",
            state.jobs.len()
        );

        for registered in state.jobs.values() {
            let timer = JobTimer {
                job: Arc::clone(&registered.job),
                guard: registered.guard.clone(),
                context: self.job_context.clone(),
                shared_state: Arc::clone(&self.shared_state),
                in_flight: Arc::clone(&self.in_flight),
                timers_token: self.timers_token.clone(),
            };
            self.timers.push(tokio::spawn(timer.run()));
        }
    }

    /// Stop all timers, cancel cancellable jobs and wait (bounded) for the
    /// ones still running.
    pub async fn shutdown(&mut self) {
        info!("Shutting down job scheduler...");

        self.timers_token.cancel();
        for timer in self.timers.drain(..) {
            let _ = timer.await;
        }

        self.job_context.cancellation_token.cancel();

        let running: Vec<(String, JoinHandle<()>)> = self
            .in_flight
            .lock()
            .map(|mut in_flight| in_flight.drain().collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, handle)| !handle.is_finished())
            .collect();

        if !running.is_empty() {
            let job_ids: Vec<String> = running.iter().map(|(id, _)| id.clone()).collect();
            info!("Waiting for running jobs: {}", job_ids.join(", "));

            let all_done = futures::future::join_all(running.into_iter().map(|(_, h)| h));
            if tokio::time::timeout(self.shutdown_timeout, all_done)
                .await
                .is_err()
            {
                warn!(
                    "Jobs still running after {:?}, not waiting any longer: {}",
                    self.shutdown_timeout,
                    job_ids.join(", ")
                );
            }
        }

        info!("Job scheduler shutdown complete");
    }
}

/// Drives the schedule of a single job.
struct JobTimer {
    job: Arc<dyn BackgroundJob>,
    guard: RunGuard,
    context: JobContext,
    shared_state: Arc<RwLock<SharedJobState>>,
    in_flight: InFlightJobs,
    timers_token: CancellationToken,
}

impl JobTimer {
    async fn run(self) {
        let job_id = self.job.id();
        let schedule = self.job.schedule();
        // Cron fire time of the last tick; a timer that wakes slightly early
        // must not compute the same occurrence again.
        let mut last_fire: Option<DateTime<Utc>> = None;

        loop {
            let now = Utc::now();
            let from = last_fire.filter(|fired| *fired > now).unwrap_or(now);
            let Some(delay) = schedule.delay_until_next(from) else {
                warn!("Schedule of job {} has no future run, timer stopped", job_id);
                break;
            };
            let delay = delay + (from - now).to_std().unwrap_or(Duration::ZERO);
            debug!("Job {} next run in {:?}", job_id, delay);

            tokio::select! {
                _ = self.timers_token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    if matches!(schedule, JobSchedule::Cron(_)) {
                        last_fire = chrono::Duration::from_std(delay)
                            .ok()
                            .map(|delay| now + delay);
                    }
                    self.tick();
                }
            }
        }

        debug!("Timer for job {} stopped", job_id);
    }

    fn tick(&self) {
        let job_id = self.job.id();
        let Some(permit) = self.guard.try_acquire() else {
            warn!("Job {} is still running, skipping this tick", job_id);
            metrics::record_background_job_skipped(job_id);
            return;
        };

        let handle = tokio::spawn(execute_job(
            Arc::clone(&self.job),
            self.context.clone(),
            Arc::clone(&self.shared_state),
            permit,
        ));

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.retain(|_, handle| !handle.is_finished());
            in_flight.insert(job_id.to_string(), handle);
        }
    }
}

/// Run one execution of `job` on the blocking pool. Errors and panics are
/// logged and recorded, the permit is released when the run settles.
async fn execute_job(
    job: Arc<dyn BackgroundJob>,
    context: JobContext,
    shared_state: Arc<RwLock<SharedJobState>>,
    permit: RunPermit,
) {
    let job_id = job.id();

    // Jobs that must complete are not tied to the shutdown token
    let token = match job.shutdown_behavior() {
        ShutdownBehavior::Cancellable => context.cancellation_token.child_token(),
        ShutdownBehavior::WaitForCompletion => CancellationToken::new(),
    };
    let ctx = context.with_token(token);

    info!("Starting job: {}", job_id);
    metrics::set_background_job_running(job_id, true);

    let started_at = Utc::now();
    let start_time = Instant::now();
    let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
    let elapsed = start_time.elapsed();

    let (status_label, error_msg) = match result {
        Ok(Ok(())) => {
            info!("Job {} completed successfully in {:?}", job_id, elapsed);
            ("success", None)
        }
        Ok(Err(JobError::Cancelled)) => {
            info!("Job {} was cancelled after {:?}", job_id, elapsed);
            ("cancelled", Some(JobError::Cancelled.to_string()))
        }
        Ok(Err(e)) => {
            error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
            ("failed", Some(e.to_string()))
        }
        Err(e) => {
            error!("Job {} panicked after {:?}: {}", job_id, elapsed, e);
            ("panic", Some(format!("Task panic: {}", e)))
        }
    };

    metrics::record_background_job_execution(job_id, status_label, elapsed);
    metrics::set_background_job_running(job_id, false);

    shared_state.write().await.record_run(
        job_id,
        JobRunInfo::new(started_at, elapsed, status_label, error_msg),
    );

    drop(permit);
}

/// Create a scheduler and its handle.
pub fn create_scheduler(job_context: JobContext) -> (JobScheduler, SchedulerHandle) {
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));
    let scheduler = JobScheduler::new(job_context, Arc::clone(&shared_state));
    let handle = SchedulerHandle::new(shared_state);
    (scheduler, handle)
}
