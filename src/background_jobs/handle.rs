use super::job::{BackgroundJob, JobSchedule};
use crate::run_guard::RunGuard;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Information about a registered job for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
}

/// Serializable schedule information.
#[derive(Debug, Clone, Serialize)]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: String,
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_secs: Option<u64>,
    /// Next fire time (RFC 3339), cron schedules only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<String>,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        match schedule {
            JobSchedule::Interval(duration) => JobScheduleInfo {
                schedule_type: "interval".to_string(),
                expression: schedule.to_string(),
                value_secs: Some(duration.as_secs()),
                next_run: None,
            },
            JobSchedule::Cron(_) => JobScheduleInfo {
                schedule_type: "cron".to_string(),
                expression: schedule.to_string(),
                value_secs: None,
                next_run: schedule.next_run().map(|next| next.to_rfc3339()),
            },
        }
    }
}

/// Serializable job run information.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub duration_ms: u64,
    pub status: String,
    pub error_message: Option<String>,
}

impl JobRunInfo {
    pub fn new(
        started_at: DateTime<Utc>,
        duration: Duration,
        status: &str,
        error_message: Option<String>,
    ) -> Self {
        Self {
            started_at: started_at.to_rfc3339(),
            duration_ms: duration.as_millis() as u64,
            status: status.to_string(),
            error_message,
        }
    }
}

/// A job together with its own non-reentrancy guard.
pub struct RegisteredJob {
    pub job: Arc<dyn BackgroundJob>,
    pub guard: RunGuard,
    pub last_run: Option<JobRunInfo>,
    pub executions: u64,
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub struct SharedJobState {
    pub jobs: HashMap<String, RegisteredJob>,
}

impl SharedJobState {
    pub(super) fn record_run(&mut self, job_id: &str, run: JobRunInfo) {
        if let Some(registered) = self.jobs.get_mut(job_id) {
            registered.last_run = Some(run);
            registered.executions += 1;
        }
    }

    fn job_info(job_id: &str, registered: &RegisteredJob) -> JobInfo {
        JobInfo {
            id: job_id.to_string(),
            name: registered.job.name().to_string(),
            description: registered.job.description().to_string(),
            schedule: registered.job.schedule().into(),
            is_running: registered.guard.is_running(),
            last_run: registered.last_run.clone(),
        }
    }
}

/// Read-only handle to the job scheduler for HTTP handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared_state: Arc<RwLock<SharedJobState>>,
}

impl SchedulerHandle {
    pub fn new(shared_state: Arc<RwLock<SharedJobState>>) -> Self {
        Self { shared_state }
    }

    /// Get information about all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.shared_state.read().await;
        let mut jobs: Vec<JobInfo> = state
            .jobs
            .iter()
            .map(|(job_id, registered)| SharedJobState::job_info(job_id, registered))
            .collect();

        // Sort by job ID for consistent ordering
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Get information about a specific job.
    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        let state = self.shared_state.read().await;
        state
            .jobs
            .get(job_id)
            .map(|registered| SharedJobState::job_info(job_id, registered))
    }

    /// Check if a job exists.
    pub async fn job_exists(&self, job_id: &str) -> bool {
        self.shared_state.read().await.jobs.contains_key(job_id)
    }

    /// Check if a job is currently running.
    pub async fn is_job_running(&self, job_id: &str) -> bool {
        self.shared_state
            .read()
            .await
            .jobs
            .get(job_id)
            .map(|registered| registered.guard.is_running())
            .unwrap_or(false)
    }

    /// Number of completed executions (any outcome) of a job since startup.
    pub async fn execution_count(&self, job_id: &str) -> u64 {
        self.shared_state
            .read()
            .await
            .jobs
            .get(job_id)
            .map(|registered| registered.executions)
            .unwrap_or(0)
    }
}
