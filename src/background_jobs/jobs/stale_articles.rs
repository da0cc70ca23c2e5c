//! Deletes articles older than the retention period.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use tracing::info;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Background job that deletes old articles together with their read records.
pub struct StaleArticleCleanupJob {
    schedule: JobSchedule,
    retention_days: u64,
}

impl StaleArticleCleanupJob {
    pub fn new(schedule: JobSchedule, retention_days: u64) -> Self {
        Self {
            schedule,
            retention_days,
        }
    }

    /// Oldest `fetched_at` that is kept. Never later than `now`.
    fn cutoff(&self, now: i64) -> Result<i64, JobError> {
        i64::try_from(self.retention_days)
            .ok()
            .and_then(|days| days.checked_mul(SECONDS_PER_DAY))
            .and_then(|retention| now.checked_sub(retention))
            .ok_or_else(|| {
                JobError::ExecutionFailed(format!(
                    "Retention of {} days is out of range",
                    self.retention_days
                ))
            })
    }
}

impl BackgroundJob for StaleArticleCleanupJob {
    fn id(&self) -> &'static str {
        "stale_articles"
    }

    fn name(&self) -> &'static str {
        "Stale Article Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete articles older than the retention period"
    }

    fn schedule(&self) -> JobSchedule {
        self.schedule.clone()
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let cutoff = self.cutoff(chrono::Utc::now().timestamp())?;
        info!(
            "Deleting articles older than {} days (cutoff: {})",
            self.retention_days, cutoff
        );

        let deleted = ctx
            .news_store
            .delete_articles_fetched_before(cutoff)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        if deleted > 0 {
            info!("Deleted {} stale articles", deleted);
        } else {
            info!("No stale articles to delete");
        }

        Ok(())
    }
}
