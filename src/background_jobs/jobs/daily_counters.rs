use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use tracing::info;

/// Resets every per-user daily counter to zero.
pub struct DailyCounterResetJob {
    schedule: JobSchedule,
}

impl DailyCounterResetJob {
    pub fn new(schedule: JobSchedule) -> Self {
        Self { schedule }
    }
}

impl BackgroundJob for DailyCounterResetJob {
    fn id(&self) -> &'static str {
        "daily_counters"
    }

    fn name(&self) -> &'static str {
        "Daily Counter Reset"
    }

    fn description(&self) -> &'static str {
        "Reset per-user daily counters"
    }

    fn schedule(&self) -> JobSchedule {
        self.schedule.clone()
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // A single statement, let it finish
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let reset = ctx
            .news_store
            .reset_daily_counters()
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        info!("Reset {} daily counters", reset);
        Ok(())
    }
}
