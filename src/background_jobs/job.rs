use super::context::JobContext;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Schedule for when a job should run.
///
/// Written in configuration as `every <n><s|m|h|d>` or as a cron expression
/// (5 or 6 fields, evaluated in UTC).
#[derive(Debug, Clone)]
pub enum JobSchedule {
    /// Run at specific times using cron syntax
    Cron(cron::Schedule),
    /// Run at fixed intervals
    Interval(Duration),
}

impl JobSchedule {
    /// Time to wait from `now` until the next run, `None` if a cron
    /// schedule has no future occurrence.
    pub fn delay_until_next(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            JobSchedule::Interval(interval) => Some(*interval),
            JobSchedule::Cron(schedule) => schedule
                .after(&now)
                .next()
                .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO)),
        }
    }

    /// Next wall-clock run, only known for cron schedules.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        match self {
            JobSchedule::Interval(_) => None,
            JobSchedule::Cron(schedule) => schedule.upcoming(Utc).next(),
        }
    }
}

impl PartialEq for JobSchedule {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JobSchedule::Interval(a), JobSchedule::Interval(b)) => a == b,
            (JobSchedule::Cron(a), JobSchedule::Cron(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

/// `cron` wants a seconds field; plain 5-field expressions get one.
fn parse_cron(expr: &str) -> Result<cron::Schedule, cron::error::Error> {
    if expr.split_whitespace().count() == 5 {
        cron::Schedule::from_str(&format!("0 {}", expr))
    } else {
        cron::Schedule::from_str(expr)
    }
}

impl FromStr for JobSchedule {
    type Err = anyhow::Error;

    fn from_str(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            bail!("Empty schedule expression");
        }

        if let Some(rest) = expr.strip_prefix("every") {
            let rest = rest.trim();
            let unit_start = rest
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| anyhow!("Missing time unit in schedule \"{}\"", expr))?;
            let (amount, unit) = rest.split_at(unit_start);
            let amount: u64 = amount
                .parse()
                .with_context(|| format!("Invalid amount in schedule \"{}\"", expr))?;
            if amount == 0 {
                bail!("Schedule interval must be positive: \"{}\"", expr);
            }
            let unit_secs: u64 = match unit.trim() {
                "s" => 1,
                "m" => 60,
                "h" => 60 * 60,
                "d" => 24 * 60 * 60,
                other => bail!("Unknown time unit \"{}\" in schedule \"{}\"", other, expr),
            };
            let seconds = amount
                .checked_mul(unit_secs)
                .ok_or_else(|| anyhow!("Schedule interval too large: \"{}\"", expr))?;
            return Ok(JobSchedule::Interval(Duration::from_secs(seconds)));
        }

        let schedule = parse_cron(expr).map_err(|e| {
            anyhow!(
                "Unrecognized schedule \"{}\", expected \"every <n><s|m|h|d>\" or a cron expression: {}",
                expr,
                e
            )
        })?;
        Ok(JobSchedule::Cron(schedule))
    }
}

impl fmt::Display for JobSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSchedule::Interval(interval) => {
                let secs = interval.as_secs();
                if secs > 0 && secs % (24 * 60 * 60) == 0 {
                    write!(f, "every {}d", secs / (24 * 60 * 60))
                } else if secs > 0 && secs % (60 * 60) == 0 {
                    write!(f, "every {}h", secs / (60 * 60))
                } else if secs > 0 && secs % 60 == 0 {
                    write!(f, "every {}m", secs / 60)
                } else {
                    write!(f, "every {}s", secs)
                }
            }
            JobSchedule::Cron(schedule) => write!(f, "{}", schedule),
        }
    }
}

/// How a job should be handled during server shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

/// Errors that can occur during job execution.
#[derive(Debug)]
pub enum JobError {
    ExecutionFailed(String),
    Cancelled,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// Trait for background jobs.
///
/// Jobs are executed synchronously in a blocking context.
/// Long-running work should check for cancellation.
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// When this job should be scheduled to run.
    fn schedule(&self) -> JobSchedule;

    /// How this job should be handled during shutdown.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Execute the job.
    ///
    /// This method is called from a blocking context using `spawn_blocking`.
    /// The implementation should periodically check `ctx.is_cancelled()` for
    /// long-running operations and return early with `JobError::Cancelled` if true.
    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
