//! Background job scheduling and execution system.
//!
//! Runs the periodic maintenance jobs (preference recomputation, stale
//! article cleanup, daily counter reset), each on its own schedule and never
//! overlapping with itself.

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};
