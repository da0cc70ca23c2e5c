//! Maintenance jobs run by the [`JobScheduler`](super::JobScheduler).

pub mod daily_counters;
pub mod stale_articles;
pub mod user_preferences;

pub use daily_counters::DailyCounterResetJob;
pub use stale_articles::StaleArticleCleanupJob;
pub use user_preferences::UserPreferencesJob;
