//! Shared constants for end-to-end tests

/// Interval long enough that no periodic cycle fires during a test.
pub const IDLE_SCRAPE_INTERVAL_SECS: u64 = 3600;

/// Request timeout for the test HTTP client.
pub const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Job ids registered by every running app, sorted.
pub const MAINTENANCE_JOB_IDS: [&str; 3] = ["daily_counters", "stale_articles", "user_preferences"];
