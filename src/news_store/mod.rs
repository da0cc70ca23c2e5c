//! Persistent storage shared by the scrape pipeline, the summarizer and the
//! maintenance jobs.

mod models;
mod schema;
mod sqlite_news_store;

pub use models::*;
pub use schema::NEWS_VERSIONED_SCHEMAS;
pub use sqlite_news_store::SqliteNewsStore;

use anyhow::Result;

pub trait NewsStore: Send + Sync {
    // Articles
    /// Insert an article. Returns `None` if an article with the same link
    /// already exists.
    fn insert_article(&self, article: &NewArticle) -> Result<Option<i64>>;
    fn get_article(&self, id: i64) -> Result<Option<Article>>;
    fn set_article_summary(&self, id: i64, summary: &str) -> Result<()>;
    fn count_articles(&self) -> Result<usize>;
    /// Delete articles fetched strictly before `cutoff` (unix seconds), together
    /// with their read records. Returns the number of deleted articles.
    fn delete_articles_fetched_before(&self, cutoff: i64) -> Result<usize>;

    // Reading history and preferences
    fn record_read(&self, user_id: &str, article_id: i64, read_at: i64) -> Result<()>;
    /// Reads grouped by user and topic. Articles without a topic are ignored.
    fn get_topic_read_counts(&self) -> Result<Vec<TopicReadCount>>;
    /// Atomically replace all preferences of a user.
    fn replace_user_preferences(
        &self,
        user_id: &str,
        weights: &[(String, f64)],
        updated_at: i64,
    ) -> Result<()>;
    fn get_user_preferences(&self, user_id: &str) -> Result<Vec<UserPreference>>;
    /// Users that currently have at least one stored preference.
    fn list_users_with_preferences(&self) -> Result<Vec<String>>;

    // Daily counters
    /// Increment a per-user daily counter, returning the new value.
    fn increment_daily_counter(&self, user_id: &str, counter: &str) -> Result<i64>;
    fn get_daily_counter(&self, user_id: &str, counter: &str) -> Result<i64>;
    /// Set every daily counter back to zero. Returns the number of counters reset.
    fn reset_daily_counters(&self) -> Result<usize>;

    /// Release the underlying connection. Every later call fails.
    fn close(&self) -> Result<()>;
}
