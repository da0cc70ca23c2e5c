use serde::Serialize;

/// An article as produced by a source, before it has been assigned an id.
#[derive(Debug, Clone)]
pub struct NewArticle {
    /// Canonical link, unique across the whole store.
    pub link: String,
    pub title: String,
    /// Name of the source that fetched it.
    pub source: String,
    pub topic: Option<String>,
    pub body: Option<String>,
    /// Unix timestamp (seconds) of when the article was fetched.
    pub fetched_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: i64,
    pub link: String,
    pub title: String,
    pub source: String,
    pub topic: Option<String>,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub fetched_at: i64,
}

/// Number of articles a user has read in a given topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicReadCount {
    pub user_id: String,
    pub topic: String,
    pub reads: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPreference {
    pub user_id: String,
    pub topic: String,
    /// Share of the user's reads that fall in this topic, in `0.0..=1.0`.
    pub weight: f64,
    pub updated_at: i64,
}
