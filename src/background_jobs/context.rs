use crate::news_store::NewsStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a maintenance job gets to work with: the news store and a token
/// that fires when the scheduler shuts down.
#[derive(Clone)]
pub struct JobContext {
    pub cancellation_token: CancellationToken,

    /// Articles, reading history, preferences and counters.
    pub news_store: Arc<dyn NewsStore>,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken, news_store: Arc<dyn NewsStore>) -> Self {
        Self {
            cancellation_token,
            news_store,
        }
    }

    /// Same resources, different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            news_store: Arc::clone(&self.news_store),
        }
    }

    /// Long loops poll this between batches and bail out with
    /// `JobError::Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
