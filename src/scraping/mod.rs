//! Scrape pipeline: a fixed, ordered list of sources run one after another,
//! re-triggered periodically without ever overlapping.

mod feed_source;
mod runner;
mod scheduler;

pub use feed_source::{parse_feed_items, FeedItem, HttpFeedSource};
pub use runner::{CycleReport, PipelineRunner, SourceOutcome, SourceStatus};
pub use scheduler::ScrapeScheduler;

use anyhow::Result;
use async_trait::async_trait;

/// A data source fetched once per scrape cycle.
///
/// `fetch` persists whatever it finds as a side effect. Returning an error (or
/// panicking) only marks this source as failed for the current cycle.
#[async_trait]
pub trait Source: Send + Sync {
    /// Name used in logs, metrics and cycle reports.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<()>;
}
