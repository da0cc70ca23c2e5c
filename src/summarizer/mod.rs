//! Bounded pool of isolated worker threads running article summarization.

mod lead_sentences;
mod pool;

pub use lead_sentences::LeadSentencesSummarizer;
pub use pool::{PoolError, PoolStats, SummarizerPool};

use std::sync::Arc;

/// Turns article text into a summary.
///
/// One instance is created per worker slot, inside that slot's thread, so
/// implementations may keep per-slot state without synchronization.
pub trait Summarizer {
    fn summarize(&mut self, text: &str) -> anyhow::Result<String>;
}

/// Creates the summarizer of a worker slot. Called again whenever a slot is
/// respawned after a crash.
pub type SummarizerFactory = Arc<dyn Fn() -> Box<dyn Summarizer> + Send + Sync>;
