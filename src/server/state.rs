use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::scraping::ScrapeScheduler;
use crate::summarizer::SummarizerPool;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedScrapeScheduler = Arc<ScrapeScheduler>;
pub type GuardedSummarizerPool = Arc<SummarizerPool>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hash: String,
    pub scheduler_handle: SchedulerHandle,
    pub scrape_scheduler: GuardedScrapeScheduler,
    pub summarizer_pool: GuardedSummarizerPool,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for SchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}

impl FromRef<ServerState> for GuardedScrapeScheduler {
    fn from_ref(input: &ServerState) -> Self {
        input.scrape_scheduler.clone()
    }
}

impl FromRef<ServerState> for GuardedSummarizerPool {
    fn from_ref(input: &ServerState) -> Self {
        input.summarizer_pool.clone()
    }
}
