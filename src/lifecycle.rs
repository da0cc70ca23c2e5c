//! Startup and teardown ordering for the whole process.
//!
//! Storage comes first and is the only dependency everything else shares; a
//! failure there (or binding the status listener) aborts startup before any
//! scheduler is armed. Teardown runs in reverse.

use crate::background_jobs::jobs::{
    DailyCounterResetJob, StaleArticleCleanupJob, UserPreferencesJob,
};
use crate::background_jobs::{create_scheduler, JobContext, JobScheduler, SchedulerHandle};
use crate::config::AppConfig;
use crate::news_store::{NewsStore, SqliteNewsStore};
use crate::scraping::{CycleReport, HttpFeedSource, PipelineRunner, ScrapeScheduler, Source};
use crate::server::{bind_listener, make_app, run_server, ServerConfig};
use crate::summarizer::{LeadSentencesSummarizer, Summarizer, SummarizerFactory, SummarizerPool};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open storage: {0:#}")]
    Storage(#[source] anyhow::Error),
    #[error("failed to bind status listener on port {port}: {source}")]
    Listener {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start summarizer pool: {0:#}")]
    SummarizerPool(#[source] anyhow::Error),
    #[error("failed to set up source \"{name}\": {source:#}")]
    Source {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Builds the sources of the scrape pipeline once storage and the pool exist.
pub type SourceProvider = Box<
    dyn FnOnce(
            &Arc<dyn NewsStore>,
            &Arc<SummarizerPool>,
        ) -> Result<Vec<Arc<dyn Source>>, StartupError>
        + Send,
>;

/// Turns the `[[scrape.sources]]` entries into HTTP feed sources.
pub fn configured_sources(config: &AppConfig) -> SourceProvider {
    let sources = config.scrape.sources.clone();
    let timeout = config.scrape.source_timeout;
    Box::new(move |news_store: &Arc<dyn NewsStore>, summarizer_pool: &Arc<SummarizerPool>| {
        sources
            .into_iter()
            .map(|source| {
                HttpFeedSource::new(
                    source.name.clone(),
                    source.url,
                    source.topic,
                    Arc::clone(news_store),
                    Arc::clone(summarizer_pool),
                    timeout,
                )
                .map(|s| Arc::new(s) as Arc<dyn Source>)
                .map_err(|e| StartupError::Source {
                    name: source.name,
                    source: e,
                })
            })
            .collect()
    })
}

/// Uses an already built list of sources, ignoring storage and the pool.
pub fn fixed_sources(sources: Vec<Arc<dyn Source>>) -> SourceProvider {
    Box::new(move |_: &Arc<dyn NewsStore>, _: &Arc<SummarizerPool>| Ok(sources))
}

pub struct AppBuilder {
    config: AppConfig,
    sources: SourceProvider,
    summarizer_factory: SummarizerFactory,
}

impl AppBuilder {
    pub fn new(config: AppConfig) -> Self {
        let sources = configured_sources(&config);
        let max_sentences = config.summarizer.max_sentences;
        let summarizer_factory: SummarizerFactory = Arc::new(move || {
            Box::new(LeadSentencesSummarizer::new(max_sentences)) as Box<dyn Summarizer>
        });
        Self {
            config,
            sources,
            summarizer_factory,
        }
    }

    pub fn with_sources(mut self, sources: SourceProvider) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_summarizer_factory(mut self, factory: SummarizerFactory) -> Self {
        self.summarizer_factory = factory;
        self
    }

    /// Bring the process up: storage, pool, listener, first scrape pass,
    /// then the periodic schedulers.
    pub async fn start(self) -> Result<RunningApp, StartupError> {
        let config = self.config;

        info!("Opening news database at {:?}", config.db_path);
        let news_store: Arc<dyn NewsStore> = Arc::new(
            SqliteNewsStore::new(&config.db_path).map_err(StartupError::Storage)?,
        );

        let summarizer_pool = match SummarizerPool::new(
            config.summarizer.pool_size,
            self.summarizer_factory,
        ) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                close_store(&news_store);
                return Err(StartupError::SummarizerPool(e));
            }
        };

        let sources = match (self.sources)(&news_store, &summarizer_pool) {
            Ok(sources) => sources,
            Err(e) => {
                release(&summarizer_pool, &news_store).await;
                return Err(e);
            }
        };
        let runner = Arc::new(
            PipelineRunner::new(sources, config.scrape.cooldown)
                .with_source_timeout(config.scrape.source_timeout),
        );
        let scrape_scheduler = Arc::new(ScrapeScheduler::new(runner, config.scrape.interval));

        let (mut job_scheduler, scheduler_handle) = create_scheduler(JobContext::new(
            CancellationToken::new(),
            Arc::clone(&news_store),
        ));
        let maintenance = &config.maintenance;
        job_scheduler
            .register_job(Arc::new(UserPreferencesJob::new(
                maintenance.user_preferences.clone(),
            )))
            .await;
        job_scheduler
            .register_job(Arc::new(StaleArticleCleanupJob::new(
                maintenance.stale_articles.clone(),
                maintenance.article_retention_days,
            )))
            .await;
        job_scheduler
            .register_job(Arc::new(DailyCounterResetJob::new(
                maintenance.daily_counters.clone(),
            )))
            .await;

        let listener = match bind_listener(config.port).await {
            Ok(listener) => listener,
            Err(source) => {
                release(&summarizer_pool, &news_store).await;
                return Err(StartupError::Listener {
                    port: config.port,
                    source,
                });
            }
        };
        let local_addr = listener.local_addr().ok();

        let app = make_app(
            ServerConfig {
                requests_logging_level: config.logging_level.clone(),
                port: config.port,
            },
            scheduler_handle.clone(),
            Arc::clone(&scrape_scheduler),
            Arc::clone(&summarizer_pool),
        );
        let server_shutdown = CancellationToken::new();
        let server_task = tokio::spawn(run_server(listener, app, server_shutdown.clone()));

        let first_cycle = scrape_scheduler.start().await;
        job_scheduler.start().await;

        info!("Startup complete");
        Ok(RunningApp {
            local_addr,
            news_store,
            summarizer_pool,
            scrape_scheduler,
            job_scheduler,
            scheduler_handle,
            first_cycle,
            server_shutdown,
            server_task,
        })
    }
}

fn close_store(news_store: &Arc<dyn NewsStore>) {
    if let Err(e) = news_store.close() {
        error!("Failed to close news database: {:#}", e);
    }
}

async fn release(summarizer_pool: &SummarizerPool, news_store: &Arc<dyn NewsStore>) {
    summarizer_pool.shutdown().await;
    close_store(news_store);
}

/// Handles to everything started by [`AppBuilder::start`].
pub struct RunningApp {
    local_addr: Option<SocketAddr>,
    news_store: Arc<dyn NewsStore>,
    summarizer_pool: Arc<SummarizerPool>,
    scrape_scheduler: Arc<ScrapeScheduler>,
    job_scheduler: JobScheduler,
    scheduler_handle: SchedulerHandle,
    first_cycle: Option<CycleReport>,
    server_shutdown: CancellationToken,
    server_task: JoinHandle<anyhow::Result<()>>,
}

impl RunningApp {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn news_store(&self) -> &Arc<dyn NewsStore> {
        &self.news_store
    }

    pub fn scrape_scheduler(&self) -> &Arc<ScrapeScheduler> {
        &self.scrape_scheduler
    }

    pub fn scheduler_handle(&self) -> &SchedulerHandle {
        &self.scheduler_handle
    }

    /// Report of the synchronous pass made during startup.
    pub fn first_cycle(&self) -> Option<&CycleReport> {
        self.first_cycle.as_ref()
    }

    /// Stop everything in reverse startup order.
    pub async fn shutdown(mut self) {
        info!("Shutting down...");

        self.job_scheduler.shutdown().await;
        self.scrape_scheduler.stop().await;
        self.summarizer_pool.shutdown().await;
        close_store(&self.news_store);

        self.server_shutdown.cancel();
        match self.server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("HTTP server failed: {:#}", e),
            Err(e) => error!("HTTP server task failed: {}", e),
        }

        info!("Shutdown complete");
    }
}
