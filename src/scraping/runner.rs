use super::Source;
use crate::server::metrics;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Success,
    /// Error summary of a fetch that returned an error, panicked or timed out.
    Failure(String),
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Success => "success",
            SourceStatus::Failure(_) => "failure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    pub duration: Duration,
}

impl fmt::Display for SourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            SourceStatus::Success => write!(f, "{}: success", self.source),
            SourceStatus::Failure(error) => write!(f, "{}: failure({:?})", self.source, error),
        }
    }
}

/// Result of one full pass over the configured sources.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per source, in configured order.
    pub outcomes: Vec<SourceOutcome>,
}

impl CycleReport {
    pub fn failure_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SourceStatus::Failure(_)))
            .count()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, outcome) in self.outcomes.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", outcome)?;
        }
        Ok(())
    }
}

/// Runs every source once, strictly in order, isolating each one's failures.
pub struct PipelineRunner {
    sources: Vec<Arc<dyn Source>>,
    cooldown: Duration,
    source_timeout: Option<Duration>,
}

impl PipelineRunner {
    pub fn new(sources: Vec<Arc<dyn Source>>, cooldown: Duration) -> Self {
        Self {
            sources,
            cooldown,
            source_timeout: None,
        }
    }

    /// Fail a source that has not settled within `timeout`. Off by default.
    pub fn with_source_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Run one cycle. Never fails: every source gets its turn and its
    /// outcome is recorded in the report.
    pub async fn run_once(&self) -> CycleReport {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let cycle_start = Instant::now();
        info!(
            "Starting scrape cycle {} over {} sources",
            id,
            self.sources.len()
        );

        let mut outcomes = Vec::with_capacity(self.sources.len());
        for (index, source) in self.sources.iter().enumerate() {
            if index > 0 && !self.cooldown.is_zero() {
                tokio::time::sleep(self.cooldown).await;
            }
            outcomes.push(self.run_source(source.as_ref()).await);
        }

        let report = CycleReport {
            id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        metrics::record_scrape_cycle(cycle_start.elapsed());
        info!("Scrape cycle {} complete: {}", id, report);
        report
    }

    async fn run_source(&self, source: &dyn Source) -> SourceOutcome {
        let name = source.name().to_string();
        debug!("Fetching source {}", name);
        let start = Instant::now();

        let fetch = AssertUnwindSafe(source.fetch()).catch_unwind();
        let result = match self.source_timeout {
            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                Ok(result) => result,
                Err(_) => Ok(Err(anyhow::anyhow!(
                    "timed out after {}s",
                    limit.as_secs_f64()
                ))),
            },
            None => fetch.await,
        };

        let status = match result {
            Ok(Ok(())) => SourceStatus::Success,
            Ok(Err(e)) => {
                error!("Source {} failed: {:#}", name, e);
                SourceStatus::Failure(format!("{:#}", e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Source {} panicked: {}", name, message);
                SourceStatus::Failure(format!("panicked: {}", message))
            }
        };

        let duration = start.elapsed();
        metrics::record_source_run(&name, status.as_str(), duration);

        SourceOutcome {
            source: name,
            status,
            duration,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
