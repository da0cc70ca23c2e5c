//! Test fixtures: configuration and scripted sources

use super::constants::*;
use async_trait::async_trait;
use newshub_server::config::{AppConfig, CliConfig};
use newshub_server::scraping::Source;
use newshub_server::RequestsLoggingLevel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A resolved config pointing at a fresh database inside a temp dir.
///
/// The port is 0 so every app gets its own ephemeral port.
pub fn test_config() -> (TempDir, AppConfig) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cli = CliConfig {
        db_path: Some(temp_dir.path().join("news.db")),
        port: 0,
        logging_level: RequestsLoggingLevel::None,
        pool_size: 2,
        scrape_interval_secs: IDLE_SCRAPE_INTERVAL_SECS,
    };
    let mut config = AppConfig::resolve(&cli, None).expect("Failed to resolve test config");
    config.scrape.cooldown = Duration::ZERO;
    (temp_dir, config)
}

/// Finds a port nothing is listening on right now.
#[allow(dead_code)]
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind an ephemeral port");
    listener.local_addr().expect("Failed to read ephemeral port").port()
}

/// A source that counts its fetches and optionally fails with a fixed message.
pub struct ScriptedSource {
    name: String,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ScriptedSource {
    pub fn ok(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn failing(name: &str, message: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failure: Some(message.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}
