use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,

    // Component configs
    pub summarizer: Option<SummarizerConfig>,
    pub scrape: Option<ScrapeConfig>,
    pub maintenance: Option<MaintenanceConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SummarizerConfig {
    pub pool_size: Option<usize>,
    pub max_sentences: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScrapeConfig {
    pub interval_secs: Option<u64>,
    pub cooldown_secs: Option<u64>,
    pub source_timeout_secs: Option<u64>,
    pub sources: Option<Vec<SourceConfig>>,
}

/// One `[[scrape.sources]]` entry. Sources run in the order they are listed.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Schedule expressions, e.g. `every 1h` or `30 4 * * *` (cron, UTC).
    pub user_preferences: Option<String>,
    pub stale_articles: Option<String>,
    pub daily_counters: Option<String>,
    pub article_retention_days: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
