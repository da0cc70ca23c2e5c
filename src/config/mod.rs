mod file_config;

pub use file_config::{FileConfig, MaintenanceConfig, ScrapeConfig, SourceConfig, SummarizerConfig};

use crate::background_jobs::JobSchedule;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_POOL_SIZE: usize = 5;
pub const DEFAULT_MAX_SENTENCES: usize = 3;
pub const DEFAULT_SCRAPE_INTERVAL_SECS: u64 = 3 * 60 * 60;
pub const DEFAULT_SCRAPE_COOLDOWN_SECS: u64 = 2;
pub const DEFAULT_USER_PREFERENCES_SCHEDULE: &str = "every 1h";
pub const DEFAULT_STALE_ARTICLES_SCHEDULE: &str = "0 3 * * *";
pub const DEFAULT_DAILY_COUNTERS_SCHEDULE: &str = "0 0 * * *";
pub const DEFAULT_ARTICLE_RETENTION_DAYS: u64 = 30;
pub const MAX_ARTICLE_RETENTION_DAYS: u64 = 36_500;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub pool_size: usize,
    pub scrape_interval_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            port: DEFAULT_PORT,
            logging_level: RequestsLoggingLevel::default(),
            pool_size: DEFAULT_POOL_SIZE,
            scrape_interval_secs: DEFAULT_SCRAPE_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub summarizer: SummarizerSettings,
    pub scrape: ScrapeSettings,
    pub maintenance: MaintenanceSettings,
}

#[derive(Debug, Clone)]
pub struct SummarizerSettings {
    pub pool_size: usize,
    pub max_sentences: usize,
}

#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub interval: Duration,
    pub cooldown: Duration,
    /// Per-source fetch timeout, none by default.
    pub source_timeout: Option<Duration>,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub user_preferences: JobSchedule,
    pub stale_articles: JobSchedule,
    pub daily_counters: JobSchedule,
    pub article_retention_days: u64,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        let port = file.port.unwrap_or(cli.port);

        let logging_level = match file.logging_level {
            Some(level) => parse_logging_level(&level)
                .with_context(|| format!("Invalid logging_level \"{}\"", level))?,
            None => cli.logging_level.clone(),
        };

        let summarizer_file = file.summarizer.unwrap_or_default();
        let summarizer = SummarizerSettings {
            pool_size: summarizer_file.pool_size.unwrap_or(cli.pool_size),
            max_sentences: summarizer_file
                .max_sentences
                .unwrap_or(DEFAULT_MAX_SENTENCES),
        };
        if summarizer.pool_size == 0 {
            bail!("summarizer.pool_size must be at least 1");
        }
        if summarizer.max_sentences == 0 {
            bail!("summarizer.max_sentences must be at least 1");
        }

        let scrape_file = file.scrape.unwrap_or_default();
        let interval_secs = scrape_file
            .interval_secs
            .unwrap_or(cli.scrape_interval_secs);
        if interval_secs == 0 {
            bail!("scrape.interval_secs must be positive");
        }
        let source_timeout = match scrape_file.source_timeout_secs {
            Some(0) => bail!("scrape.source_timeout_secs must be positive when set"),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };
        let sources = scrape_file.sources.unwrap_or_default();
        validate_sources(&sources)?;
        let scrape = ScrapeSettings {
            interval: Duration::from_secs(interval_secs),
            cooldown: Duration::from_secs(
                scrape_file
                    .cooldown_secs
                    .unwrap_or(DEFAULT_SCRAPE_COOLDOWN_SECS),
            ),
            source_timeout,
            sources,
        };

        let maintenance_file = file.maintenance.unwrap_or_default();
        let maintenance = MaintenanceSettings {
            user_preferences: parse_schedule(
                "maintenance.user_preferences",
                maintenance_file.user_preferences,
                DEFAULT_USER_PREFERENCES_SCHEDULE,
            )?,
            stale_articles: parse_schedule(
                "maintenance.stale_articles",
                maintenance_file.stale_articles,
                DEFAULT_STALE_ARTICLES_SCHEDULE,
            )?,
            daily_counters: parse_schedule(
                "maintenance.daily_counters",
                maintenance_file.daily_counters,
                DEFAULT_DAILY_COUNTERS_SCHEDULE,
            )?,
            article_retention_days: maintenance_file
                .article_retention_days
                .unwrap_or(DEFAULT_ARTICLE_RETENTION_DAYS),
        };
        if !(1..=MAX_ARTICLE_RETENTION_DAYS).contains(&maintenance.article_retention_days) {
            bail!(
                "maintenance.article_retention_days must be between 1 and {}",
                MAX_ARTICLE_RETENTION_DAYS
            );
        }

        Ok(Self {
            db_path,
            port,
            logging_level,
            summarizer,
            scrape,
            maintenance,
        })
    }
}

fn parse_schedule(key: &str, value: Option<String>, default: &str) -> Result<JobSchedule> {
    let expr = value.unwrap_or_else(|| default.to_string());
    expr.parse()
        .with_context(|| format!("Invalid schedule for {}", key))
}

fn validate_sources(sources: &[SourceConfig]) -> Result<()> {
    let mut names = HashSet::new();
    for source in sources {
        if source.name.trim().is_empty() {
            bail!("scrape.sources entries need a non-empty name");
        }
        if !names.insert(source.name.as_str()) {
            bail!("Duplicate scrape source name \"{}\"", source.name);
        }
        if !(source.url.starts_with("http://") || source.url.starts_with("https://")) {
            bail!(
                "Scrape source \"{}\" has an invalid url \"{}\", expected http(s)",
                source.name,
                source.url
            );
        }
    }
    Ok(())
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_db() -> CliConfig {
        CliConfig {
            db_path: Some(PathBuf::from("/data/news.db")),
            ..Default::default()
        }
    }

    fn source(name: &str, url: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            url: url.to_string(),
            topic: None,
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("path"),
            Some(RequestsLoggingLevel::Path)
        ));
        assert!(matches!(
            parse_logging_level("headers"),
            Some(RequestsLoggingLevel::Headers)
        ));
        // Case insensitive
        assert!(matches!(
            parse_logging_level("PATH"),
            Some(RequestsLoggingLevel::Path)
        ));
        // Invalid
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&cli_with_db(), None).unwrap();

        assert_eq!(config.db_path, PathBuf::from("/data/news.db"));
        assert_eq!(config.port, 5000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Path);
        assert_eq!(config.summarizer.pool_size, 5);
        assert_eq!(config.summarizer.max_sentences, 3);
        assert_eq!(config.scrape.interval, Duration::from_secs(10800));
        assert_eq!(config.scrape.cooldown, Duration::from_secs(2));
        assert!(config.scrape.source_timeout.is_none());
        assert!(config.scrape.sources.is_empty());
        assert_eq!(
            config.maintenance.user_preferences,
            JobSchedule::Interval(Duration::from_secs(3600))
        );
        assert_eq!(
            config.maintenance.stale_articles,
            "0 0 3 * * *".parse::<JobSchedule>().unwrap()
        );
        assert_eq!(
            config.maintenance.daily_counters,
            "0 0 0 * * *".parse::<JobSchedule>().unwrap()
        );
        assert_eq!(config.maintenance.article_retention_days, 30);
    }

    #[test]
    fn test_resolve_cli_only() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/cli/news.db")),
            port: 3001,
            logging_level: RequestsLoggingLevel::Headers,
            pool_size: 8,
            scrape_interval_secs: 600,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_path, PathBuf::from("/cli/news.db"));
        assert_eq!(config.port, 3001);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.summarizer.pool_size, 8);
        assert_eq!(config.scrape.interval, Duration::from_secs(600));
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/should/be/overridden.db")),
            port: 3001,
            pool_size: 8,
            ..Default::default()
        };

        let file_config = FileConfig {
            db_path: Some("/toml/news.db".to_string()),
            port: Some(4000),
            logging_level: Some("none".to_string()),
            scrape: Some(ScrapeConfig {
                cooldown_secs: Some(0),
                source_timeout_secs: Some(30),
                sources: Some(vec![source("wire", "https://wire.example/rss")]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.db_path, PathBuf::from("/toml/news.db"));
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::None);
        assert_eq!(config.scrape.cooldown, Duration::ZERO);
        assert_eq!(config.scrape.source_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.scrape.sources.len(), 1);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.summarizer.pool_size, 8);
    }

    #[test]
    fn test_resolve_missing_db_path_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_path must be specified"));
    }

    #[test]
    fn test_resolve_rejects_zero_pool_size() {
        let cli = CliConfig {
            pool_size: 0,
            ..cli_with_db()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("pool_size"));
    }

    #[test]
    fn test_resolve_rejects_invalid_schedule() {
        let file_config = FileConfig {
            maintenance: Some(MaintenanceConfig {
                stale_articles: Some("sometimes".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli_with_db(), Some(file_config));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("maintenance.stale_articles"));
    }

    #[test]
    fn test_resolve_rejects_invalid_logging_level() {
        let file_config = FileConfig {
            logging_level: Some("verbose".to_string()),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_with_db(), Some(file_config)).is_err());
    }

    #[test]
    fn test_resolve_rejects_bad_sources() {
        let cases = vec![
            vec![
                source("wire", "https://a.example/rss"),
                source("wire", "https://b.example/rss"),
            ],
            vec![source("", "https://a.example/rss")],
            vec![source("wire", "ftp://a.example/rss")],
        ];

        for sources in cases {
            let file_config = FileConfig {
                scrape: Some(ScrapeConfig {
                    sources: Some(sources),
                    ..Default::default()
                }),
                ..Default::default()
            };
            assert!(AppConfig::resolve(&cli_with_db(), Some(file_config)).is_err());
        }
    }

    #[test]
    fn test_resolve_rejects_zero_timeout_and_interval() {
        let file_config = FileConfig {
            scrape: Some(ScrapeConfig {
                source_timeout_secs: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_with_db(), Some(file_config)).is_err());

        let cli = CliConfig {
            scrape_interval_secs: 0,
            ..cli_with_db()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_resolve_bounds_article_retention() {
        for (days, accepted) in [
            (0, false),
            (1, true),
            (MAX_ARTICLE_RETENTION_DAYS, true),
            (MAX_ARTICLE_RETENTION_DAYS + 1, false),
            (u64::MAX, false),
        ] {
            let file_config = FileConfig {
                maintenance: Some(MaintenanceConfig {
                    article_retention_days: Some(days),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let result = AppConfig::resolve(&cli_with_db(), Some(file_config));
            assert_eq!(result.is_ok(), accepted, "retention of {} days", days);
        }
    }
}
