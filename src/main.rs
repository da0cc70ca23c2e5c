use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use newshub_server::config::{
    self, DEFAULT_POOL_SIZE, DEFAULT_PORT, DEFAULT_SCRAPE_INTERVAL_SECS,
};
use newshub_server::server::{metrics, RequestsLoggingLevel};
use newshub_server::AppBuilder;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[clap(version)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite news database. Created if missing.
    #[clap(long, env = "NEWSHUB_DB_PATH", value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, env = "NEWSHUB_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Number of summarizer worker threads.
    #[clap(long, env = "NEWSHUB_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// Seconds between the start of two scrape cycles.
    #[clap(long, env = "NEWSHUB_SCRAPE_INTERVAL_SECS", default_value_t = DEFAULT_SCRAPE_INTERVAL_SECS)]
    pub scrape_interval_secs: u64,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_path: args.db_path.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
            pool_size: args.pool_size,
            scrape_interval_secs: args.scrape_interval_secs,
        }
    }
}

fn load_config(cli_args: &CliArgs) -> Result<config::AppConfig> {
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: config::CliConfig = cli_args.into();
    config::AppConfig::resolve(&cli_config, file_config)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            }
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, initiating graceful shutdown");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    if let Err(e) = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
    {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let app_config = match load_config(&cli_args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration loaded:");
    info!("  db_path: {:?}", app_config.db_path);
    info!("  port: {}", app_config.port);
    info!("  summarizer pool size: {}", app_config.summarizer.pool_size);
    info!(
        "  scrape interval: {}s, {} sources",
        app_config.scrape.interval.as_secs(),
        app_config.scrape.sources.len()
    );

    metrics::init_metrics();

    let app = match AppBuilder::new(app_config).start().await {
        Ok(app) => app,
        Err(e) => {
            error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    wait_for_shutdown_signal().await;
    app.shutdown().await;

    ExitCode::SUCCESS
}
