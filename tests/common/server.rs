//! Test app lifecycle management
//!
//! Starts the full process (storage, pool, listener, schedulers) through the
//! same builder the binary uses, with injected sources.

use newshub_server::config::AppConfig;
use newshub_server::scraping::Source;
use newshub_server::lifecycle::fixed_sources;
use newshub_server::{AppBuilder, RunningApp};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestApp {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    pub app: RunningApp,

    // Keeps the database alive until the app is shut down
    _temp_dir: TempDir,
}

impl TestApp {
    /// Starts the app with `sources` as the scrape pipeline.
    ///
    /// # Panics
    ///
    /// Panics if startup fails.
    pub async fn start(temp_dir: TempDir, config: AppConfig, sources: Vec<Arc<dyn Source>>) -> Self {
        let app = AppBuilder::new(config)
            .with_sources(fixed_sources(sources))
            .start()
            .await
            .expect("Failed to start app");

        let addr = app.local_addr().expect("App has no listener address");
        Self {
            base_url: format!("http://{}", addr),
            app,
            _temp_dir: temp_dir,
        }
    }

    pub async fn shutdown(self) {
        self.app.shutdown().await;
    }
}
