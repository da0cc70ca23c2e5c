//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{test_config, TestApp, TestClient};
//!
//! #[tokio::test]
//! async fn test_health() {
//!     let (temp_dir, config) = test_config();
//!     let app = TestApp::start(temp_dir, config, vec![]).await;
//!     let client = TestClient::new(app.base_url.clone());
//!     assert_eq!(client.get_health().await.status(), reqwest::StatusCode::OK);
//!     app.shutdown().await;
//! }
//! ```

mod client;
mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{free_port, test_config, ScriptedSource};
pub use server::TestApp;
