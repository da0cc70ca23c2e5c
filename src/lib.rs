//! NewsHub server library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod background_jobs;
pub mod config;
pub mod lifecycle;
pub mod news_store;
pub mod run_guard;
pub mod scraping;
pub mod server;
pub mod sqlite_persistence;
pub mod summarizer;

// Re-export commonly used types for convenience
pub use lifecycle::{AppBuilder, RunningApp, StartupError};
pub use news_store::{NewsStore, SqliteNewsStore};
pub use server::RequestsLoggingLevel;
