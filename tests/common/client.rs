//! HTTP client for end-to-end tests
//!
//! When status routes change, update only this file.

use super::constants::*;
use reqwest::Response;
use std::time::Duration;

pub struct TestClient {
    pub client: reqwest::Client,
    pub base_url: String,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn get_health(&self) -> Response {
        self.get("/health").await
    }

    pub async fn get_jobs(&self) -> Response {
        self.get("/v1/status/jobs").await
    }

    pub async fn get_job(&self, job_id: &str) -> Response {
        self.get(&format!("/v1/status/jobs/{}", job_id)).await
    }

    pub async fn get_scrape_status(&self) -> Response {
        self.get("/v1/status/scrape").await
    }

    pub async fn get_summarizer_status(&self) -> Response {
        self.get("/v1/status/summarizer").await
    }

    pub async fn get_metrics(&self) -> Response {
        self.get("/metrics").await
    }
}
