use anyhow::Result;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::metrics::metrics_handler;
use super::{log_requests, state::*, ServerConfig};
use crate::background_jobs::SchedulerHandle;
use crate::scraping::{CycleReport, SourceOutcome};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Serialize)]
struct SourceOutcomeView {
    source: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    duration_ms: u64,
}

impl From<&SourceOutcome> for SourceOutcomeView {
    fn from(outcome: &SourceOutcome) -> Self {
        let error = match &outcome.status {
            crate::scraping::SourceStatus::Success => None,
            crate::scraping::SourceStatus::Failure(error) => Some(error.clone()),
        };
        SourceOutcomeView {
            source: outcome.source.clone(),
            status: outcome.status.as_str(),
            error,
            duration_ms: outcome.duration.as_millis() as u64,
        }
    }
}

#[derive(Serialize)]
struct CycleReportView {
    id: String,
    started_at: String,
    finished_at: String,
    failures: usize,
    outcomes: Vec<SourceOutcomeView>,
}

impl From<&CycleReport> for CycleReportView {
    fn from(report: &CycleReport) -> Self {
        CycleReportView {
            id: report.id.to_string(),
            started_at: report.started_at.to_rfc3339(),
            finished_at: report.finished_at.to_rfc3339(),
            failures: report.failure_count(),
            outcomes: report.outcomes.iter().map(SourceOutcomeView::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct ScrapeStatus {
    interval_secs: u64,
    is_running: bool,
    last_cycle: Option<CycleReportView>,
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hash: state.hash.clone(),
    };
    Json(stats)
}

/// GET /v1/status/jobs - List maintenance jobs with their last run
async fn list_jobs(State(scheduler_handle): State<SchedulerHandle>) -> impl IntoResponse {
    Json(scheduler_handle.list_jobs().await)
}

/// GET /v1/status/jobs/{id}
async fn get_job(
    State(scheduler_handle): State<SchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    match scheduler_handle.get_job(&job_id).await {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /v1/status/scrape - Scrape cycle state and the last completed cycle
async fn scrape_status(State(scheduler): State<GuardedScrapeScheduler>) -> impl IntoResponse {
    let last_cycle = scheduler.last_report().await;
    Json(ScrapeStatus {
        interval_secs: scheduler.interval().as_secs(),
        is_running: scheduler.is_running(),
        last_cycle: last_cycle.as_ref().map(CycleReportView::from),
    })
}

/// GET /v1/status/summarizer
async fn summarizer_status(State(pool): State<GuardedSummarizerPool>) -> impl IntoResponse {
    Json(pool.stats())
}

pub fn make_app(
    config: ServerConfig,
    scheduler_handle: SchedulerHandle,
    scrape_scheduler: GuardedScrapeScheduler,
    summarizer_pool: GuardedSummarizerPool,
) -> Router {
    let state = ServerState {
        config,
        start_time: Instant::now(),
        hash: env!("GIT_HASH").to_string(),
        scheduler_handle,
        scrape_scheduler,
        summarizer_pool,
    };

    let status_routes: Router = Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/scrape", get(scrape_status))
        .route("/summarizer", get(summarizer_status))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(home))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone())
        .nest("/v1/status", status_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

/// Binds the status listener on localhost.
pub async fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(format!("127.0.0.1:{}", port)).await
}

/// Serves `app` until `shutdown` is cancelled, then drains open connections.
pub async fn run_server(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::jobs::DailyCounterResetJob;
    use crate::background_jobs::{create_scheduler, JobContext, JobSchedule};
    use crate::news_store::{NewsStore, SqliteNewsStore};
    use crate::scraping::{PipelineRunner, ScrapeScheduler};
    use crate::server::RequestsLoggingLevel;
    use crate::summarizer::{LeadSentencesSummarizer, Summarizer, SummarizerPool};
    use axum::{body::Body, http::Request};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        pool: Arc<SummarizerPool>,
        _temp_dir: TempDir,
    }

    async fn make_test_app() -> TestApp {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn NewsStore> =
            Arc::new(SqliteNewsStore::new(temp_dir.path().join("news.db")).unwrap());

        let (mut job_scheduler, scheduler_handle) =
            create_scheduler(JobContext::new(CancellationToken::new(), store));
        job_scheduler
            .register_job(Arc::new(DailyCounterResetJob::new(JobSchedule::Interval(
                Duration::from_secs(3600),
            ))))
            .await;

        let runner = Arc::new(PipelineRunner::new(vec![], Duration::ZERO));
        let scrape_scheduler = Arc::new(ScrapeScheduler::new(runner, Duration::from_secs(600)));

        let pool = Arc::new(
            SummarizerPool::new(
                2,
                Arc::new(|| Box::new(LeadSentencesSummarizer::new(1)) as Box<dyn Summarizer>),
            )
            .unwrap(),
        );

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port: 0,
        };
        let app = make_app(config, scheduler_handle, scrape_scheduler, pool.clone());
        TestApp {
            app,
            pool,
            _temp_dir: temp_dir,
        }
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn formats_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0d 00:00:00");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 01:01:01");
    }

    #[tokio::test]
    async fn health_reports_version() {
        let test_app = make_test_app().await;
        let (status, json) = get_json(&test_app.app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert!(json["uptime"].as_str().unwrap().starts_with("0d"));
        test_app.pool.shutdown().await;
    }

    #[tokio::test]
    async fn lists_registered_jobs() {
        let test_app = make_test_app().await;

        let (status, json) = get_json(&test_app.app, "/v1/status/jobs").await;
        assert_eq!(status, StatusCode::OK);
        let jobs = json.as_array().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["id"], "daily_counters");
        assert_eq!(jobs[0]["schedule"]["expression"], "every 1h");
        assert_eq!(jobs[0]["is_running"], false);

        let (status, json) = get_json(&test_app.app, "/v1/status/jobs/daily_counters").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["last_run"].is_null());

        let (status, _) = get_json(&test_app.app, "/v1/status/jobs/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        test_app.pool.shutdown().await;
    }

    #[tokio::test]
    async fn scrape_status_before_first_cycle() {
        let test_app = make_test_app().await;
        let (status, json) = get_json(&test_app.app, "/v1/status/scrape").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["interval_secs"], 600);
        assert_eq!(json["is_running"], false);
        assert!(json["last_cycle"].is_null());
        test_app.pool.shutdown().await;
    }

    #[tokio::test]
    async fn summarizer_status_reports_capacity() {
        let test_app = make_test_app().await;
        test_app.pool.submit("One. Two.".to_string()).await.unwrap();

        let (status, json) = get_json(&test_app.app, "/v1/status/summarizer").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["capacity"], 2);
        assert_eq!(json["completed"], 1);
        test_app.pool.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let test_app = make_test_app().await;
        let (status, _) = get_json(&test_app.app, "/v1/content/album/123").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        test_app.pool.shutdown().await;
    }
}
