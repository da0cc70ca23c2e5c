use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all NewsHub metrics
const PREFIX: &str = "newshub";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Database Metrics
    pub static ref DB_QUERY_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_db_query_duration_seconds"),
            "Database query duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["operation"]
    ).expect("Failed to create db_query_duration_seconds metric");

    pub static ref DB_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_db_errors_total"), "Total storage errors by operation"),
        &["operation"]
    ).expect("Failed to create db_errors_total metric");

    // Scrape Pipeline Metrics
    pub static ref SCRAPE_CYCLES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_scrape_cycles_total"),
        "Total number of completed scrape cycles"
    ).expect("Failed to create scrape_cycles_total metric");

    pub static ref SCRAPE_CYCLES_SKIPPED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_scrape_cycles_skipped_total"),
        "Scrape triggers dropped because a cycle was still running"
    ).expect("Failed to create scrape_cycles_skipped_total metric");

    pub static ref SCRAPE_CYCLE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_scrape_cycle_duration_seconds"),
            "Scrape cycle duration in seconds"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0, 1800.0])
    ).expect("Failed to create scrape_cycle_duration_seconds metric");

    pub static ref SCRAPE_SOURCE_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_scrape_source_runs_total"), "Source fetches by outcome"),
        &["source", "status"]
    ).expect("Failed to create scrape_source_runs_total metric");

    pub static ref SCRAPE_SOURCE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_scrape_source_duration_seconds"),
            "Source fetch duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["source"]
    ).expect("Failed to create scrape_source_duration_seconds metric");

    // Summarizer Pool Metrics
    pub static ref SUMMARIZER_ACTIVE_TASKS: Gauge = Gauge::new(
        format!("{PREFIX}_summarizer_active_tasks"),
        "Summarization tasks currently running in a worker slot"
    ).expect("Failed to create summarizer_active_tasks metric");

    pub static ref SUMMARIZER_QUEUED_TASKS: Gauge = Gauge::new(
        format!("{PREFIX}_summarizer_queued_tasks"),
        "Summarization tasks waiting for a free worker slot"
    ).expect("Failed to create summarizer_queued_tasks metric");

    pub static ref SUMMARIZER_TASKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_summarizer_tasks_total"), "Settled summarization tasks by outcome"),
        &["status"]
    ).expect("Failed to create summarizer_tasks_total metric");

    pub static ref SUMMARIZER_SLOT_RESPAWNS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_summarizer_slot_respawns_total"),
        "Worker slots respawned after a crash"
    ).expect("Failed to create summarizer_slot_respawns_total metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions by outcome"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    pub static ref BACKGROUND_JOB_SKIPPED_TICKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_skipped_ticks_total"), "Ticks skipped because the job was still running"),
        &["job_id"]
    ).expect("Failed to create background_job_skipped_ticks_total metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DB_QUERY_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DB_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SCRAPE_CYCLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SCRAPE_CYCLES_SKIPPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SCRAPE_CYCLE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(SCRAPE_SOURCE_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SCRAPE_SOURCE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(SUMMARIZER_ACTIVE_TASKS.clone()));
    let _ = REGISTRY.register(Box::new(SUMMARIZER_QUEUED_TASKS.clone()));
    let _ = REGISTRY.register(Box::new(SUMMARIZER_TASKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SUMMARIZER_SLOT_RESPAWNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_SKIPPED_TICKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record a database query
pub fn record_db_query(operation: &str, duration: Duration) {
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record a failed database operation
pub fn record_db_error(operation: &str) {
    DB_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}

/// Record a finished scrape cycle
pub fn record_scrape_cycle(duration: Duration) {
    SCRAPE_CYCLES_TOTAL.inc();
    SCRAPE_CYCLE_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_scrape_cycle_skipped() {
    SCRAPE_CYCLES_SKIPPED_TOTAL.inc();
}

/// Record the outcome of a single source fetch
pub fn record_source_run(source: &str, status: &str, duration: Duration) {
    SCRAPE_SOURCE_RUNS_TOTAL
        .with_label_values(&[source, status])
        .inc();
    SCRAPE_SOURCE_DURATION_SECONDS
        .with_label_values(&[source])
        .observe(duration.as_secs_f64());
}

pub fn set_summarizer_load(active: usize, queued: usize) {
    SUMMARIZER_ACTIVE_TASKS.set(active as f64);
    SUMMARIZER_QUEUED_TASKS.set(queued as f64);
}

pub fn record_summarizer_task(status: &str) {
    SUMMARIZER_TASKS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_summarizer_respawn() {
    SUMMARIZER_SLOT_RESPAWNS_TOTAL.inc();
}

/// Record a background job execution
pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_background_job_skipped(job_id: &str) {
    BACKGROUND_JOB_SKIPPED_TICKS_TOTAL
        .with_label_values(&[job_id])
        .inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // Parse the RSS (Resident Set Size) in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
