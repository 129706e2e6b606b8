//! Metrics and observability utilities
//!
//! Prometheus metrics for the HTTP surface and the external job lifecycle,
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all WikiDraft metrics
pub const METRICS_PREFIX: &str = "wikidraft";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s - synchronous prompt calls
    60.00,  // 60s
];

/// Buckets for a reconciliation pass (one status call per outstanding job)
pub const RECONCILE_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Job lifecycle event recorded per pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobMetric {
    Submitted,
    Completed,
    Retried,
    Failed,
    SubmissionError,
    StatusError,
}

impl JobMetric {
    fn name(&self) -> &'static str {
        match self {
            JobMetric::Submitted => "jobs_submitted_total",
            JobMetric::Completed => "jobs_completed_total",
            JobMetric::Retried => "jobs_retried_total",
            JobMetric::Failed => "jobs_failed_total",
            JobMetric::SubmissionError => "job_submission_errors_total",
            JobMetric::StatusError => "job_status_errors_total",
        }
    }
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Job metrics
    describe_counter!(
        format!("{}_jobs_submitted_total", METRICS_PREFIX),
        Unit::Count,
        "External jobs accepted by the API"
    );

    describe_counter!(
        format!("{}_jobs_completed_total", METRICS_PREFIX),
        Unit::Count,
        "External jobs observed completed"
    );

    describe_counter!(
        format!("{}_jobs_retried_total", METRICS_PREFIX),
        Unit::Count,
        "External jobs resubmitted after timeout or failure"
    );

    describe_counter!(
        format!("{}_jobs_failed_total", METRICS_PREFIX),
        Unit::Count,
        "External jobs failed after exhausting retries"
    );

    describe_counter!(
        format!("{}_job_submission_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Submission calls rejected or unreachable"
    );

    describe_counter!(
        format!("{}_job_status_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Status queries that errored and were treated as pending"
    );

    describe_histogram!(
        format!("{}_reconcile_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Reconciliation pass latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a job lifecycle event
pub fn record_job(event: JobMetric, stage: &str) {
    counter!(
        format!("{}_{}", METRICS_PREFIX, event.name()),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Helper to record a reconciliation pass
pub fn record_reconcile(duration_secs: f64, stage: &str) {
    histogram!(
        format!("{}_reconcile_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .record(duration_secs);
}
