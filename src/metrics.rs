//! Metrics for the ingestion engine.
//!
//! Each stage records through a small unit struct so metric names live in one
//! place. A Prometheus recorder is installed once per process and its handle
//! is kept for rendering at `/metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{info, warn};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Idempotent.
pub fn init_metrics() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if HANDLE.set(handle).is_ok() {
                info!("Prometheus recorder installed");
            }
        }
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }
}

/// Render the current metrics in Prometheus text format.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

pub struct FetchMetrics;

impl FetchMetrics {
    pub fn request_success() {
        ::metrics::counter!("ingest_fetch_requests_total", "outcome" => "success").increment(1);
    }

    pub fn request_error() {
        ::metrics::counter!("ingest_fetch_requests_total", "outcome" => "error").increment(1);
    }

    pub fn retry() {
        ::metrics::counter!("ingest_fetch_retries_total").increment(1);
    }
}

/// What happened to one stub.
#[derive(Debug, Clone, Copy)]
pub enum EventOutcome {
    Created,
    Updated,
    Skipped,
    Rejected,
    Failed,
}

impl EventOutcome {
    fn label(self) -> &'static str {
        match self {
            EventOutcome::Created => "created",
            EventOutcome::Updated => "updated",
            EventOutcome::Skipped => "skipped",
            EventOutcome::Rejected => "rejected",
            EventOutcome::Failed => "failed",
        }
    }
}

pub struct RunMetrics;

impl RunMetrics {
    pub fn run_finished(status: &'static str) {
        ::metrics::counter!("ingest_runs_total", "status" => status).increment(1);
    }

    pub fn lock_contention() {
        ::metrics::counter!("ingest_lock_contention_total").increment(1);
    }

    pub fn event(source: &str, outcome: EventOutcome) {
        ::metrics::counter!(
            "ingest_events_total",
            "source" => source.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
    }

    pub fn source_finished(source: &str, duration_secs: f64, failed: bool) {
        ::metrics::histogram!("ingest_source_duration_seconds", "source" => source.to_string())
            .record(duration_secs);
        if failed {
            ::metrics::counter!("ingest_source_failures_total", "source" => source.to_string())
                .increment(1);
        }
    }

    pub fn archived(count: usize) {
        ::metrics::counter!("ingest_archived_total").increment(count as u64);
    }
}
