//! Job execution metrics and the optional Prometheus exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Metric name constants for consistency.
pub mod names {
    /// Job lifecycle events by job type and outcome.
    pub const JOBS_TOTAL: &str = "jobs_total";

    /// Handler run time in seconds by job type and outcome.
    pub const JOB_DURATION_SECONDS: &str = "job_duration_seconds";
}

/// Record a job lifecycle event ("created", "recovered").
pub fn record_job_event(job_type: &str, event: &'static str) {
    counter!(
        names::JOBS_TOTAL,
        "job_type" => job_type.to_string(),
        "outcome" => event
    )
    .increment(1);
}

/// Record the end of one attempt ("completed", "retry", "failed").
pub fn record_attempt(job_type: &str, outcome: &'static str, duration: Duration) {
    record_job_event(job_type, outcome);

    histogram!(
        names::JOB_DURATION_SECONDS,
        "job_type" => job_type.to_string(),
        "outcome" => outcome
    )
    .record(duration.as_secs_f64());
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn install_exporter(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}
