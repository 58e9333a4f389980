use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const JOBS_CLAIMED: &str = "summary_jobs_claimed_total";
pub const JOBS_COMPLETED: &str = "summary_jobs_completed_total";
pub const JOBS_FAILED: &str = "summary_jobs_failed_total";
pub const JOBS_DEAD_LETTERED: &str = "summary_jobs_dead_lettered_total";
pub const CYCLE_ERRORS: &str = "summary_worker_cycle_errors_total";
pub const GENERATION_SECONDS: &str = "summary_generation_seconds";

/// Register descriptions for the worker's metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(JOBS_CLAIMED, "Summary jobs claimed from the queue");
    metrics::describe_counter!(JOBS_COMPLETED, "Summary jobs completed with a stored summary");
    metrics::describe_counter!(JOBS_FAILED, "Summary jobs marked failed after a generation error");
    metrics::describe_counter!(
        JOBS_DEAD_LETTERED,
        "Summary jobs failed after exhausting their attempts"
    );
    metrics::describe_counter!(CYCLE_ERRORS, "Worker cycles aborted and rolled back");
    metrics::describe_histogram!(GENERATION_SECONDS, "Time spent in a single generation call");
}

/// Install the Prometheus recorder with its own scrape listener.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}
