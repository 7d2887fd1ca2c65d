//! Dispatch and aggregation metrics.
//!
//! Only descriptions and recording live here. Installing an exporter is left
//! to the embedding process.

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register all metric descriptions.
pub fn register_metrics() {
    // Counters
    describe_counter!(
        "raptor_jobs_dispatched_total",
        "Messages published to a dispatch lane"
    );
    describe_counter!(
        "raptor_publish_failures_total",
        "Publishes rejected because the lane exchange was missing or unreachable"
    );
    describe_counter!(
        "raptor_partial_batch_failures_total",
        "Sequence batches aborted after at least one child was dispatched"
    );
    describe_counter!(
        "raptor_child_results_unavailable_total",
        "Child jobs reported in failedJobs during aggregation"
    );
    describe_counter!(
        "raptor_errors_total",
        "Errors constructed, by code and category"
    );

    // Histograms
    describe_histogram!(
        "raptor_batch_size",
        "Number of child jobs produced by one sequence batch"
    );
}

/// Record a successful publish.
pub fn record_job_dispatched(lane: &str) {
    counter!("raptor_jobs_dispatched_total", "lane" => lane.to_string()).increment(1);
}

/// Record a failed publish.
pub fn record_publish_failure(lane: &str) {
    counter!("raptor_publish_failures_total", "lane" => lane.to_string()).increment(1);
}

/// Record an aborted batch.
pub fn record_partial_batch_failure(lane: &str) {
    counter!("raptor_partial_batch_failures_total", "lane" => lane.to_string()).increment(1);
}

/// Record children whose results could not be merged.
pub fn record_child_unavailable(count: u64) {
    if count > 0 {
        counter!("raptor_child_results_unavailable_total").increment(count);
    }
}

/// Record the fan-out of one batch.
pub fn record_batch_size(lane: &str, size: usize) {
    histogram!("raptor_batch_size", "lane" => lane.to_string()).record(size as f64);
}
