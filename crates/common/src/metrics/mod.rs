//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all SiTeJo metrics
pub const METRICS_PREFIX: &str = "sitejo";

/// SLO-aligned histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms - P99 target
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s (large uploads)
];

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

    // Workflow metrics
    describe_counter!(
        format!("{}_ticket_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Ticket state machine operations by action"
    );

    describe_counter!(
        format!("{}_letter_numbers_generated_total", METRICS_PREFIX),
        Unit::Count,
        "Letter numbers assigned on approval"
    );

    describe_counter!(
        format!("{}_letter_number_collisions_total", METRICS_PREFIX),
        Unit::Count,
        "Letter number candidates redrawn after a collision"
    );

    describe_counter!(
        format!("{}_letter_verifications_total", METRICS_PREFIX),
        Unit::Count,
        "Public letter verifications by outcome"
    );

    // Document metrics
    describe_counter!(
        format!("{}_document_uploads_total", METRICS_PREFIX),
        Unit::Count,
        "Documents uploaded"
    );

    describe_counter!(
        format!("{}_document_upload_bytes_total", METRICS_PREFIX),
        Unit::Bytes,
        "Bytes stored by document uploads"
    );

    // Auth metrics
    describe_counter!(
        format!("{}_logins_total", METRICS_PREFIX),
        Unit::Count,
        "Login attempts by outcome"
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

/// Record a committed ticket operation
pub fn record_transition(action: &str) {
    counter!(
        format!("{}_ticket_transitions_total", METRICS_PREFIX),
        "action" => action.to_string()
    )
    .increment(1);
}

/// Record a generated letter number and how many candidates collided first
pub fn record_letter_number(category: &str, collisions: u64) {
    counter!(
        format!("{}_letter_numbers_generated_total", METRICS_PREFIX),
        "category" => category.to_string()
    )
    .increment(1);

    if collisions > 0 {
        counter!(format!("{}_letter_number_collisions_total", METRICS_PREFIX)).increment(collisions);
    }
}

/// Record a public verification outcome
pub fn record_verification(outcome: &str) {
    counter!(
        format!("{}_letter_verifications_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a stored document
pub fn record_upload(document_type: &str, bytes: u64) {
    counter!(
        format!("{}_document_uploads_total", METRICS_PREFIX),
        "document_type" => document_type.to_string()
    )
    .increment(1);

    counter!(format!("{}_document_upload_bytes_total", METRICS_PREFIX)).increment(bytes);
}

/// Record a login attempt
pub fn record_login(success: bool) {
    let outcome = if success { "success" } else { "failure" };

    counter!(
        format!("{}_logins_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
        assert!(LATENCY_BUCKETS.contains(&0.250));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op
        let metrics = RequestMetrics::start("GET", "/api/tickets");
        metrics.finish(200);
        record_transition("approve");
        record_letter_number("surat_keterangan", 2);
        record_verification("valid");
        record_upload("attachment", 1024);
        record_login(false);
    }
}
