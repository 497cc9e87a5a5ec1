// prometheus exporter setup

use metrics::counter;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

pub const INGEST_EVENTS_RECEIVED_TOTAL: &str = "ingest_events_received_total";
pub const INGEST_REQUESTS_DROPPED_TOTAL: &str = "ingest_requests_dropped_total";
pub const INGEST_IDENTIFY_TOTAL: &str = "ingest_identify_total";

pub fn report_event_received() {
    counter!(INGEST_EVENTS_RECEIVED_TOTAL).increment(1);
}

pub fn report_dropped_request(cause: &'static str) {
    counter!(INGEST_REQUESTS_DROPPED_TOTAL, "cause" => cause).increment(1);
}

pub fn report_identify(case: &'static str) {
    counter!(INGEST_IDENTIFY_TOTAL, "case" => case).increment(1);
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )
        .unwrap()
        .install_recorder()
        .unwrap()
}
