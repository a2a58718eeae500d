//! Prometheus metrics exposition
//!
//! Service-level metrics recorded here:
//!
//! - `fetch_requests_total` (counter): labels `route`, `status`
//! - `fetch_request_duration_seconds` (histogram): label `route`
//! - `upstream_errors_total` (counter): label `error_type`
//! - `downloads_total` (counter): label `result`
//! - `download_bytes_total` (counter)
//!
//! The library crates emit `credential_failures_total`,
//! `credential_readmissions_total`, `rate_limit_waits_total` and
//! `gateway_auth_retries_total` through the same recorder.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Buckets span a cached resolve up to a full-size download.
const DURATION_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("fetch_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed API request.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!("fetch_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    metrics::histogram!("fetch_request_duration_seconds", "route" => route).record(duration_secs);
}

/// Record an upstream API error with a classification label.
pub fn record_upstream_error(error_type: &'static str) {
    metrics::counter!("upstream_errors_total", "error_type" => error_type).increment(1);
}

/// Record a finished media download.
pub fn record_download(result: &'static str, bytes: u64) {
    metrics::counter!("downloads_total", "result" => result).increment(1);
    if bytes > 0 {
        metrics::counter!("download_bytes_total").increment(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder; only one global recorder can exist per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("resolve", 200, 0.05);
        record_upstream_error("timeout");
        record_download("ok", 10);
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("resolve", 200, 0.042);
        record_request("downloads", 503, 1.5);

        let output = handle.render();
        assert!(output.contains("fetch_requests_total"));
        assert!(output.contains("route=\"resolve\""));
        assert!(output.contains("status=\"503\""));
        assert!(
            output.contains("fetch_request_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains("le=\"300\""), "download-length bucket must exist");
    }

    #[test]
    fn record_upstream_error_carries_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_upstream_error("exhausted");
        record_upstream_error("auth_rejected");

        let output = handle.render();
        assert!(output.contains("error_type=\"exhausted\""));
        assert!(output.contains("error_type=\"auth_rejected\""));
    }

    #[test]
    fn record_download_counts_bytes() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_download("ok", 4096);
        record_download("too_large", 0);

        let output = handle.render();
        assert!(output.contains("downloads_total{result=\"ok\"} 1"));
        assert!(output.contains("download_bytes_total 4096"));
    }
}
