use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `gauge!`, `histogram!`) can be used anywhere in the codebase. The
/// `PrometheusHandle` is retained solely for rendering `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Installs the global Prometheus recorder and registers metric
    /// descriptions. Must be called once at startup.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_counter!(
            "relay_client_requests_total",
            Unit::Count,
            "Total relayed requests processed, by outcome"
        );
        describe_histogram!(
            "relay_client_poll_duration_seconds",
            Unit::Seconds,
            "Duration of each long-poll call to the relay server"
        );
        describe_histogram!(
            "relay_client_backend_duration_seconds",
            Unit::Seconds,
            "Time from backend invocation to the terminal response chunk"
        );
        describe_counter!(
            "relay_client_response_chunks_total",
            Unit::Count,
            "Total response chunks posted to the relay"
        );
        describe_counter!(
            "relay_client_post_retries_total",
            Unit::Count,
            "Total response-chunk post retries due to transient errors"
        );
        describe_gauge!(
            "relay_client_inflight_requests",
            Unit::Count,
            "Number of relayed requests currently being handled"
        );

        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
