use axum::{routing::get, Router};
use metrics::{describe_counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "push_success_total",
            "Deliveries that reached their destination."
        );
        describe_counter!(
            "push_fail_total",
            "Deliveries that failed (fetch or transport)."
        );
        describe_counter!("quote_fetch_errors_total", "Provider fetch/decode errors.");
        describe_counter!(
            "almanac_cache_hits_total",
            "Day annotations served from cache."
        );
        describe_counter!("almanac_remote_calls_total", "Remote almanac lookups.");
        describe_counter!(
            "almanac_degraded_total",
            "Annotations degraded after a remote almanac failure."
        );
        describe_counter!("probe_runs_total", "Probe fan-ins executed.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and expose the configured pacing
    /// as a static gauge.
    pub fn init(scheduled_pace_ms: u64) -> Self {
        // Use default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        ensure_metrics_described();
        gauge!("push_pacing_scheduled_ms").set(scheduled_pace_ms as f64);

        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
