// src/metrics.rs
//! Prometheus recorder setup and one-time metric registration.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once at startup.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");
        ensure_metrics_described();
        Self { handle }
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_cache_hit_total", "Cache hits within the validity window.");
        describe_counter!("digest_cache_miss_total", "Cache misses and forced bypasses.");
        describe_counter!(
            "digest_fetch_errors_total",
            "Content provider fetch failures."
        );
        describe_counter!("dispatch_delivered_total", "Messages delivered.");
        describe_counter!(
            "dispatch_unreachable_total",
            "Sends that hit a blocked or deleted chat."
        );
        describe_counter!(
            "dispatch_transient_total",
            "Sends that failed after the immediate retry."
        );
        describe_counter!("fanout_cycles_total", "Completed fan-out cycles.");
        describe_counter!(
            "fanout_skipped_recipients_total",
            "Recipients with no renderable content in a cycle."
        );
        describe_gauge!("fanout_last_run_ts", "Unix ts of the last fan-out cycle.");
        describe_histogram!("fanout_cycle_ms", "Fan-out cycle duration in milliseconds.");
    });
}
