//! Prometheus exposition for identity-service.
//!
//! HTTP metrics come from `service_core::middleware::metrics`; event
//! counters are recorded where events are published and consumed.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const EVENTS_PUBLISHED_TOTAL: &str = "identity_events_published_total";
pub const EVENTS_CONSUMED_TOTAL: &str = "identity_events_consumed_total";
pub const EVENTS_FAILED_TOTAL: &str = "identity_events_failed_total";

/// Install the global Prometheus recorder. Safe to call more than once;
/// only the first call installs.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    if METRICS_HANDLE.set(handle).is_err() {
        tracing::warn!("Metrics handle already initialized");
    }
    Ok(())
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_event_published(topic: &'static str) {
    metrics::counter!(EVENTS_PUBLISHED_TOTAL, "topic" => topic).increment(1);
}

pub fn record_event_consumed(topic: &'static str) {
    metrics::counter!(EVENTS_CONSUMED_TOTAL, "topic" => topic).increment(1);
}

pub fn record_event_failed(topic: &'static str, reason: &'static str) {
    metrics::counter!(EVENTS_FAILED_TOTAL, "topic" => topic, "reason" => reason).increment(1);
}
