//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record a media socket opening.
pub fn record_call_start() {
    metrics::gauge!("calls_active").increment(1.0);
}

/// Record a media socket closing.
pub fn record_call_end() {
    metrics::gauge!("calls_active").decrement(1.0);
}

/// Record one event published by a session bridge.
pub fn record_bridge_event(kind: &'static str) {
    metrics::counter!("bridge_events_total", "kind" => kind).increment(1);
}

/// Record the outcome of a call-control request.
pub fn record_call_control(outcome: &'static str) {
    metrics::counter!("call_control_total", "outcome" => outcome).increment(1);
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}
