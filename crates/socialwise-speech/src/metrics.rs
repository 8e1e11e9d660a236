//! Prometheus metrics for speech sessions.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::session::SessionKind;

/// Install the Prometheus recorder and return the handle used for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record a session whose connection was established.
pub fn record_session_start(kind: SessionKind) {
    metrics::gauge!("speech_sessions_active", "kind" => kind.as_str()).increment(1.0);
}

/// Record a connected session reaching a terminal state.
pub fn record_session_end(kind: SessionKind, outcome: &str, duration_secs: f64) {
    metrics::gauge!("speech_sessions_active", "kind" => kind.as_str()).decrement(1.0);
    record_outcome(kind, outcome);
    metrics::histogram!("speech_session_duration_seconds", "kind" => kind.as_str())
        .record(duration_secs);
}

/// Count a session outcome (`completed` or an error kind label).
pub fn record_outcome(kind: SessionKind, outcome: &str) {
    let labels = [
        ("kind", kind.as_str().to_string()),
        ("outcome", outcome.to_string()),
    ];
    metrics::counter!("speech_sessions_total", &labels).increment(1);
}
