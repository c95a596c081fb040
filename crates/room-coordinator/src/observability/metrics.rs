//! Metrics definitions for the Room Coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix for Room Coordinator
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: accepted, rejected
//! - `event`: wire event names (7 values)
//! - `reason`: meeting_mismatch, not_joined, no_peer, malformed, backpressure
//!
//! Meeting identifiers are never used as labels.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Join succeeded.
pub const OUTCOME_ACCEPTED: &str = "accepted";
/// Join was answered with `joined-room{success: false}`.
pub const OUTCOME_REJECTED: &str = "rejected";

/// Relayed event named a different meeting than the sender's room.
pub const DROP_MEETING_MISMATCH: &str = "meeting_mismatch";
/// Event arrived from a connection that has not joined.
pub const DROP_NOT_JOINED: &str = "not_joined";
/// Relay target slot was empty.
pub const DROP_NO_PEER: &str = "no_peer";
/// Frame could not be decoded.
pub const DROP_MALFORMED: &str = "malformed";
/// Recipient's outbound queue was full or closed.
pub const DROP_BACKPRESSURE: &str = "backpressure";

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Metric: `rc_rooms_active` (gauge)
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Metric: `rc_connections_active` (gauge)
pub fn connection_opened() {
    gauge!("rc_connections_active").increment(1.0);
}

/// Metric: `rc_connections_active` (gauge)
pub fn connection_closed() {
    gauge!("rc_connections_active").decrement(1.0);
}

/// Metric: `rc_joins_total{outcome}`
pub fn record_join(outcome: &'static str) {
    counter!("rc_joins_total", "outcome" => outcome).increment(1);
}

/// Metric: `rc_messages_relayed_total{event}`
pub fn record_relayed(event: &'static str) {
    counter!("rc_messages_relayed_total", "event" => event).increment(1);
}

/// Metric: `rc_messages_dropped_total{reason}`
pub fn record_dropped(reason: &'static str) {
    counter!("rc_messages_dropped_total", "reason" => reason).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    #[test]
    fn test_recorded_metrics_have_expected_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_rooms_active(3);
            connection_opened();
            connection_opened();
            connection_closed();
            record_join(OUTCOME_ACCEPTED);
            record_join(OUTCOME_REJECTED);
            record_relayed("offer");
            record_relayed("offer");
            record_dropped(DROP_MEETING_MISMATCH);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let find = |name: &str, label: Option<(&str, &str)>| {
            snapshot.iter().find(|(key, _, _, _)| {
                key.key().name() == name
                    && label.map_or(true, |(k, v)| {
                        key.key().labels().any(|l| l.key() == k && l.value() == v)
                    })
            })
        };

        let (_, _, _, rooms) = find("rc_rooms_active", None).expect("rooms gauge");
        assert_eq!(rooms, &DebugValue::Gauge(3.0.into()));

        let (_, _, _, connections) = find("rc_connections_active", None).expect("conn gauge");
        assert_eq!(connections, &DebugValue::Gauge(1.0.into()));

        let (key, _, _, relayed) =
            find("rc_messages_relayed_total", Some(("event", "offer"))).expect("relay counter");
        assert_eq!(key.kind(), MetricKind::Counter);
        assert_eq!(relayed, &DebugValue::Counter(2));

        assert!(find("rc_joins_total", Some(("outcome", "accepted"))).is_some());
        assert!(find("rc_joins_total", Some(("outcome", "rejected"))).is_some());
        assert!(find("rc_messages_dropped_total", Some(("reason", "meeting_mismatch"))).is_some());
    }
}
