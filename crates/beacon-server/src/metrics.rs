//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter, labels: role).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: role).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Rejected upgrades total (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Outbound frames dropped on a full or closed channel (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Successful registrations total (counter, labels: role).
pub const REGISTRATIONS_TOTAL: &str = "registrations_total";
/// Signaling messages forwarded total (counter, labels: kind).
pub const SIGNALS_FORWARDED_TOTAL: &str = "signals_forwarded_total";
/// Monitoring sessions started total (counter).
pub const SESSIONS_STARTED_TOTAL: &str = "sessions_started_total";
/// Monitoring sessions ended total (counter, labels: reason).
pub const SESSIONS_ENDED_TOTAL: &str = "sessions_ended_total";
/// Producer heartbeat expiries total (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "heartbeat_timeouts_total";
/// Crew events broadcast total (counter, labels: kind).
pub const CREW_EVENTS_TOTAL: &str = "crew_events_total";
/// Rate-limited events total (counter, labels: kind).
pub const RATE_LIMITED_TOTAL: &str = "rate_limited_total";
/// Errors returned to clients total (counter, labels: code).
pub const CLIENT_ERRORS_TOTAL: &str = "client_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_does_not_panic() {
        // Build a recorder + handle without a global install to avoid
        // cross-test conflicts.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n') || output.contains('#'));
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_REJECTED_TOTAL,
            WS_SEND_DROPS_TOTAL,
            REGISTRATIONS_TOTAL,
            SIGNALS_FORWARDED_TOTAL,
            SESSIONS_STARTED_TOTAL,
            SESSIONS_ENDED_TOTAL,
            HEARTBEAT_TIMEOUTS_TOTAL,
            CREW_EVENTS_TOTAL,
            RATE_LIMITED_TOTAL,
            CLIENT_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
