//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const MESSAGES_TOTAL: &str = "relay_messages_total";
    pub const MESSAGES_BYTES: &str = "relay_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "relay_rooms_active";
    pub const HANDSHAKES_TOTAL: &str = "relay_handshakes_total";
    pub const HANDSHAKE_SECONDS: &str = "relay_handshake_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since relay start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages relayed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages relayed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_counter!(
        names::HANDSHAKES_TOTAL,
        "Room requests by outcome"
    );
    metrics::describe_histogram!(
        names::HANDSHAKE_SECONDS,
        "Time from upgrade to room assignment in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Serve the Prometheus scrape endpoint on `port`.
///
/// # Errors
///
/// Fails if the exporter cannot bind or a recorder is already installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Count a member connection as open.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Count a member connection as closed.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Count one frame in `direction` (`inbound` or `outbound`).
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Count a room request by outcome and time it.
pub fn record_handshake(outcome: &'static str, seconds: f64) {
    counter!(names::HANDSHAKES_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::HANDSHAKE_SECONDS).record(seconds);
}

pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Keeps a WebSocket connection counted as active for as long as it lives.
pub(crate) struct ConnectionMetricsGuard(());

impl ConnectionMetricsGuard {
    pub(crate) fn open() -> Self {
        record_connection();
        Self(())
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        let _guard = ConnectionMetricsGuard::open();
        record_message(64, "inbound");
        record_handshake("created", 0.01);
        set_active_rooms(3);
        record_error("websocket");
    }
}
