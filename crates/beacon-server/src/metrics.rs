//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use beacon_core::{Delivery, PresenceStats};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const USERS_ONLINE: &str = "beacon_users_online";
    pub const ROSTER_BROADCASTS_TOTAL: &str = "beacon_roster_broadcasts_total";
    pub const MESSAGES_TOTAL: &str = "beacon_messages_total";
    pub const FRAMES_BYTES: &str = "beacon_frames_bytes";
    pub const LATENCY_SECONDS: &str = "beacon_latency_seconds";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with a live connection");
    metrics::describe_counter!(
        names::ROSTER_BROADCASTS_TOTAL,
        "Roster updates fanned out to connected clients"
    );
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Direct messages routed, by delivery outcome"
    );
    metrics::describe_counter!(names::FRAMES_BYTES, "Encoded frame bytes, by direction");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Publish the presence snapshot: online users and total roster broadcasts.
pub fn record_presence(stats: &PresenceStats) {
    gauge!(names::USERS_ONLINE).set(stats.online_users as f64);
    counter!(names::ROSTER_BROADCASTS_TOTAL).absolute(stats.broadcasts);
}

/// Record the outcome of routing a direct message.
pub fn record_delivery(delivery: &Delivery) {
    let outcome = if delivery.is_live() { "live" } else { "deferred" };
    counter!(names::MESSAGES_TOTAL, "delivery" => outcome).increment(1);
}

/// Record encoded frame bytes.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record inbound frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
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
    fn test_recording_without_exporter() {
        let _guard = ConnectionMetricsGuard::new();
        record_delivery(&Delivery::Deferred);
        record_frame(42, "outbound");
        record_presence(&PresenceStats {
            online_users: 3,
            connections: 4,
            broadcasts: 5,
        });
        record_error("test");
    }
}
