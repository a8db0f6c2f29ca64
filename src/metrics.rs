//! Lightweight metrics helpers for Rudder.
//!
//! Thin wrappers around the `metrics` crate macros. No exporter is embedded
//! here; the application can install any compatible recorder. A small
//! gauge-mirror map keeps the latest per-server health values readable for
//! ad-hoc snapshots and tests.
//!
//! Provided metrics:
//! * `rudder_requests_total` (counter, labels: algorithm, server, outcome)
//! * `rudder_request_duration_seconds` (histogram, label: server)
//! * `rudder_server_health_status` (gauge per server, 1 up / 0 down)
//! * `rudder_server_active_connections` (gauge per server)
use std::{collections::HashMap, sync::Mutex, time::Duration};

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge,
    histogram};
use once_cell::sync::Lazy;

pub const RUDDER_REQUESTS_TOTAL: &str = "rudder_requests_total";
pub const RUDDER_REQUEST_DURATION_SECONDS: &str = "rudder_request_duration_seconds";
pub const RUDDER_SERVER_HEALTH_STATUS: &str = "rudder_server_health_status";
pub const RUDDER_SERVER_ACTIVE_CONNECTIONS: &str = "rudder_server_active_connections";

/// Latest per-server health gauge values, mirrored for snapshot reads.
static SERVER_HEALTH_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_gauge!(
        RUDDER_SERVER_HEALTH_STATUS,
        "Health status of individual backend servers (1 for up, 0 for down)"
    );
    describe_gauge!(
        RUDDER_SERVER_ACTIVE_CONNECTIONS,
        "Number of in-flight connections per backend server."
    );
    describe_counter!(
        RUDDER_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests routed through the balancer."
    );
    describe_histogram!(
        RUDDER_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of requests forwarded to backend servers."
    );

    Mutex::new(HashMap::new())
});

/// Set (and record) the health status gauge for a server.
pub fn set_server_health_status(server: &str, is_up: bool) {
    let health_value = if is_up { 1.0 } else { 0.0 };

    if let Ok(mut gauges) = SERVER_HEALTH_GAUGES.lock() {
        gauges.insert(server.to_string(), health_value);
    } else {
        tracing::error!("Failed to acquire lock for server health gauges");
        return;
    }

    gauge!(RUDDER_SERVER_HEALTH_STATUS, "server" => server.to_string()).set(health_value);
}

/// Update the in-flight connection gauge for a server.
pub fn set_server_active_connections(server: &str, count: u64) {
    gauge!(RUDDER_SERVER_ACTIVE_CONNECTIONS, "server" => server.to_string()).set(count as f64);
}

/// Record one completed request with its latency.
pub fn record_request(algorithm: &str, server: &str, latency_ms: u64, success: bool) {
    counter!(
        RUDDER_REQUESTS_TOTAL,
        "algorithm" => algorithm.to_string(),
        "server" => server.to_string(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
    histogram!(RUDDER_REQUEST_DURATION_SECONDS, "server" => server.to_string())
        .record(Duration::from_millis(latency_ms).as_secs_f64());
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&SERVER_HEALTH_GAUGES);
    tracing::info!("Rudder metrics initialized");
}

/// Snapshot of the mirrored gauge values used for ad-hoc exports.
pub fn get_current_metrics() -> HashMap<String, f64> {
    let mut snapshot = HashMap::new();
    if let Ok(gauges) = SERVER_HEALTH_GAUGES.lock() {
        for (server, health) in gauges.iter() {
            snapshot.insert(format!("server_health_{server}"), *health);
        }
    }
    snapshot
}
