//! Metric definitions for the mesh peer.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mesh_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a relay message crossing the transport.
///
/// Metric: `mesh_relay_messages_total`
/// Labels: `direction` (inbound, outbound), `message_type` (wire event name)
pub fn record_relay_message(direction: &'static str, message_type: &'static str) {
    counter!("mesh_relay_messages_total",
        "direction" => direction,
        "message_type" => message_type
    )
    .increment(1);
}

/// Record a rejected handshake message.
///
/// Metric: `mesh_protocol_violations_total`
/// Labels: `message_type`
pub fn record_protocol_violation(message_type: &'static str) {
    counter!("mesh_protocol_violations_total", "message_type" => message_type).increment(1);
}

/// Record a negotiation state transition.
///
/// Metric: `mesh_connection_transitions_total`
/// Labels: `state`
pub fn record_connection_transition(state: &'static str) {
    counter!("mesh_connection_transitions_total", "state" => state).increment(1);
}

/// Set the number of connections held by the registry.
///
/// Metric: `mesh_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic mesh sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("mesh_connections_active").set(count as f64);
}

/// Record the time a connection took to reach `Connected`.
///
/// Metric: `mesh_negotiation_duration_seconds`
pub fn record_negotiation_duration(duration: Duration) {
    histogram!("mesh_negotiation_duration_seconds").record(duration.as_secs_f64());
}

/// Record an actor panic event.
///
/// Metric: `mesh_actor_panics_total`
/// Labels: `actor_type`
///
/// Any non-zero value indicates a bug.
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("mesh_actor_panics_total", "actor_type" => actor_type).increment(1);
}
