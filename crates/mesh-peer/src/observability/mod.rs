//! Observability for the mesh peer.
//!
//! Logging is installed through [`common::config::ObservabilityConfig::init_tracing`];
//! this module holds the metric definitions. Labels are bounded:
//! - `direction`: 2 values (inbound, outbound)
//! - `message_type`: bounded by relay event names (10 values)
//! - `state`: bounded by negotiation states (7 values)
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mesh_relay_messages_total` | Counter | `direction`, `message_type` | Relay traffic |
//! | `mesh_protocol_violations_total` | Counter | `message_type` | Rejected handshake messages |
//! | `mesh_connection_transitions_total` | Counter | `state` | Negotiation state changes |
//! | `mesh_connections_active` | Gauge | none | Live connections in the registry |
//! | `mesh_negotiation_duration_seconds` | Histogram | none | Time from creation to `Connected` |
//! | `mesh_actor_panics_total` | Counter | `actor_type` | Actor tasks that panicked |

pub mod metrics;

pub use metrics::{
    record_actor_panic, record_connection_transition, record_negotiation_duration,
    record_protocol_violation, record_relay_message, set_connections_active,
};
