//! Actor model implementation for a mesh participant.
//!
//! ```text
//! SessionActor (one per participant)
//! ├── owns identity, directory snapshot and tiles
//! └── supervises N ConnectionActors (PeerRegistry)
//!     └── ConnectionActor (one per remote participant)
//!         └── owns one negotiation handle
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: registry, directory and tiles are only touched by the session actor
//! - **CancellationToken propagation**: connection actors run on child tokens
//! - **Generations**: connection events carry the generation of their connection,
//!   so events from a torn-down connection are never applied to its successor
//! - **Mailbox monitoring**: Depth thresholds with metrics (Session: 64/256, Connection: 16/64)
//!
//! # Modules
//!
//! - [`session`] - `SessionActor`, the lifecycle controller
//! - [`connection`] - `ConnectionActor`, the negotiation state machine
//! - [`registry`] - Peer connection registry
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod session;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle, ConnectionContext, ConnectionParams};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use registry::{Connection, PeerRegistry};
pub use session::{SessionActor, SessionHandle, SessionParams};
