//! Mesh Peer Library
//!
//! Participant-side coordinator for a full-mesh real-time session. Every
//! participant keeps one negotiated connection to every other participant;
//! a coordinating process assigns identities, publishes the directory and
//! tells each pair who makes the offer. This crate:
//!
//! - Tracks the local identity and the participant directory
//! - Runs one negotiation state machine per remote participant
//! - Relays offers, answers and candidates through the handshake relay
//! - Keeps one labeled tile per participant on the display surface
//!
//! # Architecture
//!
//! ```text
//! MeshClient
//! ├── relay pump (inbound relay messages, in order)
//! └── SessionActor (one per participant)
//!     ├── owns identity, directory snapshot and tiles
//!     └── supervises N ConnectionActors
//!         └── ConnectionActor (one per remote participant)
//! ```
//!
//! Media capture, the negotiation engine, address discovery and rendering
//! are capabilities supplied by the host through traits.
//!
//! # Modules
//!
//! - [`actors`] - Session and connection actors
//! - [`client`] - Startup and relay pump
//! - [`config`] - Configuration from environment
//! - [`directory`] - Tile reconciliation against directory snapshots
//! - [`display`] - Display surface capability
//! - [`engine`] - Negotiation engine capability
//! - [`errors`] - Error types
//! - [`media`] - Local media capability
//! - [`observability`] - Metrics
//! - [`probe`] - Address discovery
//! - [`relay`] - Handshake relay messages and transports

pub mod actors;
pub mod client;
pub mod config;
pub mod directory;
pub mod display;
pub mod engine;
pub mod errors;
pub mod media;
pub mod observability;
pub mod probe;
pub mod relay;

pub use client::{Capabilities, MeshClient};
pub use errors::PeerError;
