//! Negotiation engine capability.
//!
//! The engine owns the real-time transport: it produces and consumes session
//! descriptions and candidates, and reports what happens on the wire through
//! an event subscription. Each handle comes with its own receiver, returned
//! from [`NegotiationEngine::create_handle`] so no event can be missed between
//! creation and subscription.

use crate::errors::PeerError;
use crate::media::{MediaStream, MediaTrack, TrackKind};

use async_trait::async_trait;
use common::types::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;

/// Transport state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineConnectionState {
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events emitted by a negotiation handle.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The local configuration changed; a fresh offer is needed. May fire
    /// any number of times over the handle's lifetime.
    NegotiationNeeded,
    /// A local candidate was gathered. `None` signals end of candidates.
    IceCandidate(Option<IceCandidate>),
    /// A remote track arrived, bundled in `stream`.
    Track { kind: TrackKind, stream: MediaStream },
    /// The transport changed state.
    StateChanged(EngineConnectionState),
}

/// Engine event subscription for one handle.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Factory for negotiation handles.
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    /// Create a handle configured with the given ICE server URLs.
    async fn create_handle(
        &self,
        ice_servers: &[String],
    ) -> Result<(Box<dyn NegotiationHandle>, EngineEvents), PeerError>;
}

/// One negotiated transport towards a single remote participant.
#[async_trait]
pub trait NegotiationHandle: Send + Sync {
    /// Attach a local track. Triggers `NegotiationNeeded`.
    fn add_track(&self, track: &MediaTrack, stream: &MediaStream) -> Result<(), PeerError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&self, description: SessionDescription)
        -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    /// Open a data channel. Used by address discovery to force candidate
    /// gathering without any media.
    async fn create_data_channel(&self, label: &str) -> Result<(), PeerError>;

    /// Release the transport. Idempotent.
    async fn close(&self);
}
