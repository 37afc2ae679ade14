//! Message types for actor communication.
//!
//! Requests use `tokio::sync::oneshot` for replies. Relay-driven requests are
//! fire-and-forget and carry `respond_to: None`; failures are then only
//! logged and counted.

use crate::errors::PeerError;
use crate::media::MediaStream;
use crate::relay::{Directive, Role};

use common::types::{Directory, IceCandidate, ParticipantId, SessionDescription};
use tokio::sync::oneshot;

/// Optional reply channel for operations whose caller may not wait.
pub type Responder = Option<oneshot::Sender<Result<(), PeerError>>>;

/// Deliver `result` if anyone is waiting for it.
pub(crate) fn respond(respond_to: Responder, result: Result<(), PeerError>) {
    if let Some(tx) = respond_to {
        let _ = tx.send(result);
    }
}

/// Messages sent to the `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// The coordinating process assigned this participant's identity.
    IdentityAssigned {
        id: ParticipantId,
        respond_to: Responder,
    },

    /// A new directory snapshot.
    DirectoryUpdate {
        directory: Directory,
        respond_to: Responder,
    },

    /// Establish a connection to a remote participant.
    Directive {
        directive: Directive,
        respond_to: Responder,
    },

    /// Tear down the connection to a remote participant.
    StopConnection {
        remote_id: ParticipantId,
        respond_to: Responder,
    },

    /// Offer or answer from a remote participant.
    SessionDescription {
        remote_id: ParticipantId,
        description: SessionDescription,
        respond_to: Responder,
    },

    /// Candidate from a remote participant.
    Candidate {
        remote_id: ParticipantId,
        candidate: IceCandidate,
        respond_to: Responder,
    },

    /// Announce departure and release the relay.
    Depart { respond_to: Responder },

    /// The relay's inbound stream ended.
    RelayDisconnected,

    /// Snapshot of session state (for tests and debugging).
    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },
}

/// Phase of an ongoing negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// Producing and applying a local offer or answer.
    LocalDescription,
    /// Offer sent, waiting for the remote answer.
    RemoteDescription,
    /// Descriptions exchanged, waiting for the transport.
    Connectivity,
}

/// Negotiation state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Created,
    Negotiating(NegotiationPhase),
    Connected,
    Failed,
    Closed,
}

impl NegotiationState {
    /// Returns the state as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Created => "created",
            NegotiationState::Negotiating(NegotiationPhase::LocalDescription) => {
                "negotiating_local_description"
            }
            NegotiationState::Negotiating(NegotiationPhase::RemoteDescription) => {
                "negotiating_remote_description"
            }
            NegotiationState::Negotiating(NegotiationPhase::Connectivity) => {
                "negotiating_connectivity"
            }
            NegotiationState::Connected => "connected",
            NegotiationState::Failed => "failed",
            NegotiationState::Closed => "closed",
        }
    }

    /// Whether the underlying handle has been released.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }
}

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Apply a remote offer or answer.
    RemoteDescription {
        description: SessionDescription,
        respond_to: Responder,
    },

    /// Apply (or buffer) a remote candidate.
    RemoteCandidate {
        candidate: IceCandidate,
        respond_to: Responder,
    },

    /// Current negotiation state.
    GetState {
        respond_to: oneshot::Sender<NegotiationState>,
    },
}

/// Notification from a connection actor to its session.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub remote_id: ParticipantId,
    /// Generation of the connection that produced the event.
    pub generation: u64,
    pub kind: ConnectionEventKind,
}

#[derive(Debug, Clone)]
pub enum ConnectionEventKind {
    /// A video track arrived; the bundled stream should be displayed.
    RemoteStream(MediaStream),
    /// The negotiation state changed.
    StateChanged(NegotiationState),
}

/// One registry entry as seen from outside the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub remote_id: ParticipantId,
    pub role: Role,
    pub generation: u64,
    pub state: NegotiationState,
}

/// Snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Assigned identity, `None` before assignment or after disconnect.
    pub local_id: Option<ParticipantId>,
    pub local_address: String,
    pub directory: Directory,
    /// Connections sorted by remote identity.
    pub connections: Vec<ConnectionSummary>,
    /// Identities with a displayed tile, sorted.
    pub tiles: Vec<ParticipantId>,
    pub departed: bool,
    pub relay_connected: bool,
}

impl SessionState {
    /// The registry entry for `remote_id`, if any.
    #[must_use]
    pub fn connection(&self, remote_id: &ParticipantId) -> Option<&ConnectionSummary> {
        self.connections.iter().find(|c| &c.remote_id == remote_id)
    }
}
