//! Relay message types.
//!
//! Every message is one JSON object `{"event": <name>, "data": {...}}`.
//! Identities in the payload always name the *other* participant: inbound
//! messages carry the sender, outbound messages carry the recipient.

use common::types::{Directory, IceCandidate, ParticipantId, SessionDescription};
use serde::{Deserialize, Serialize};

/// Messages from the coordinating process to this participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundMessage {
    /// Identity assignment.
    #[serde(rename = "clientID")]
    IdentityAssigned { id: ParticipantId },

    /// Full directory snapshot.
    #[serde(rename = "information")]
    DirectoryUpdate {
        #[serde(rename = "idToInfo")]
        directory: Directory,
    },

    /// Instruction to connect to a remote participant.
    #[serde(rename = "connectToPeer")]
    ConnectDirective {
        #[serde(rename = "peer_id")]
        remote_id: ParticipantId,
        #[serde(rename = "should_create_offer")]
        should_initiate: bool,
        #[serde(
            rename = "bi_connection",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        bidirectional: Option<bool>,
    },

    /// The remote participant is gone.
    #[serde(rename = "stopConnection")]
    StopConnection {
        #[serde(rename = "peer_id")]
        remote_id: ParticipantId,
    },

    /// Offer or answer from a remote participant.
    #[serde(rename = "sessionDescription")]
    SessionDescription {
        #[serde(rename = "peer_id")]
        remote_id: ParticipantId,
        #[serde(rename = "session_description")]
        description: SessionDescription,
    },

    /// Candidate from a remote participant.
    #[serde(rename = "iceCandidate")]
    Candidate {
        #[serde(rename = "peer_id")]
        remote_id: ParticipantId,
        #[serde(rename = "ice_candidate")]
        candidate: IceCandidate,
    },
}

impl InboundMessage {
    /// Wire event name, used for logs and metric labels.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            InboundMessage::IdentityAssigned { .. } => "clientID",
            InboundMessage::DirectoryUpdate { .. } => "information",
            InboundMessage::ConnectDirective { .. } => "connectToPeer",
            InboundMessage::StopConnection { .. } => "stopConnection",
            InboundMessage::SessionDescription { .. } => "sessionDescription",
            InboundMessage::Candidate { .. } => "iceCandidate",
        }
    }
}

/// Messages from this participant to the coordinating process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundMessage {
    /// Local metadata announcement.
    #[serde(rename = "sendInformation")]
    AnnounceMetadata {
        #[serde(rename = "ip")]
        address: String,
    },

    /// Offer or answer for a remote participant.
    #[serde(rename = "relaySessionDescription")]
    RelaySessionDescription {
        #[serde(rename = "peer_id")]
        remote_id: ParticipantId,
        #[serde(rename = "session_description")]
        description: SessionDescription,
    },

    /// Candidate for a remote participant.
    #[serde(rename = "relayICECandidate")]
    RelayCandidate {
        #[serde(rename = "peer_id")]
        remote_id: ParticipantId,
        #[serde(rename = "ice_candidate")]
        candidate: IceCandidate,
    },

    /// This participant is leaving.
    #[serde(rename = "leave")]
    Depart { id: ParticipantId },
}

impl OutboundMessage {
    /// Wire event name, used for logs and metric labels.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            OutboundMessage::AnnounceMetadata { .. } => "sendInformation",
            OutboundMessage::RelaySessionDescription { .. } => "relaySessionDescription",
            OutboundMessage::RelayCandidate { .. } => "relayICECandidate",
            OutboundMessage::Depart { .. } => "leave",
        }
    }
}

/// Role of the local participant on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the offer.
    Initiator,
    /// Answers the offer.
    Responder,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

/// Instruction to establish a connection with a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub remote_id: ParticipantId,
    pub should_initiate: bool,
    /// `Some(false)` limits media to the initiator; absent means both sides send.
    pub bidirectional: Option<bool>,
}

impl Directive {
    #[must_use]
    pub fn new(remote_id: impl Into<ParticipantId>, should_initiate: bool) -> Self {
        Self {
            remote_id: remote_id.into(),
            should_initiate,
            bidirectional: None,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        if self.should_initiate {
            Role::Initiator
        } else {
            Role::Responder
        }
    }

    /// Whether the local participant attaches its own tracks.
    #[must_use]
    pub fn contributes_local_media(&self) -> bool {
        self.bidirectional.unwrap_or(true) || self.should_initiate
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::ParticipantInfo;
    use serde_json::json;

    #[test]
    fn test_parse_connect_directive() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "event": "connectToPeer",
            "data": {"peer_id": "B", "should_create_offer": true}
        }))
        .unwrap();

        assert_eq!(
            msg,
            InboundMessage::ConnectDirective {
                remote_id: "B".into(),
                should_initiate: true,
                bidirectional: None,
            }
        );
        assert_eq!(msg.event_name(), "connectToPeer");
    }

    #[test]
    fn test_parse_directory_update() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "event": "information",
            "data": {"idToInfo": {"A": ["A", "203.0.113.1", true]}}
        }))
        .unwrap();

        let expected: Directory = [ParticipantInfo::new("A", "203.0.113.1", true)]
            .into_iter()
            .collect();
        assert_eq!(
            msg,
            InboundMessage::DirectoryUpdate {
                directory: expected
            }
        );
    }

    #[test]
    fn test_parse_session_description() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "event": "sessionDescription",
            "data": {"peer_id": "A", "session_description": {"type": "offer", "sdp": "v=0"}}
        }))
        .unwrap();

        assert_eq!(
            msg,
            InboundMessage::SessionDescription {
                remote_id: "A".into(),
                description: SessionDescription::offer("v=0"),
            }
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result = serde_json::from_value::<InboundMessage>(json!({
            "event": "somethingElse",
            "data": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_outbound_wire_shapes() {
        assert_eq!(
            serde_json::to_value(OutboundMessage::AnnounceMetadata {
                address: "203.0.113.7".to_string()
            })
            .unwrap(),
            json!({"event": "sendInformation", "data": {"ip": "203.0.113.7"}})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::Depart { id: "A".into() }).unwrap(),
            json!({"event": "leave", "data": {"id": "A"}})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::RelayCandidate {
                remote_id: "B".into(),
                candidate: IceCandidate::new("candidate:1"),
            })
            .unwrap(),
            json!({
                "event": "relayICECandidate",
                "data": {"peer_id": "B", "ice_candidate": {"candidate": "candidate:1"}}
            })
        );
    }

    #[test]
    fn test_directive_media_contribution() {
        let mut directive = Directive::new("B", false);
        assert!(directive.contributes_local_media());

        directive.bidirectional = Some(false);
        assert!(!directive.contributes_local_media());

        directive.should_initiate = true;
        assert!(directive.contributes_local_media());
        assert_eq!(directive.role(), Role::Initiator);
    }
}
