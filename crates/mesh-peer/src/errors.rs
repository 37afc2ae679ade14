//! Mesh peer error types.
//!
//! Stale references (events for an identity that was just torn down) are not
//! errors: they are logged at debug level and dropped where they are detected.

use thiserror::Error;

/// Mesh peer error type.
#[derive(Debug, Error)]
pub enum PeerError {
    /// A relay message broke the handshake protocol (for example a session
    /// description for an identity with no connection, or an answer with no
    /// outstanding offer). Fatal to that exchange only.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Local media or address discovery failed. Fatal to session start.
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The negotiation engine rejected an operation.
    #[error("Negotiation engine error: {0}")]
    Engine(String),

    /// Relay transport failure.
    #[error("Relay error: {0}")]
    Relay(String),

    /// The relay channel has been released.
    #[error("Relay channel closed")]
    RelayClosed,

    /// A relay message could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Internal error (actor mailbox failures and similar).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PeerError {
    /// Returns a stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            PeerError::ProtocolViolation(_) => "protocol_violation",
            PeerError::CapabilityUnavailable(_) => "capability_unavailable",
            PeerError::Engine(_) => "engine",
            PeerError::Relay(_) | PeerError::RelayClosed => "relay",
            PeerError::Codec(_) => "codec",
            PeerError::Internal(_) => "internal",
        }
    }

    /// Whether the error must abort session start.
    #[must_use]
    pub const fn is_fatal_to_session(&self) -> bool {
        matches!(self, PeerError::CapabilityUnavailable(_))
    }
}

impl From<serde_json::Error> for PeerError {
    fn from(err: serde_json::Error) -> Self {
        PeerError::Codec(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(
            PeerError::ProtocolViolation("x".to_string()).kind(),
            "protocol_violation"
        );
        assert_eq!(
            PeerError::CapabilityUnavailable("camera".to_string()).kind(),
            "capability_unavailable"
        );
        assert_eq!(PeerError::Engine("x".to_string()).kind(), "engine");
        assert_eq!(PeerError::Relay("x".to_string()).kind(), "relay");
        assert_eq!(PeerError::RelayClosed.kind(), "relay");
        assert_eq!(PeerError::Codec("x".to_string()).kind(), "codec");
        assert_eq!(PeerError::Internal("x".to_string()).kind(), "internal");
    }

    #[test]
    fn test_only_capability_errors_are_fatal() {
        assert!(PeerError::CapabilityUnavailable("no camera".to_string()).is_fatal_to_session());
        assert!(!PeerError::ProtocolViolation("x".to_string()).is_fatal_to_session());
        assert!(!PeerError::RelayClosed.is_fatal_to_session());
    }

    #[test]
    fn test_codec_conversion() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let peer_err: PeerError = err.into();
        assert!(matches!(peer_err, PeerError::Codec(_)));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", PeerError::ProtocolViolation("answer without offer".to_string())),
            "Protocol violation: answer without offer"
        );
        assert_eq!(format!("{}", PeerError::RelayClosed), "Relay channel closed");
    }
}
