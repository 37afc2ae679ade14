//! Common data types for mesh components.
//!
//! These are the values carried over the handshake relay. Their serde
//! representations match the relay's JSON wire format.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of a participant, assigned by the coordinating process.
///
/// The empty identity is reserved for the local record that exists before
/// the coordinating process has assigned one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create an identity from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity of the not-yet-assigned local participant.
    #[must_use]
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    /// Whether this is the anonymous identity.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Directory entry for one participant.
///
/// Serialized as the three-element array `[id, address, isLeader]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "(ParticipantId, String, bool)",
    into = "(ParticipantId, String, bool)"
)]
pub struct ParticipantInfo {
    /// Participant identity.
    pub id: ParticipantId,
    /// Best-effort externally observed address (may be empty).
    pub address: String,
    /// Leader flag computed by the coordinating process.
    pub is_leader: bool,
}

impl ParticipantInfo {
    /// Create a directory entry.
    #[must_use]
    pub fn new(id: impl Into<ParticipantId>, address: impl Into<String>, is_leader: bool) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            is_leader,
        }
    }
}

impl From<(ParticipantId, String, bool)> for ParticipantInfo {
    fn from((id, address, is_leader): (ParticipantId, String, bool)) -> Self {
        Self {
            id,
            address,
            is_leader,
        }
    }
}

impl From<ParticipantInfo> for (ParticipantId, String, bool) {
    fn from(info: ParticipantInfo) -> Self {
        (info.id, info.address, info.is_leader)
    }
}

/// Snapshot of the coordinating process's participant directory.
///
/// Always replaced wholesale; never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Directory(HashMap<ParticipantId, ParticipantInfo>);

impl Directory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry for an identity.
    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&ParticipantInfo> {
        self.0.get(id)
    }

    /// Whether the directory has an entry for the identity.
    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.0.contains_key(id)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all entries (unordered).
    pub fn iter(&self) -> impl Iterator<Item = (&ParticipantId, &ParticipantInfo)> {
        self.0.iter()
    }
}

impl FromIterator<ParticipantInfo> for Directory {
    fn from_iter<I: IntoIterator<Item = ParticipantInfo>>(iter: I) -> Self {
        Self(iter.into_iter().map(|info| (info.id.clone(), info)).collect())
    }
}

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Sent by the initiator.
    Offer,
    /// Sent by the responder in reply to an offer.
    Answer,
}

impl SdpType {
    /// Returns the description type as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// Session description exchanged through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Opaque session description body.
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer.
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer.
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network-path candidate exchanged through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line, e.g. `candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host`.
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Create a candidate with only the candidate line set.
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_info_serializes_as_array() {
        let info = ParticipantInfo::new("abc", "203.0.113.7", true);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json, serde_json::json!(["abc", "203.0.113.7", true]));

        let back: ParticipantInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_directory_from_wire_map() {
        let json = serde_json::json!({
            "a": ["a", "198.51.100.1", true],
            "b": ["b", "", false],
        });

        let directory: Directory = serde_json::from_value(json).unwrap();
        assert_eq!(directory.len(), 2);
        assert!(directory.get(&"a".into()).unwrap().is_leader);
        assert_eq!(directory.get(&"b".into()).unwrap().address, "");
        assert!(!directory.contains(&"c".into()));
    }

    #[test]
    fn test_anonymous_identity() {
        assert!(ParticipantId::anonymous().is_anonymous());
        assert!(!ParticipantId::new("x").is_anonymous());
        assert_eq!(ParticipantId::new("x").to_string(), "x");
    }

    #[test]
    fn test_session_description_wire_shape() {
        let offer = SessionDescription::offer("v=0");
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0"}));

        let parsed: SessionDescription =
            serde_json::from_str(r#"{"type":"answer","sdp":"v=1"}"#).unwrap();
        assert_eq!(parsed, SessionDescription::answer("v=1"));
    }

    #[test]
    fn test_ice_candidate_camel_case_fields() {
        let parsed: IceCandidate = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 udp 1 10.0.0.1 1 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(parsed.sdp_mid.as_deref(), Some("0"));
        assert_eq!(parsed.sdp_mline_index, Some(0));
        assert!(parsed.username_fragment.is_none());

        let json = serde_json::to_value(IceCandidate::new("c")).unwrap();
        assert_eq!(json, serde_json::json!({"candidate": "c"}));
    }
}
