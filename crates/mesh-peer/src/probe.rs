//! Address self-discovery.
//!
//! The externally observed address is whatever a server-reflexive (or relay)
//! candidate reports. [`CandidateAddressProbe`] opens a throwaway negotiation
//! handle, forces candidate gathering with a data channel and an offer, and
//! reads the address from the first candidate that is not a host candidate.

use crate::engine::{EngineEvent, NegotiationEngine};
use crate::errors::PeerError;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Token index of the connection address in a candidate line.
const ADDRESS_FIELD: usize = 4;
/// Token index of the candidate type in a candidate line.
const TYPE_FIELD: usize = 7;

/// Data channel label for the probe handle.
const PROBE_CHANNEL_LABEL: &str = "address-probe";

/// Best-effort address discovery.
#[async_trait]
pub trait AddressProbe: Send + Sync {
    /// Returns the observed address, or an empty string when none resolves.
    async fn probe(&self) -> Result<String, PeerError>;
}

/// Extract the address from a non-host candidate line.
///
/// Candidate lines look like
/// `candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx raddr 0.0.0.0 rport 0`.
/// Returns `None` for host candidates and lines too short to carry a type.
#[must_use]
pub fn parse_candidate_address(candidate: &str) -> Option<String> {
    let fields: Vec<&str> = candidate.split_whitespace().collect();
    let kind = fields.get(TYPE_FIELD)?;
    if *kind == "host" {
        return None;
    }
    fields.get(ADDRESS_FIELD).map(|a| (*a).to_string())
}

/// Address probe driven by the negotiation engine.
pub struct CandidateAddressProbe {
    engine: Arc<dyn NegotiationEngine>,
    ice_servers: Vec<String>,
}

impl CandidateAddressProbe {
    #[must_use]
    pub fn new(engine: Arc<dyn NegotiationEngine>, ice_servers: Vec<String>) -> Self {
        Self {
            engine,
            ice_servers,
        }
    }
}

#[async_trait]
impl AddressProbe for CandidateAddressProbe {
    #[instrument(skip_all, name = "mesh.probe")]
    async fn probe(&self) -> Result<String, PeerError> {
        let (handle, mut events) = self
            .engine
            .create_handle(&self.ice_servers)
            .await
            .map_err(|e| PeerError::CapabilityUnavailable(format!("address probe: {e}")))?;

        let gathering = async {
            handle.create_data_channel(PROBE_CHANNEL_LABEL).await?;
            let offer = handle.create_offer().await?;
            handle.set_local_description(offer).await?;

            while let Some(event) = events.recv().await {
                match event {
                    EngineEvent::IceCandidate(Some(candidate)) => {
                        if let Some(address) = parse_candidate_address(&candidate.candidate) {
                            return Ok(address);
                        }
                    }
                    EngineEvent::IceCandidate(None) => {
                        debug!(target: "mesh.probe", "End of candidates without a reflexive address");
                        return Ok(String::new());
                    }
                    _ => {}
                }
            }

            // Subscription ended before end-of-candidates
            Ok(String::new())
        };

        let result: Result<String, PeerError> = gathering.await;
        handle.close().await;

        match result {
            Ok(address) => {
                debug!(target: "mesh.probe", address = %address, "Address probe finished");
                Ok(address)
            }
            Err(e) => {
                warn!(target: "mesh.probe", error = %e, "Address probe failed");
                Err(PeerError::CapabilityUnavailable(format!("address probe: {e}")))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_srflx_candidate() {
        let line = "candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx raddr 0.0.0.0 rport 0";
        assert_eq!(parse_candidate_address(line), Some("203.0.113.7".to_string()));
    }

    #[test]
    fn test_parse_relay_candidate() {
        let line = "candidate:3 1 udp 41885439 198.51.100.20 3478 typ relay raddr 203.0.113.7 rport 46154";
        assert_eq!(parse_candidate_address(line), Some("198.51.100.20".to_string()));
    }

    #[test]
    fn test_host_candidate_ignored() {
        let line = "candidate:1 1 udp 2122260223 192.168.1.5 54321 typ host generation 0";
        assert_eq!(parse_candidate_address(line), None);
    }

    #[test]
    fn test_short_candidate_ignored() {
        assert_eq!(parse_candidate_address(""), None);
        assert_eq!(parse_candidate_address("candidate:1 1 udp"), None);
    }
}
