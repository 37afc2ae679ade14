//! Test fixtures: configuration, directories and running participants.

use crate::mock_display::MockDisplay;
use crate::mock_engine::MockEngine;
use crate::mock_media::MockMedia;
use crate::mock_probe::MockProbe;

use common::types::{Directory, ParticipantId, ParticipantInfo};
use mesh_peer::actors::{NegotiationState, SessionState};
use mesh_peer::config::PeerConfig;
use mesh_peer::relay::RelayConnector;
use mesh_peer::{Capabilities, MeshClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How long `wait_for` polls before failing the test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration suitable for tests: short probe timeout, no negotiation
/// timeout.
#[must_use]
pub fn test_config() -> PeerConfig {
    let vars: HashMap<String, String> = [
        ("MESH_RELAY_ADDRESS", "in-process"),
        ("MESH_ICE_SERVERS", "stun:stun.example.org:3478"),
        ("MESH_ADDRESS_PROBE_TIMEOUT_MS", "200"),
        ("MESH_NEGOTIATION_TIMEOUT_SECONDS", "0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    PeerConfig::from_vars(&vars).expect("test config is valid")
}

/// Build a directory from `(id, address, is_leader)` triples.
#[must_use]
pub fn directory(entries: &[(&str, &str, bool)]) -> Directory {
    entries
        .iter()
        .map(|(id, address, leader)| ParticipantInfo::new(*id, *address, *leader))
        .collect()
}

/// Builder for a participant wired to mocks.
#[derive(Debug)]
pub struct TestParticipant {
    address: String,
    engine: Option<MockEngine>,
    probe: Option<MockProbe>,
    media: Option<MockMedia>,
    config: PeerConfig,
}

impl TestParticipant {
    /// A participant whose address discovery yields `address`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            engine: None,
            probe: None,
            media: None,
            config: test_config(),
        }
    }

    #[must_use]
    pub fn with_engine(mut self, engine: MockEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: MockProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    #[must_use]
    pub fn with_media(mut self, media: MockMedia) -> Self {
        self.media = Some(media);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the participant without waiting for anything.
    ///
    /// # Errors
    ///
    /// Whatever `MeshClient::start` returns.
    pub async fn try_start(
        self,
        connector: &dyn RelayConnector,
    ) -> Result<RunningParticipant, mesh_peer::PeerError> {
        let engine = Arc::new(
            self.engine
                .unwrap_or_else(|| MockEngine::builder().address(self.address.clone()).build()),
        );
        let media = Arc::new(self.media.unwrap_or_default());
        let probe = self
            .probe
            .unwrap_or_else(|| MockProbe::fixed(self.address.clone()));
        let display = MockDisplay::new();

        let capabilities = Capabilities {
            engine: Arc::clone(&engine) as Arc<dyn mesh_peer::engine::NegotiationEngine>,
            media: Arc::clone(&media) as Arc<dyn mesh_peer::media::LocalMedia>,
            probe: Arc::new(probe),
            display: Box::new(display.clone()),
        };

        let client = MeshClient::start(&self.config, capabilities, connector).await?;

        Ok(RunningParticipant {
            client,
            engine,
            media,
            display,
        })
    }

    /// Start the participant and wait until it has an identity.
    pub async fn start(self, connector: &dyn RelayConnector) -> RunningParticipant {
        let participant = self.try_start(connector).await.expect("participant starts");
        participant.wait_for(|s| s.local_id.is_some()).await;
        participant
    }
}

/// A started participant and the mocks behind it.
pub struct RunningParticipant {
    pub client: MeshClient,
    pub engine: Arc<MockEngine>,
    pub media: Arc<MockMedia>,
    pub display: MockDisplay,
}

impl RunningParticipant {
    pub async fn state(&self) -> SessionState {
        self.client.handle().get_state().await.expect("session alive")
    }

    /// Assigned identity.
    pub async fn id(&self) -> ParticipantId {
        self.state().await.local_id.expect("identity assigned")
    }

    /// Poll the session until `condition` holds.
    pub async fn wait_for(&self, condition: impl Fn(&SessionState) -> bool) -> SessionState {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let state = self.state().await;
            if condition(&state) {
                return state;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached, last state: {state:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until exactly `count` connections are `Connected`.
    pub async fn wait_for_connected(&self, count: usize) -> SessionState {
        self.wait_for(|s| {
            s.connections.len() == count
                && s.connections
                    .iter()
                    .all(|c| c.state == NegotiationState::Connected)
        })
        .await
    }
}
