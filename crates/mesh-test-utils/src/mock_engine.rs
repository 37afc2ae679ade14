//! Mock negotiation engine.
//!
//! Every handle created by a [`MockEngine`] behaves like a well-behaved
//! transport:
//! - the first `add_track` of a batch queues one `NegotiationNeeded`
//! - the first local description emits a host candidate, a reflexive
//!   candidate carrying the configured address, then end-of-candidates
//! - a remote description emits one audio and one video `Track` event
//! - `Connected` is reported once both descriptions are applied
//!
//! # Example
//!
//! ```rust,ignore
//! use mesh_test_utils::MockEngine;
//!
//! let engine = MockEngine::builder()
//!     .address("203.0.113.9")
//!     .gate_remote_descriptions()
//!     .build();
//!
//! // ... later
//! engine.handle(0).unwrap().calls();
//! engine.open_gate(1);
//! ```

use async_trait::async_trait;
use common::types::{IceCandidate, SessionDescription};
use mesh_peer::engine::{
    EngineConnectionState, EngineEvent, EngineEvents, NegotiationEngine, NegotiationHandle,
};
use mesh_peer::errors::PeerError;
use mesh_peer::media::{MediaStream, MediaTrack, TrackKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};

/// Observable state of one mock handle.
#[derive(Debug)]
pub struct MockHandleState {
    index: usize,
    address: String,
    calls: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    negotiation_queued: AtomicBool,
    local_set: AtomicBool,
    remote_set: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl MockHandleState {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// Calls made on the handle, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether a call with exactly this label was made.
    #[must_use]
    pub fn called(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Inject an engine event, e.g. a transport failure.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn maybe_connect(&self) {
        if self.local_set.load(Ordering::SeqCst)
            && self.remote_set.load(Ordering::SeqCst)
            && !self.connected.swap(true, Ordering::SeqCst)
        {
            self.emit(EngineEvent::StateChanged(EngineConnectionState::Connected));
        }
    }
}

struct MockHandle {
    state: Arc<MockHandleState>,
    gate: Option<Arc<Semaphore>>,
    fail_remote: bool,
}

#[async_trait]
impl NegotiationHandle for MockHandle {
    fn add_track(&self, track: &MediaTrack, _stream: &MediaStream) -> Result<(), PeerError> {
        self.state.record(format!("add_track:{}", track.id));
        if !self.state.negotiation_queued.swap(true, Ordering::SeqCst) {
            self.state.emit(EngineEvent::NegotiationNeeded);
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.state.record("create_offer");
        self.state.negotiation_queued.store(false, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=mock {} 1 IN IP4 0.0.0.0\r\n",
            self.state.index
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.state.record("create_answer");
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=mock {} 2 IN IP4 0.0.0.0\r\n",
            self.state.index
        )))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.state
            .record(format!("set_local:{}", description.sdp_type.as_str()));

        if !self.state.local_set.swap(true, Ordering::SeqCst) {
            let index = self.state.index;
            self.state.emit(EngineEvent::IceCandidate(Some(IceCandidate::new(format!(
                "candidate:{index}1 1 udp 2122260223 192.168.1.{index} 54400 typ host generation 0"
            )))));
            self.state.emit(EngineEvent::IceCandidate(Some(IceCandidate::new(format!(
                "candidate:{index}2 1 udp 1686052607 {} 54401 typ srflx raddr 192.168.1.{index} rport 54400",
                self.state.address
            )))));
            self.state.emit(EngineEvent::IceCandidate(None));
        }

        self.state.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| PeerError::Engine(format!("gate closed: {e}")))?;
        }

        self.state
            .record(format!("set_remote:{}", description.sdp_type.as_str()));

        if self.fail_remote {
            return Err(PeerError::Engine("remote description rejected".to_string()));
        }

        if !self.state.remote_set.swap(true, Ordering::SeqCst) {
            let stream = MediaStream::new(
                format!("remote-{}", self.state.index),
                vec![
                    MediaTrack::new(format!("remote-{}-audio", self.state.index), TrackKind::Audio),
                    MediaTrack::new(format!("remote-{}-video", self.state.index), TrackKind::Video),
                ],
            );
            self.state.emit(EngineEvent::Track {
                kind: TrackKind::Audio,
                stream: stream.clone(),
            });
            self.state.emit(EngineEvent::Track {
                kind: TrackKind::Video,
                stream,
            });
        }

        self.state.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.state
            .record(format!("add_candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<(), PeerError> {
        self.state.record(format!("data_channel:{label}"));
        Ok(())
    }

    async fn close(&self) {
        self.state.record("close");
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

/// Mock negotiation engine.
#[derive(Debug)]
pub struct MockEngine {
    address: String,
    fail_create: bool,
    fail_remote: bool,
    gate: Option<Arc<Semaphore>>,
    handles: Mutex<Vec<Arc<MockHandleState>>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            address: "203.0.113.10".to_string(),
            fail_create: false,
            fail_remote: false,
            gate: None,
            handles: Mutex::new(Vec::new()),
        }
    }
}

impl MockEngine {
    /// Create a new `MockEngine` builder.
    #[must_use]
    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder::default()
    }

    /// State of the `index`-th handle created (0-based).
    #[must_use]
    pub fn handle(&self, index: usize) -> Option<Arc<MockHandleState>> {
        self.handles.lock().unwrap().get(index).cloned()
    }

    /// Number of handles created so far.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Release `permits` gated remote descriptions.
    pub fn open_gate(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }
}

#[async_trait]
impl NegotiationEngine for MockEngine {
    async fn create_handle(
        &self,
        ice_servers: &[String],
    ) -> Result<(Box<dyn NegotiationHandle>, EngineEvents), PeerError> {
        if self.fail_create {
            return Err(PeerError::Engine("engine unavailable".to_string()));
        }

        let (events, rx) = mpsc::unbounded_channel();
        let mut handles = self.handles.lock().unwrap();
        let state = Arc::new(MockHandleState {
            index: handles.len(),
            address: self.address.clone(),
            calls: Mutex::new(vec![format!("create:{}", ice_servers.join(","))]),
            events,
            negotiation_queued: AtomicBool::new(false),
            local_set: AtomicBool::new(false),
            remote_set: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        handles.push(Arc::clone(&state));

        let handle = MockHandle {
            state,
            gate: self.gate.clone(),
            fail_remote: self.fail_remote,
        };
        Ok((Box::new(handle), rx))
    }
}

/// Builder for `MockEngine` configuration.
#[derive(Debug, Default)]
pub struct MockEngineBuilder {
    address: Option<String>,
    fail_create: bool,
    fail_remote: bool,
    gated: bool,
}

impl MockEngineBuilder {
    /// Address carried by the reflexive candidate of every handle.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Make `create_handle` fail.
    #[must_use]
    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Make every remote description fail.
    #[must_use]
    pub fn fail_remote_descriptions(mut self) -> Self {
        self.fail_remote = true;
        self
    }

    /// Hold every remote description until `MockEngine::open_gate`.
    #[must_use]
    pub fn gate_remote_descriptions(mut self) -> Self {
        self.gated = true;
        self
    }

    /// Build the `MockEngine`.
    #[must_use]
    pub fn build(self) -> MockEngine {
        let defaults = MockEngine::default();
        MockEngine {
            address: self.address.unwrap_or(defaults.address),
            fail_create: self.fail_create,
            fail_remote: self.fail_remote,
            gate: self.gated.then(|| Arc::new(Semaphore::new(0))),
            handles: defaults.handles,
        }
    }
}
