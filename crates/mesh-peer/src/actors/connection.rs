//! `ConnectionActor` - negotiation state machine for one remote participant.
//!
//! Each `ConnectionActor`:
//! - Owns exactly one negotiation handle and its engine event subscription
//! - Drives the offer/answer exchange for its role
//! - Relays local candidates and surfaces the remote video stream
//! - Reports state changes to its `SessionActor` tagged with its generation
//!
//! # Lifecycle
//!
//! 1. Spawned by the `SessionActor` on a connect directive
//! 2. Attaches local tracks (when contributing media), then processes events
//! 3. Exits on cancellation (stop), engine failure or negotiation timeout;
//!    the handle is closed on every exit path
//!
//! Every engine call races the cancellation token, so a stop that arrives
//! while a description is being applied abandons the exchange: no answer is
//! relayed and nothing is reported back as live.

use crate::engine::{EngineConnectionState, EngineEvent, EngineEvents, NegotiationHandle};
use crate::errors::PeerError;
use crate::media::{MediaStream, TrackKind};
use crate::observability;
use crate::relay::{OutboundMessage, RelaySender, Role};

use super::messages::{
    respond, ConnectionEvent, ConnectionEventKind, ConnectionMessage, NegotiationPhase,
    NegotiationState, Responder,
};
use super::metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};

use common::types::{IceCandidate, ParticipantId, SdpType, SessionDescription};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Handle to a `ConnectionActor`.
///
/// The mailbox is unbounded: the session actor forwards into it and must
/// never wait on a connection that is stuck inside an engine call.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::UnboundedSender<ConnectionMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    remote_id: ParticipantId,
    generation: u64,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Messages queued and not yet fully processed.
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }

    #[must_use]
    pub fn mailbox_level(&self) -> MailboxLevel {
        self.mailbox.current_level()
    }

    fn send(&self, message: ConnectionMessage) -> Result<(), PeerError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).map_err(|e| {
            self.mailbox.record_rejected();
            PeerError::Internal(format!("channel send failed: {e}"))
        })
    }

    /// Forward a remote offer or answer.
    pub fn send_description(
        &self,
        description: SessionDescription,
        respond_to: Responder,
    ) -> Result<(), PeerError> {
        self.send(ConnectionMessage::RemoteDescription {
            description,
            respond_to,
        })
    }

    /// Forward a remote candidate.
    pub fn send_candidate(
        &self,
        candidate: IceCandidate,
        respond_to: Responder,
    ) -> Result<(), PeerError> {
        self.send(ConnectionMessage::RemoteCandidate {
            candidate,
            respond_to,
        })
    }

    /// Get the current negotiation state.
    pub async fn get_state(&self) -> Result<NegotiationState, PeerError> {
        let (tx, rx) = oneshot::channel();
        self.send(ConnectionMessage::GetState { respond_to: tx })?;

        rx.await
            .map_err(|e| PeerError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Per-connection parameters fixed at creation.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub remote_id: ParticipantId,
    pub role: Role,
    pub generation: u64,
    /// Local stream whose tracks are attached before any event is processed.
    pub local_media: Option<MediaStream>,
    pub negotiation_timeout: Option<Duration>,
}

/// Collaborators shared by every connection of a session.
#[derive(Clone)]
pub struct ConnectionContext {
    pub relay: Arc<dyn RelaySender>,
    pub events: mpsc::UnboundedSender<ConnectionEvent>,
    pub metrics: Arc<ActorMetrics>,
}

/// Whether the run loop keeps going after handling something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Why an engine step did not complete.
enum Interrupted {
    Cancelled,
    TimedOut,
    Failed(PeerError),
}

/// Run an engine operation unless the connection is stopped or the
/// negotiation deadline passes first.
async fn guarded<T>(
    token: &CancellationToken,
    deadline: Option<Instant>,
    operation: impl Future<Output = Result<T, PeerError>>,
) -> Result<T, Interrupted> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Interrupted::Cancelled),
        () = sleep_until_deadline(deadline) => Err(Interrupted::TimedOut),
        result = operation => result.map_err(Interrupted::Failed),
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    remote_id: ParticipantId,
    role: Role,
    generation: u64,
    local_media: Option<MediaStream>,
    handle: Box<dyn NegotiationHandle>,
    engine_events: EngineEvents,
    engine_events_open: bool,
    receiver: mpsc::UnboundedReceiver<ConnectionMessage>,
    /// Cancellation token (child of the session's token).
    cancel_token: CancellationToken,
    context: ConnectionContext,
    mailbox: Arc<MailboxMonitor>,
    state: NegotiationState,
    /// Local offer sent, answer not yet applied.
    offer_outstanding: bool,
    /// Renegotiation requested while an offer was outstanding.
    renegotiate_after_answer: bool,
    remote_description_set: bool,
    /// Remote candidates received before the first remote description.
    pending_candidates: Vec<IceCandidate>,
    /// Last transport state reported by the engine.
    transport_connected: bool,
    created_at: Instant,
    connected_once: bool,
    /// Cleared once `Connected` is reached.
    deadline: Option<Instant>,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// `engine_events` must be the subscription returned together with
    /// `handle`, so that no event is lost before the actor starts.
    pub fn spawn(
        params: ConnectionParams,
        handle: Box<dyn NegotiationHandle>,
        engine_events: EngineEvents,
        cancel_token: CancellationToken,
        context: ConnectionContext,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let created_at = Instant::now();
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Connection,
            params.remote_id.as_str(),
        ));

        let actor = Self {
            remote_id: params.remote_id.clone(),
            role: params.role,
            generation: params.generation,
            local_media: params.local_media,
            handle,
            engine_events,
            engine_events_open: true,
            receiver,
            cancel_token: cancel_token.clone(),
            context,
            mailbox: Arc::clone(&mailbox),
            state: NegotiationState::Created,
            offer_outstanding: false,
            renegotiate_after_answer: false,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            transport_connected: false,
            created_at,
            connected_once: false,
            deadline: params.negotiation_timeout.map(|t| created_at + t),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            mailbox,
            remote_id: params.remote_id,
            generation: params.generation,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "mesh.actor.connection",
        fields(
            remote_id = %self.remote_id,
            role = self.role.as_str(),
            generation = self.generation
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "mesh.actor.connection",
            remote_id = %self.remote_id,
            role = self.role.as_str(),
            generation = self.generation,
            "ConnectionActor started"
        );
        observability::record_connection_transition(self.state.as_str());

        let mut flow = self.attach_local_tracks();

        while flow == Flow::Continue {
            flow = tokio::select! {
                biased;

                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "mesh.actor.connection",
                        remote_id = %self.remote_id,
                        "ConnectionActor received cancellation signal"
                    );
                    Flow::Exit
                }

                () = sleep_until_deadline(self.deadline) => {
                    warn!(
                        target: "mesh.actor.connection",
                        remote_id = %self.remote_id,
                        state = self.state.as_str(),
                        "Negotiation timed out"
                    );
                    self.set_state(NegotiationState::Failed);
                    Flow::Exit
                }

                event = self.engine_events.recv(), if self.engine_events_open => {
                    match event {
                        Some(event) => self.handle_engine_event(event).await,
                        None => {
                            debug!(
                                target: "mesh.actor.connection",
                                remote_id = %self.remote_id,
                                "Engine event subscription ended"
                            );
                            self.engine_events_open = false;
                            Flow::Continue
                        }
                    }
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let flow = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.context.metrics.record_message_processed();
                            flow
                        }
                        None => {
                            debug!(
                                target: "mesh.actor.connection",
                                remote_id = %self.remote_id,
                                "All handles dropped, exiting"
                            );
                            Flow::Exit
                        }
                    }
                }
            };
        }

        self.handle.close().await;
        if self.state != NegotiationState::Failed {
            self.set_state(NegotiationState::Closed);
        }

        debug!(
            target: "mesh.actor.connection",
            remote_id = %self.remote_id,
            generation = self.generation,
            state = self.state.as_str(),
            "ConnectionActor stopped"
        );
    }

    fn attach_local_tracks(&mut self) -> Flow {
        let Some(stream) = self.local_media.take() else {
            return Flow::Continue;
        };

        for track in &stream.tracks {
            if let Err(e) = self.handle.add_track(track, &stream) {
                warn!(
                    target: "mesh.actor.connection",
                    remote_id = %self.remote_id,
                    track_id = %track.id,
                    error = %e,
                    "Failed to attach local track"
                );
                self.set_state(NegotiationState::Failed);
                return Flow::Exit;
            }
        }

        debug!(
            target: "mesh.actor.connection",
            remote_id = %self.remote_id,
            tracks = stream.tracks.len(),
            "Local tracks attached"
        );
        Flow::Continue
    }

    async fn handle_message(&mut self, message: ConnectionMessage) -> Flow {
        match message {
            ConnectionMessage::RemoteDescription {
                description,
                respond_to,
            } => {
                let (flow, result) = self.handle_remote_description(description).await;
                respond(respond_to, result);
                flow
            }

            ConnectionMessage::RemoteCandidate {
                candidate,
                respond_to,
            } => {
                let (flow, result) = self.handle_remote_candidate(candidate).await;
                respond(respond_to, result);
                flow
            }

            ConnectionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state);
                Flow::Continue
            }
        }
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) -> Flow {
        match event {
            EngineEvent::NegotiationNeeded => {
                if self.role == Role::Responder {
                    debug!(
                        target: "mesh.actor.connection",
                        remote_id = %self.remote_id,
                        "Renegotiation needed, waiting for the initiator"
                    );
                    Flow::Continue
                } else if self.offer_outstanding {
                    debug!(
                        target: "mesh.actor.connection",
                        remote_id = %self.remote_id,
                        "Renegotiation deferred until the answer arrives"
                    );
                    self.renegotiate_after_answer = true;
                    Flow::Continue
                } else {
                    self.create_and_send_offer().await
                }
            }

            EngineEvent::IceCandidate(Some(candidate)) => {
                self.relay_send(OutboundMessage::RelayCandidate {
                    remote_id: self.remote_id.clone(),
                    candidate,
                });
                Flow::Continue
            }

            EngineEvent::IceCandidate(None) => {
                debug!(
                    target: "mesh.actor.connection",
                    remote_id = %self.remote_id,
                    "Local candidate gathering complete"
                );
                Flow::Continue
            }

            EngineEvent::Track { kind, stream } => {
                // Audio arrives bundled in the same stream
                if kind == TrackKind::Video {
                    self.emit(ConnectionEventKind::RemoteStream(stream));
                }
                Flow::Continue
            }

            EngineEvent::StateChanged(engine_state) => self.handle_engine_state(engine_state),
        }
    }

    fn handle_engine_state(&mut self, engine_state: EngineConnectionState) -> Flow {
        match engine_state {
            EngineConnectionState::Connected => {
                self.transport_connected = true;
                if self.state == NegotiationState::Negotiating(NegotiationPhase::Connectivity) {
                    self.set_state(NegotiationState::Connected);
                }
                Flow::Continue
            }
            EngineConnectionState::Disconnected => {
                debug!(
                    target: "mesh.actor.connection",
                    remote_id = %self.remote_id,
                    "Transport disconnected"
                );
                self.transport_connected = false;
                Flow::Continue
            }
            EngineConnectionState::Failed | EngineConnectionState::Closed => {
                warn!(
                    target: "mesh.actor.connection",
                    remote_id = %self.remote_id,
                    engine_state = ?engine_state,
                    "Transport failed"
                );
                self.set_state(NegotiationState::Failed);
                Flow::Exit
            }
        }
    }

    async fn create_and_send_offer(&mut self) -> Flow {
        self.set_state(NegotiationState::Negotiating(
            NegotiationPhase::LocalDescription,
        ));

        let offer = match guarded(
            &self.cancel_token,
            self.deadline,
            self.handle.create_offer(),
        )
        .await
        {
            Ok(offer) => offer,
            Err(interrupted) => return self.abort("create_offer", interrupted).0,
        };

        if let Err(interrupted) = guarded(
            &self.cancel_token,
            self.deadline,
            self.handle.set_local_description(offer.clone()),
        )
        .await
        {
            return self.abort("set_local_description", interrupted).0;
        }

        self.offer_outstanding = true;
        self.set_state(NegotiationState::Negotiating(
            NegotiationPhase::RemoteDescription,
        ));
        self.relay_send(OutboundMessage::RelaySessionDescription {
            remote_id: self.remote_id.clone(),
            description: offer,
        });

        Flow::Continue
    }

    async fn handle_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> (Flow, Result<(), PeerError>) {
        let sdp_type = description.sdp_type;

        match sdp_type {
            SdpType::Offer if self.role == Role::Initiator => {
                return (
                    Flow::Continue,
                    Err(self.violation("offer received by the initiating side")),
                );
            }
            SdpType::Answer if !self.offer_outstanding => {
                return (
                    Flow::Continue,
                    Err(self.violation("answer received with no outstanding offer")),
                );
            }
            _ => {}
        }

        debug!(
            target: "mesh.actor.connection",
            remote_id = %self.remote_id,
            sdp_type = sdp_type.as_str(),
            "Applying remote description"
        );

        self.set_state(NegotiationState::Negotiating(
            NegotiationPhase::RemoteDescription,
        ));
        if let Err(interrupted) = guarded(
            &self.cancel_token,
            self.deadline,
            self.handle.set_remote_description(description),
        )
        .await
        {
            return self.abort("set_remote_description", interrupted);
        }

        self.remote_description_set = true;
        let (flow, result) = self.flush_pending_candidates().await;
        if flow == Flow::Exit {
            return (flow, result);
        }

        match sdp_type {
            SdpType::Offer => self.answer_offer().await,
            SdpType::Answer => {
                self.offer_outstanding = false;
                self.settle();
                if self.renegotiate_after_answer {
                    self.renegotiate_after_answer = false;
                    (self.create_and_send_offer().await, Ok(()))
                } else {
                    (Flow::Continue, Ok(()))
                }
            }
        }
    }

    async fn answer_offer(&mut self) -> (Flow, Result<(), PeerError>) {
        self.set_state(NegotiationState::Negotiating(
            NegotiationPhase::LocalDescription,
        ));

        let answer = match guarded(
            &self.cancel_token,
            self.deadline,
            self.handle.create_answer(),
        )
        .await
        {
            Ok(answer) => answer,
            Err(interrupted) => return self.abort("create_answer", interrupted),
        };

        if let Err(interrupted) = guarded(
            &self.cancel_token,
            self.deadline,
            self.handle.set_local_description(answer.clone()),
        )
        .await
        {
            return self.abort("set_local_description", interrupted);
        }

        self.relay_send(OutboundMessage::RelaySessionDescription {
            remote_id: self.remote_id.clone(),
            description: answer,
        });
        self.settle();

        (Flow::Continue, Ok(()))
    }

    async fn handle_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> (Flow, Result<(), PeerError>) {
        if !self.remote_description_set {
            debug!(
                target: "mesh.actor.connection",
                remote_id = %self.remote_id,
                buffered = self.pending_candidates.len() + 1,
                "Buffering remote candidate until the remote description is applied"
            );
            self.pending_candidates.push(candidate);
            return (Flow::Continue, Ok(()));
        }

        match guarded(
            &self.cancel_token,
            self.deadline,
            self.handle.add_ice_candidate(candidate),
        )
        .await
        {
            Ok(()) => (Flow::Continue, Ok(())),
            Err(Interrupted::Failed(e)) => {
                warn!(
                    target: "mesh.actor.connection",
                    remote_id = %self.remote_id,
                    error = %e,
                    "Remote candidate rejected"
                );
                (Flow::Continue, Err(e))
            }
            Err(interrupted) => self.abort("add_ice_candidate", interrupted),
        }
    }

    async fn flush_pending_candidates(&mut self) -> (Flow, Result<(), PeerError>) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            match guarded(
                &self.cancel_token,
                self.deadline,
                self.handle.add_ice_candidate(candidate),
            )
            .await
            {
                Ok(()) => {}
                Err(Interrupted::Failed(e)) => {
                    warn!(
                        target: "mesh.actor.connection",
                        remote_id = %self.remote_id,
                        error = %e,
                        "Buffered remote candidate rejected"
                    );
                }
                Err(interrupted) => return self.abort("add_ice_candidate", interrupted),
            }
        }
        (Flow::Continue, Ok(()))
    }

    /// Descriptions exchanged: connected if the transport already is.
    fn settle(&mut self) {
        if self.transport_connected {
            self.set_state(NegotiationState::Connected);
        } else {
            self.set_state(NegotiationState::Negotiating(NegotiationPhase::Connectivity));
        }
    }

    fn abort(
        &mut self,
        operation: &'static str,
        interrupted: Interrupted,
    ) -> (Flow, Result<(), PeerError>) {
        match interrupted {
            Interrupted::Cancelled => {
                debug!(
                    target: "mesh.actor.connection",
                    remote_id = %self.remote_id,
                    operation,
                    "Negotiation abandoned, connection stopped"
                );
                (Flow::Exit, Ok(()))
            }
            Interrupted::TimedOut => {
                warn!(
                    target: "mesh.actor.connection",
                    remote_id = %self.remote_id,
                    operation,
                    state = self.state.as_str(),
                    "Negotiation timed out"
                );
                self.set_state(NegotiationState::Failed);
                (
                    Flow::Exit,
                    Err(PeerError::Engine(format!(
                        "negotiation timed out during {operation}"
                    ))),
                )
            }
            Interrupted::Failed(e) => {
                warn!(
                    target: "mesh.actor.connection",
                    remote_id = %self.remote_id,
                    operation,
                    error = %e,
                    "Negotiation step failed"
                );
                self.set_state(NegotiationState::Failed);
                (Flow::Exit, Err(e))
            }
        }
    }

    fn violation(&self, reason: &str) -> PeerError {
        warn!(
            target: "mesh.actor.connection",
            remote_id = %self.remote_id,
            role = self.role.as_str(),
            state = self.state.as_str(),
            reason,
            "Protocol violation"
        );
        self.context.metrics.record_violation();
        observability::record_protocol_violation("sessionDescription");
        PeerError::ProtocolViolation(format!("{reason} (remote {})", self.remote_id))
    }

    fn relay_send(&self, message: OutboundMessage) {
        if self.cancel_token.is_cancelled() {
            debug!(
                target: "mesh.actor.connection",
                remote_id = %self.remote_id,
                event = message.event_name(),
                "Suppressing relay send for stopped connection"
            );
            return;
        }

        if let Err(e) = self.context.relay.send(message) {
            debug!(
                target: "mesh.actor.connection",
                remote_id = %self.remote_id,
                error = %e,
                "Relay send failed"
            );
        }
    }

    fn set_state(&mut self, state: NegotiationState) {
        if self.state == state {
            return;
        }

        debug!(
            target: "mesh.actor.connection",
            remote_id = %self.remote_id,
            from = self.state.as_str(),
            to = state.as_str(),
            "Negotiation state changed"
        );

        if state == NegotiationState::Connected && !self.connected_once {
            self.connected_once = true;
            self.deadline = None;
            observability::record_negotiation_duration(self.created_at.elapsed());
        }

        self.state = state;
        observability::record_connection_transition(state.as_str());
        self.emit(ConnectionEventKind::StateChanged(state));
    }

    fn emit(&self, kind: ConnectionEventKind) {
        let _ = self.context.events.send(ConnectionEvent {
            remote_id: self.remote_id.clone(),
            generation: self.generation,
            kind,
        });
    }
}
