//! `SessionActor` - lifecycle controller for one participant.
//!
//! The `SessionActor`:
//! - Owns the identity, the directory snapshot, the peer registry and the tiles
//! - Reacts to relay events and to events from its connection actors
//! - Supervises one `ConnectionActor` per remote participant
//!
//! # Stale events
//!
//! A stop, a departure or a relay disconnect can overtake messages already in
//! flight. Connection events carry the generation of the connection that
//! produced them and are dropped when the registry no longer holds that
//! generation. Descriptions and candidates for a recently torn-down identity
//! are dropped quietly; for an identity never connected they are protocol
//! violations.

use super::connection::{ConnectionActor, ConnectionContext, ConnectionParams};
use super::messages::{
    respond, ConnectionEvent, ConnectionEventKind, NegotiationState, Responder, SessionMessage,
    SessionState,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::{Connection, PeerRegistry};
use crate::directory::TileBook;
use crate::display::DisplaySurface;
use crate::engine::NegotiationEngine;
use crate::errors::PeerError;
use crate::media::MediaStream;
use crate::observability;
use crate::relay::{Directive, InboundMessage, OutboundMessage, RelaySender};

use common::types::{Directory, IceCandidate, ParticipantId, SessionDescription};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 500;

/// How long a stopped connection actor gets to close its handle.
const CONNECTION_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of torn-down identities remembered for stale detection.
const RETIRED_CAPACITY: usize = 256;

/// Departure announcement shared by the actor and its handles.
///
/// `leave` goes straight to the relay sender so that it is written even when
/// the actor never gets to run again.
struct Departure {
    relay: Arc<dyn RelaySender>,
    local_id: Mutex<Option<ParticipantId>>,
    departed: AtomicBool,
}

impl Departure {
    fn new(relay: Arc<dyn RelaySender>) -> Self {
        Self {
            relay,
            local_id: Mutex::new(None),
            departed: AtomicBool::new(false),
        }
    }

    fn set_local_id(&self, id: Option<ParticipantId>) {
        *self.local_id.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    fn is_departed(&self) -> bool {
        self.departed.load(Ordering::SeqCst)
    }

    /// Send `leave` and close the relay. Returns false if already done.
    fn announce(&self) -> bool {
        if self.departed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let local_id = self
            .local_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(id) = local_id {
            info!(target: "mesh.actor.session", participant_id = %id, "Departing");
            if let Err(e) = self.relay.send(OutboundMessage::Depart { id }) {
                warn!(target: "mesh.actor.session", error = %e, "Failed to announce departure");
            }
        }
        self.relay.close();
        true
    }
}

impl std::fmt::Debug for Departure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Departure")
            .field("departed", &self.is_departed())
            .finish_non_exhaustive()
    }
}

/// Handle to the `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    departure: Arc<Departure>,
}

impl SessionHandle {
    async fn send(&self, message: SessionMessage) -> Result<(), PeerError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_rejected();
            PeerError::Internal(format!("channel send failed: {e}"))
        })
    }

    async fn request(
        &self,
        build: impl FnOnce(Responder) -> SessionMessage,
    ) -> Result<(), PeerError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(Some(tx))).await?;

        rx.await
            .map_err(|e| PeerError::Internal(format!("response receive failed: {e}")))?
    }

    /// Store the assigned identity and announce local metadata.
    pub async fn on_identity_assigned(&self, id: ParticipantId) -> Result<(), PeerError> {
        self.request(|respond_to| SessionMessage::IdentityAssigned { id, respond_to })
            .await
    }

    /// Replace the directory snapshot and reconcile tiles.
    pub async fn on_directory_update(&self, directory: Directory) -> Result<(), PeerError> {
        self.request(|respond_to| SessionMessage::DirectoryUpdate {
            directory,
            respond_to,
        })
        .await
    }

    /// Establish a connection unless one exists.
    pub async fn on_directive(&self, directive: Directive) -> Result<(), PeerError> {
        self.request(|respond_to| SessionMessage::Directive {
            directive,
            respond_to,
        })
        .await
    }

    /// Tear down the connection to `remote_id`. Idempotent.
    pub async fn on_stop_connection(&self, remote_id: ParticipantId) -> Result<(), PeerError> {
        self.request(|respond_to| SessionMessage::StopConnection {
            remote_id,
            respond_to,
        })
        .await
    }

    /// Apply a remote description; resolves once the exchange step is done.
    pub async fn on_session_description(
        &self,
        remote_id: ParticipantId,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.request(|respond_to| SessionMessage::SessionDescription {
            remote_id,
            description,
            respond_to,
        })
        .await
    }

    /// Apply (or buffer) a remote candidate.
    pub async fn on_candidate(
        &self,
        remote_id: ParticipantId,
        candidate: IceCandidate,
    ) -> Result<(), PeerError> {
        self.request(|respond_to| SessionMessage::Candidate {
            remote_id,
            candidate,
            respond_to,
        })
        .await
    }

    /// Announce departure, tear everything down and release the relay.
    pub async fn on_depart(&self) -> Result<(), PeerError> {
        self.request(|respond_to| SessionMessage::Depart { respond_to })
            .await
    }

    /// Depart without waiting. Usable from synchronous teardown.
    ///
    /// `leave` is handed to the relay before this returns; connection
    /// teardown is left to the actor.
    pub fn request_depart(&self) {
        self.departure.announce();

        self.mailbox.record_enqueue();
        if let Err(e) = self
            .sender
            .try_send(SessionMessage::Depart { respond_to: None })
        {
            self.mailbox.record_rejected();
            warn!(target: "mesh.actor.session", error = %e, "Could not queue connection teardown");
        }
    }

    /// Notify the session that the relay's inbound stream ended.
    pub async fn on_relay_disconnected(&self) -> Result<(), PeerError> {
        self.send(SessionMessage::RelayDisconnected).await
    }

    /// Queue an inbound relay message without waiting for its outcome.
    pub async fn dispatch(&self, message: InboundMessage) -> Result<(), PeerError> {
        let message = match message {
            InboundMessage::IdentityAssigned { id } => SessionMessage::IdentityAssigned {
                id,
                respond_to: None,
            },
            InboundMessage::DirectoryUpdate { directory } => SessionMessage::DirectoryUpdate {
                directory,
                respond_to: None,
            },
            InboundMessage::ConnectDirective {
                remote_id,
                should_initiate,
                bidirectional,
            } => SessionMessage::Directive {
                directive: Directive {
                    remote_id,
                    should_initiate,
                    bidirectional,
                },
                respond_to: None,
            },
            InboundMessage::StopConnection { remote_id } => SessionMessage::StopConnection {
                remote_id,
                respond_to: None,
            },
            InboundMessage::SessionDescription {
                remote_id,
                description,
            } => SessionMessage::SessionDescription {
                remote_id,
                description,
                respond_to: None,
            },
            InboundMessage::Candidate {
                remote_id,
                candidate,
            } => SessionMessage::Candidate {
                remote_id,
                candidate,
                respond_to: None,
            },
        };

        self.send(message).await
    }

    /// Get a snapshot of the session.
    pub async fn get_state(&self) -> Result<SessionState, PeerError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::GetState { respond_to: tx }).await?;

        rx.await
            .map_err(|e| PeerError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the session actor and every connection actor under it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Everything a session needs, acquired before the relay is connected.
pub struct SessionParams {
    /// Result of address discovery (may be empty).
    pub local_address: String,
    pub local_media: MediaStream,
    pub engine: Arc<dyn NegotiationEngine>,
    pub relay: Arc<dyn RelaySender>,
    pub display: Box<dyn DisplaySurface>,
    pub ice_servers: Vec<String>,
    pub negotiation_timeout: Option<Duration>,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    receiver: mpsc::Receiver<SessionMessage>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    cancel_token: CancellationToken,
    local_id: Option<ParticipantId>,
    local_address: String,
    local_media: MediaStream,
    directory: Directory,
    registry: PeerRegistry,
    tiles: TileBook,
    engine: Arc<dyn NegotiationEngine>,
    relay: Arc<dyn RelaySender>,
    ice_servers: Vec<String>,
    negotiation_timeout: Option<Duration>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
    next_generation: u64,
    /// Recently torn-down identities, oldest first.
    retired: VecDeque<ParticipantId>,
    departure: Arc<Departure>,
    relay_connected: bool,
}

impl SessionActor {
    /// Spawn the session actor. The local tile is shown immediately under
    /// the anonymous identity.
    pub fn spawn(
        params: SessionParams,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut tiles = TileBook::new(params.display);
        tiles.show_local(&params.local_media);

        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Session, "local"));
        let departure = Arc::new(Departure::new(Arc::clone(&params.relay)));

        let actor = Self {
            receiver,
            events_rx,
            events_tx,
            cancel_token: cancel_token.clone(),
            local_id: None,
            local_address: params.local_address,
            local_media: params.local_media,
            directory: Directory::new(),
            registry: PeerRegistry::new(),
            tiles,
            engine: params.engine,
            relay: params.relay,
            ice_servers: params.ice_servers,
            negotiation_timeout: params.negotiation_timeout,
            metrics,
            mailbox: Arc::clone(&mailbox),
            next_generation: 1,
            retired: VecDeque::new(),
            departure: Arc::clone(&departure),
            relay_connected: true,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            cancel_token,
            mailbox,
            departure,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "mesh.actor.session")]
    async fn run(mut self) {
        info!(target: "mesh.actor.session", "SessionActor started");

        loop {
            // Check for terminated connection actors
            self.check_connection_health().await;

            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "mesh.actor.session",
                        "SessionActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Events from connection actors (we hold a sender, never `None`)
                Some(event) = self.events_rx.recv() => {
                    self.handle_connection_event(event).await;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "mesh.actor.session",
                                "All handles dropped, shutting down"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "mesh.actor.session", "SessionActor stopped");
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::IdentityAssigned { id, respond_to } => {
                let result = self.handle_identity_assigned(id);
                respond(respond_to, result);
            }

            SessionMessage::DirectoryUpdate {
                directory,
                respond_to,
            } => {
                self.handle_directory_update(directory);
                respond(respond_to, Ok(()));
            }

            SessionMessage::Directive {
                directive,
                respond_to,
            } => {
                let result = self.handle_directive(directive).await;
                if respond_to.is_none() {
                    if let Err(e) = &result {
                        debug!(target: "mesh.actor.session", error = %e, "Directive not applied");
                    }
                }
                respond(respond_to, result);
            }

            SessionMessage::StopConnection {
                remote_id,
                respond_to,
            } => {
                self.teardown_connection(&remote_id, "stop").await;
                respond(respond_to, Ok(()));
            }

            SessionMessage::SessionDescription {
                remote_id,
                description,
                respond_to,
            } => {
                self.handle_session_description(remote_id, description, respond_to)
                    .await;
            }

            SessionMessage::Candidate {
                remote_id,
                candidate,
                respond_to,
            } => {
                self.handle_candidate(remote_id, candidate, respond_to)
                    .await;
            }

            SessionMessage::Depart { respond_to } => {
                self.handle_depart().await;
                respond(respond_to, Ok(()));
            }

            SessionMessage::RelayDisconnected => {
                self.handle_relay_disconnected().await;
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn handle_identity_assigned(&mut self, id: ParticipantId) -> Result<(), PeerError> {
        match &self.local_id {
            Some(existing) if *existing == id => {
                debug!(
                    target: "mesh.actor.session",
                    participant_id = %id,
                    "Duplicate identity assignment ignored"
                );
                return Ok(());
            }
            Some(existing) => {
                warn!(
                    target: "mesh.actor.session",
                    assigned = %existing,
                    conflicting = %id,
                    "Conflicting identity assignment ignored"
                );
                return Ok(());
            }
            None => {}
        }

        if self.departure.is_departed() {
            debug!(target: "mesh.actor.session", "Identity assigned after departure, ignoring");
            return Ok(());
        }

        info!(
            target: "mesh.actor.session",
            participant_id = %id,
            address = %self.local_address,
            "Identity assigned"
        );

        self.local_id = Some(id.clone());
        self.departure.set_local_id(Some(id.clone()));
        self.tiles.reconcile(&self.directory, Some(&id));

        if let Err(e) = self.relay.send(OutboundMessage::AnnounceMetadata {
            address: self.local_address.clone(),
        }) {
            warn!(target: "mesh.actor.session", error = %e, "Failed to announce metadata");
        }

        Ok(())
    }

    fn handle_directory_update(&mut self, directory: Directory) {
        debug!(
            target: "mesh.actor.session",
            entries = directory.len(),
            "Directory updated"
        );
        self.directory = directory;
        self.tiles.reconcile(&self.directory, self.local_id.as_ref());
    }

    async fn handle_directive(&mut self, directive: Directive) -> Result<(), PeerError> {
        if self.departure.is_departed() {
            debug!(
                target: "mesh.actor.session",
                remote_id = %directive.remote_id,
                "Directive after departure ignored"
            );
            return Ok(());
        }

        if directive.remote_id.is_anonymous()
            || self.local_id.as_ref() == Some(&directive.remote_id)
        {
            return Err(self.violation("connectToPeer", "directive names the local participant"));
        }

        if self.registry.contains(&directive.remote_id) {
            debug!(
                target: "mesh.actor.session",
                remote_id = %directive.remote_id,
                "Connection already exists, directive ignored"
            );
            return Ok(());
        }

        self.establish(&directive).await
    }

    /// Create a connection for the directive's remote participant.
    async fn establish(&mut self, directive: &Directive) -> Result<(), PeerError> {
        let remote_id = directive.remote_id.clone();
        let role = directive.role();
        let contributes = directive.contributes_local_media();

        let (handle, engine_events) = self.engine.create_handle(&self.ice_servers).await?;

        let generation = self.next_generation;
        self.next_generation += 1;

        let params = ConnectionParams {
            remote_id: remote_id.clone(),
            role,
            generation,
            local_media: contributes.then(|| self.local_media.clone()),
            negotiation_timeout: self.negotiation_timeout,
        };
        let context = ConnectionContext {
            relay: Arc::clone(&self.relay),
            events: self.events_tx.clone(),
            metrics: Arc::clone(&self.metrics),
        };

        let (conn_handle, task_handle) = ConnectionActor::spawn(
            params,
            handle,
            engine_events,
            self.cancel_token.child_token(),
            context,
        );

        let connection = Connection {
            remote_id: remote_id.clone(),
            role,
            generation,
            state: NegotiationState::Created,
            handle: conn_handle,
            task_handle,
        };

        if let Err(duplicate) = self.registry.insert(connection) {
            duplicate.handle.cancel();
            return Ok(());
        }

        self.retired.retain(|id| *id != remote_id);
        self.metrics.connection_created();
        observability::set_connections_active(self.registry.len());

        info!(
            target: "mesh.actor.session",
            remote_id = %remote_id,
            role = role.as_str(),
            generation,
            contributes_local_media = contributes,
            "Connection created"
        );

        Ok(())
    }

    async fn handle_session_description(
        &mut self,
        remote_id: ParticipantId,
        description: SessionDescription,
        respond_to: Responder,
    ) {
        if let Some(connection) = self.registry.get(&remote_id) {
            if let Err(e) = connection.handle.send_description(description, respond_to) {
                debug!(
                    target: "mesh.actor.session",
                    remote_id = %remote_id,
                    error = %e,
                    "Connection actor gone, description dropped"
                );
            }
            return;
        }

        let result = self.unknown_remote(&remote_id, "sessionDescription");
        respond(respond_to, result);
    }

    async fn handle_candidate(
        &mut self,
        remote_id: ParticipantId,
        candidate: IceCandidate,
        respond_to: Responder,
    ) {
        if let Some(connection) = self.registry.get(&remote_id) {
            if let Err(e) = connection.handle.send_candidate(candidate, respond_to) {
                debug!(
                    target: "mesh.actor.session",
                    remote_id = %remote_id,
                    error = %e,
                    "Connection actor gone, candidate dropped"
                );
            }
            return;
        }

        let result = self.unknown_remote(&remote_id, "iceCandidate");
        respond(respond_to, result);
    }

    /// Outcome for a handshake message naming an identity with no connection.
    fn unknown_remote(
        &self,
        remote_id: &ParticipantId,
        message_type: &'static str,
    ) -> Result<(), PeerError> {
        if self.departure.is_departed()
            || !self.relay_connected
            || self.retired.contains(remote_id)
        {
            debug!(
                target: "mesh.actor.session",
                remote_id = %remote_id,
                message_type,
                "Stale handshake message ignored"
            );
            return Ok(());
        }

        Err(self.violation(message_type, "no connection for remote participant"))
    }

    async fn handle_depart(&mut self) {
        // A handle may already have announced; teardown still happens here
        if !self.departure.announce() && self.registry.is_empty() {
            debug!(target: "mesh.actor.session", "Already departed");
            return;
        }

        self.teardown_all("depart").await;
    }

    async fn handle_relay_disconnected(&mut self) {
        if !self.relay_connected {
            return;
        }

        warn!(
            target: "mesh.actor.session",
            connections = self.registry.len(),
            "Relay disconnected, tearing down session"
        );

        self.relay_connected = false;
        self.teardown_all("relay_disconnected").await;
        self.local_id = None;
        self.departure.set_local_id(None);
        self.relay.close();
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let Some(connection) = self.registry.get_mut(&event.remote_id) else {
            debug!(
                target: "mesh.actor.session",
                remote_id = %event.remote_id,
                generation = event.generation,
                "Event from torn-down connection ignored"
            );
            return;
        };

        if connection.generation != event.generation {
            debug!(
                target: "mesh.actor.session",
                remote_id = %event.remote_id,
                event_generation = event.generation,
                live_generation = connection.generation,
                "Event from previous connection generation ignored"
            );
            return;
        }

        match event.kind {
            ConnectionEventKind::RemoteStream(stream) => {
                debug!(
                    target: "mesh.actor.session",
                    remote_id = %event.remote_id,
                    stream_id = %stream.id,
                    "Remote stream received"
                );
                self.tiles
                    .show_remote(&event.remote_id, &stream, &self.directory);
            }
            ConnectionEventKind::StateChanged(state) => {
                connection.state = state;
                if state == NegotiationState::Connected {
                    info!(
                        target: "mesh.actor.session",
                        remote_id = %event.remote_id,
                        "Connection established"
                    );
                }
                if state.is_terminal() {
                    self.teardown_connection(&event.remote_id, state.as_str())
                        .await;
                }
            }
        }
    }

    /// Remove a connection, stop its actor and remove its tile. Idempotent.
    async fn teardown_connection(&mut self, remote_id: &ParticipantId, reason: &'static str) {
        let Some(connection) = self.registry.remove(remote_id) else {
            debug!(
                target: "mesh.actor.session",
                remote_id = %remote_id,
                reason,
                "No connection to tear down"
            );
            return;
        };

        self.tiles.remove(remote_id);
        connection.handle.cancel();
        await_connection(&self.metrics, remote_id, connection.task_handle).await;
        self.retire(remote_id.clone());
        self.metrics.connection_closed();
        observability::set_connections_active(self.registry.len());

        info!(
            target: "mesh.actor.session",
            remote_id = %remote_id,
            generation = connection.generation,
            reason,
            "Connection torn down"
        );
    }

    async fn teardown_all(&mut self, reason: &'static str) {
        let connections = self.registry.drain();

        for connection in &connections {
            connection.handle.cancel();
        }

        for connection in connections {
            await_connection(&self.metrics, &connection.remote_id, connection.task_handle).await;
            self.retire(connection.remote_id);
            self.metrics.connection_closed();
        }

        self.tiles.clear_remote();
        observability::set_connections_active(0);

        debug!(target: "mesh.actor.session", reason, "All connections torn down");
    }

    /// Reap connection actors that exited on their own.
    async fn check_connection_health(&mut self) {
        for remote_id in self.registry.finished() {
            self.teardown_connection(&remote_id, "actor_exited").await;
        }
    }

    fn retire(&mut self, remote_id: ParticipantId) {
        if self.retired.contains(&remote_id) {
            return;
        }
        self.retired.push_back(remote_id);
        if self.retired.len() > RETIRED_CAPACITY {
            self.retired.pop_front();
        }
    }

    fn violation(&self, message_type: &'static str, reason: &str) -> PeerError {
        warn!(
            target: "mesh.actor.session",
            message_type,
            reason,
            "Protocol violation"
        );
        self.metrics.record_violation();
        observability::record_protocol_violation(message_type);
        PeerError::ProtocolViolation(format!("{message_type}: {reason}"))
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "mesh.actor.session",
            connections = self.registry.len(),
            "Performing graceful shutdown"
        );
        self.teardown_all("shutdown").await;
        self.relay.close();
    }

    fn snapshot(&self) -> SessionState {
        SessionState {
            local_id: self.local_id.clone(),
            local_address: self.local_address.clone(),
            directory: self.directory.clone(),
            connections: self.registry.summaries(),
            tiles: self.tiles.tile_ids(),
            departed: self.departure.is_departed(),
            relay_connected: self.relay_connected,
        }
    }
}

/// Wait for a cancelled connection actor to close its handle.
async fn await_connection(
    metrics: &ActorMetrics,
    remote_id: &ParticipantId,
    task_handle: JoinHandle<()>,
) {
    match tokio::time::timeout(CONNECTION_STOP_TIMEOUT, task_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(join_error)) => {
            if join_error.is_panic() {
                error!(
                    target: "mesh.actor.session",
                    remote_id = %remote_id,
                    error = ?join_error,
                    "Connection actor panicked"
                );
                metrics.record_panic(ActorType::Connection);
            }
        }
        Err(_) => {
            warn!(
                target: "mesh.actor.session",
                remote_id = %remote_id,
                "Connection shutdown timed out"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::display::TileMetadata;
    use crate::engine::{EngineEvent, EngineEvents, NegotiationHandle};
    use crate::media::{MediaTrack, TrackKind};
    use crate::relay::{ChannelRelay, RelayEndpoint, Role};
    use async_trait::async_trait;
    use common::types::ParticipantInfo;
    use std::sync::Mutex;

    struct QuietHandle;

    #[async_trait]
    impl NegotiationHandle for QuietHandle {
        fn add_track(&self, _track: &MediaTrack, _stream: &MediaStream) -> Result<(), PeerError> {
            Ok(())
        }

        async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
            Ok(SessionDescription::offer("quiet-offer"))
        }

        async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
            Ok(SessionDescription::answer("quiet-answer"))
        }

        async fn set_local_description(
            &self,
            _description: SessionDescription,
        ) -> Result<(), PeerError> {
            Ok(())
        }

        async fn set_remote_description(
            &self,
            _description: SessionDescription,
        ) -> Result<(), PeerError> {
            Ok(())
        }

        async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), PeerError> {
            Ok(())
        }

        async fn create_data_channel(&self, _label: &str) -> Result<(), PeerError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    /// Engine whose handles never emit events on their own.
    #[derive(Default)]
    struct QuietEngine {
        senders: Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>,
    }

    #[async_trait]
    impl NegotiationEngine for QuietEngine {
        async fn create_handle(
            &self,
            _ice_servers: &[String],
        ) -> Result<(Box<dyn NegotiationHandle>, EngineEvents), PeerError> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().push(tx);
            Ok((Box::new(QuietHandle), rx))
        }
    }

    struct NullDisplay;

    impl DisplaySurface for NullDisplay {
        fn upsert_tile(
            &mut self,
            _id: &ParticipantId,
            _metadata: &TileMetadata,
            _stream: Option<&MediaStream>,
        ) {
        }

        fn remove_tile(&mut self, _id: &ParticipantId) {}
    }

    fn start() -> (SessionHandle, RelayEndpoint, Arc<ActorMetrics>) {
        let (connection, endpoint) = ChannelRelay::pair(16);
        let metrics = ActorMetrics::new();
        let params = SessionParams {
            local_address: "203.0.113.7".to_string(),
            local_media: MediaStream::new(
                "local",
                vec![
                    MediaTrack::new("mic", TrackKind::Audio),
                    MediaTrack::new("cam", TrackKind::Video),
                ],
            ),
            engine: Arc::new(QuietEngine::default()),
            relay: connection.sender,
            display: Box::new(NullDisplay),
            ice_servers: vec!["stun:stun.example.org:3478".to_string()],
            negotiation_timeout: None,
        };
        let (handle, _task) =
            SessionActor::spawn(params, CancellationToken::new(), Arc::clone(&metrics));
        (handle, endpoint, metrics)
    }

    fn drain(endpoint: &mut RelayEndpoint) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = endpoint.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_identity_announces_address_once() {
        let (session, mut endpoint, _metrics) = start();

        session.on_identity_assigned("A".into()).await.unwrap();
        session.on_identity_assigned("A".into()).await.unwrap();
        session.on_identity_assigned("Z".into()).await.unwrap();

        assert_eq!(
            drain(&mut endpoint),
            vec![OutboundMessage::AnnounceMetadata {
                address: "203.0.113.7".to_string()
            }]
        );
        let state = session.get_state().await.unwrap();
        assert_eq!(state.local_id, Some(ParticipantId::new("A")));
    }

    #[tokio::test]
    async fn test_local_tile_bound_when_listed() {
        let (session, _endpoint, _metrics) = start();

        let state = session.get_state().await.unwrap();
        assert_eq!(state.tiles, vec![ParticipantId::anonymous()]);

        session.on_identity_assigned("A".into()).await.unwrap();
        let directory: Directory = vec![ParticipantInfo::new("A", "203.0.113.7", true)]
            .into_iter()
            .collect();
        session.on_directory_update(directory.clone()).await.unwrap();

        let state = session.get_state().await.unwrap();
        assert_eq!(state.tiles, vec![ParticipantId::new("A")]);
        assert_eq!(state.directory, directory);
    }

    #[tokio::test]
    async fn test_duplicate_directive_keeps_single_connection() {
        let (session, _endpoint, metrics) = start();
        session.on_identity_assigned("A".into()).await.unwrap();

        session.on_directive(Directive::new("B", false)).await.unwrap();
        session.on_directive(Directive::new("B", true)).await.unwrap();

        let state = session.get_state().await.unwrap();
        assert_eq!(state.connections.len(), 1);
        let entry = state.connection(&"B".into()).unwrap();
        assert_eq!(entry.role, Role::Responder);
        assert_eq!(entry.generation, 1);
        assert_eq!(metrics.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_directive_naming_self_rejected() {
        let (session, _endpoint, metrics) = start();
        session.on_identity_assigned("A".into()).await.unwrap();

        let result = session.on_directive(Directive::new("A", true)).await;

        assert!(matches!(result, Err(PeerError::ProtocolViolation(_))));
        assert!(session.get_state().await.unwrap().connections.is_empty());
        assert_eq!(metrics.violation_count(), 1);
    }

    #[tokio::test]
    async fn test_description_without_connection_is_violation() {
        let (session, _endpoint, metrics) = start();
        session.on_identity_assigned("A".into()).await.unwrap();

        let result = session
            .on_session_description("C".into(), SessionDescription::offer("sdp"))
            .await;

        assert!(matches!(result, Err(PeerError::ProtocolViolation(_))));
        assert!(session.get_state().await.unwrap().connections.is_empty());
        assert_eq!(metrics.violation_count(), 1);
    }

    #[tokio::test]
    async fn test_messages_after_stop_are_stale() {
        let (session, _endpoint, metrics) = start();
        session.on_identity_assigned("A".into()).await.unwrap();
        session.on_directive(Directive::new("B", false)).await.unwrap();

        session.on_stop_connection("B".into()).await.unwrap();
        session.on_stop_connection("B".into()).await.unwrap();

        session
            .on_session_description("B".into(), SessionDescription::offer("late"))
            .await
            .unwrap();
        session
            .on_candidate("B".into(), IceCandidate::new("candidate:late"))
            .await
            .unwrap();

        let state = session.get_state().await.unwrap();
        assert!(state.connections.is_empty());
        assert_eq!(metrics.violation_count(), 0);
        assert_eq!(metrics.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_after_stop_uses_new_generation() {
        let (session, _endpoint, _metrics) = start();
        session.on_identity_assigned("A".into()).await.unwrap();

        session.on_directive(Directive::new("B", true)).await.unwrap();
        session.on_stop_connection("B".into()).await.unwrap();
        session.on_directive(Directive::new("B", true)).await.unwrap();

        let state = session.get_state().await.unwrap();
        assert_eq!(state.connection(&"B".into()).unwrap().generation, 2);
    }

    #[tokio::test]
    async fn test_depart_is_idempotent() {
        let (session, mut endpoint, _metrics) = start();
        session.on_identity_assigned("A".into()).await.unwrap();
        session.on_directive(Directive::new("B", true)).await.unwrap();
        drain(&mut endpoint);

        session.on_depart().await.unwrap();
        session.on_depart().await.unwrap();

        let sent = drain(&mut endpoint);
        let departures = sent
            .iter()
            .filter(|m| matches!(m, OutboundMessage::Depart { .. }))
            .count();
        assert_eq!(departures, 1);
        assert!(endpoint.closed.is_cancelled());

        let state = session.get_state().await.unwrap();
        assert!(state.departed);
        assert!(state.connections.is_empty());

        session.on_directive(Directive::new("C", true)).await.unwrap();
        assert!(session.get_state().await.unwrap().connections.is_empty());
    }

    #[tokio::test]
    async fn test_relay_disconnect_resets_session() {
        let (session, _endpoint, _metrics) = start();
        session.on_identity_assigned("A".into()).await.unwrap();
        session.on_directive(Directive::new("B", true)).await.unwrap();
        session.on_directive(Directive::new("C", false)).await.unwrap();

        session.on_relay_disconnected().await.unwrap();

        let state = session.get_state().await.unwrap();
        assert_eq!(state.local_id, None);
        assert!(!state.relay_connected);
        assert!(state.connections.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order() {
        let (session, mut endpoint, _metrics) = start();

        session
            .dispatch(InboundMessage::IdentityAssigned { id: "A".into() })
            .await
            .unwrap();
        session
            .dispatch(InboundMessage::ConnectDirective {
                remote_id: "B".into(),
                should_initiate: false,
                bidirectional: None,
            })
            .await
            .unwrap();

        let state = session.get_state().await.unwrap();
        assert_eq!(state.local_id, Some(ParticipantId::new("A")));
        assert!(state.connection(&"B".into()).is_some());
        assert_eq!(drain(&mut endpoint).len(), 1);
    }

    #[tokio::test]
    async fn test_stop_naming_local_identity_keeps_local_tile() {
        let (session, _endpoint, _metrics) = start();

        session
            .on_stop_connection(ParticipantId::anonymous())
            .await
            .unwrap();
        assert_eq!(
            session.get_state().await.unwrap().tiles,
            vec![ParticipantId::anonymous()]
        );

        session.on_identity_assigned("A".into()).await.unwrap();
        let directory: Directory = vec![ParticipantInfo::new("A", "203.0.113.7", true)]
            .into_iter()
            .collect();
        session.on_directory_update(directory).await.unwrap();
        session.on_stop_connection("A".into()).await.unwrap();

        assert_eq!(
            session.get_state().await.unwrap().tiles,
            vec![ParticipantId::new("A")]
        );
    }

    #[tokio::test]
    async fn test_request_depart_hands_leave_to_relay_immediately() {
        let (session, mut endpoint, _metrics) = start();
        session.on_identity_assigned("A".into()).await.unwrap();
        session.on_directive(Directive::new("B", true)).await.unwrap();
        drain(&mut endpoint);

        session.request_depart();

        // Already queued on the relay before the actor runs again
        assert_eq!(
            endpoint.outbound.try_recv().ok(),
            Some(OutboundMessage::Depart { id: "A".into() })
        );
        assert!(endpoint.closed.is_cancelled());

        let state = session.get_state().await.unwrap();
        assert!(state.departed);
        assert!(state.connections.is_empty());

        session.request_depart();
        session.on_depart().await.unwrap();
        assert!(drain(&mut endpoint).is_empty());
    }
}
