//! In-process coordinating process.
//!
//! `MockCoordinator` implements [`RelayConnector`]: every `connect` creates an
//! in-process relay pair and registers a new participant. The coordinator:
//! - assigns identities `peer-1`, `peer-2`, ... in connection order
//! - on `sendInformation`, stores the address, broadcasts the directory
//!   (the earliest present participant is the leader) and pairs the
//!   newcomer with everyone already meshed; the newcomer initiates
//! - forwards relayed descriptions and candidates, rewriting the identity
//!   to the sender's
//! - on `leave` or a dropped relay, sends `stopConnection` to the rest and
//!   broadcasts the shrunken directory
//!
//! Every message received from a participant is logged for assertions.

use async_trait::async_trait;
use common::types::{Directory, ParticipantId, ParticipantInfo};
use mesh_peer::errors::PeerError;
use mesh_peer::relay::{
    ChannelRelay, InboundMessage, OutboundMessage, RelayConnection, RelayConnector, RelayEndpoint,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RELAY_BUFFER: usize = 64;

enum Command {
    Join {
        id: ParticipantId,
        inbound: mpsc::Sender<InboundMessage>,
    },
    Message {
        from: ParticipantId,
        message: OutboundMessage,
    },
    Left {
        id: ParticipantId,
    },
    Disconnect {
        id: ParticipantId,
    },
}

struct Member {
    id: ParticipantId,
    address: String,
    inbound: mpsc::Sender<InboundMessage>,
    meshed: bool,
}

type Log = Arc<Mutex<Vec<(ParticipantId, OutboundMessage)>>>;

/// In-process coordinating process for full-mesh tests.
#[derive(Debug)]
pub struct MockCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    log: Log,
    bidirectional: Option<bool>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Join { id, .. } => write!(f, "Join({id})"),
            Command::Message { from, message } => {
                write!(f, "Message({from}, {})", message.event_name())
            }
            Command::Left { id } => write!(f, "Left({id})"),
            Command::Disconnect { id } => write!(f, "Disconnect({id})"),
        }
    }
}

impl MockCoordinator {
    /// Start the coordinator. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bidirectional(None)
    }

    /// Start a coordinator whose directives carry `bi_connection`.
    #[must_use]
    pub fn with_bidirectional(bidirectional: Option<bool>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, bidirectional));
        Self {
            commands,
            next_id: AtomicU64::new(1),
            log: Arc::new(Mutex::new(Vec::new())),
            bidirectional,
        }
    }

    /// Every message received so far, with its sender.
    #[must_use]
    pub fn received(&self) -> Vec<(ParticipantId, OutboundMessage)> {
        self.log.lock().unwrap().clone()
    }

    /// Messages received from `id`.
    #[must_use]
    pub fn received_from(&self, id: &ParticipantId) -> Vec<OutboundMessage> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(from, _)| from == id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Drop the relay towards `id`, as if the network failed.
    pub fn disconnect(&self, id: &ParticipantId) {
        let _ = self.commands.send(Command::Disconnect { id: id.clone() });
    }

    #[must_use]
    pub fn bidirectional(&self) -> Option<bool> {
        self.bidirectional
    }
}

impl Default for MockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayConnector for MockCoordinator {
    async fn connect(&self) -> Result<RelayConnection, PeerError> {
        let (connection, endpoint) = ChannelRelay::pair(RELAY_BUFFER);
        let RelayEndpoint {
            outbound,
            inbound,
            closed,
        } = endpoint;
        let id = ParticipantId::new(format!(
            "peer-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));

        self.commands
            .send(Command::Join {
                id: id.clone(),
                inbound,
            })
            .map_err(|_| PeerError::Relay("coordinator stopped".to_string()))?;

        tokio::spawn(forward(
            id,
            outbound,
            closed,
            self.commands.clone(),
            Arc::clone(&self.log),
        ));

        Ok(connection)
    }
}

/// Pump one participant's outbound messages into the coordinator.
///
/// The coordinator task holds the only inbound sender, so removing a member
/// ends that participant's inbound stream.
async fn forward(
    id: ParticipantId,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    closed: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
    log: Log,
) {
    loop {
        let message = tokio::select! {
            biased;
            message = outbound.recv() => message,
            () = closed.cancelled() => outbound.try_recv().ok(),
        };
        let Some(message) = message else {
            break;
        };

        log.lock().unwrap().push((id.clone(), message.clone()));
        if commands
            .send(Command::Message {
                from: id.clone(),
                message,
            })
            .is_err()
        {
            return;
        }
    }
    let _ = commands.send(Command::Left { id });
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>, bidirectional: Option<bool>) {
    let mut members: Vec<Member> = Vec::new();

    while let Some(command) = commands.recv().await {
        debug!(target: "mesh.test.coordinator", command = ?command, "Coordinator command");
        match command {
            Command::Join { id, inbound } => {
                let _ = inbound
                    .send(InboundMessage::IdentityAssigned { id: id.clone() })
                    .await;
                members.push(Member {
                    id,
                    address: String::new(),
                    inbound,
                    meshed: false,
                });
            }

            Command::Message { from, message } => match message {
                OutboundMessage::AnnounceMetadata { address } => {
                    let Some(member) = members.iter_mut().find(|m| m.id == from) else {
                        continue;
                    };
                    member.address = address;
                    let newcomer = !member.meshed;
                    member.meshed = true;

                    broadcast_directory(&members).await;

                    if newcomer {
                        pair_newcomer(&members, &from, bidirectional).await;
                    }
                }
                OutboundMessage::RelaySessionDescription {
                    remote_id,
                    description,
                } => {
                    send_to(
                        &members,
                        &remote_id,
                        InboundMessage::SessionDescription {
                            remote_id: from,
                            description,
                        },
                    )
                    .await;
                }
                OutboundMessage::RelayCandidate {
                    remote_id,
                    candidate,
                } => {
                    send_to(
                        &members,
                        &remote_id,
                        InboundMessage::Candidate {
                            remote_id: from,
                            candidate,
                        },
                    )
                    .await;
                }
                OutboundMessage::Depart { id } => {
                    remove_member(&mut members, &id).await;
                }
            },

            Command::Left { id } | Command::Disconnect { id } => {
                remove_member(&mut members, &id).await;
            }
        }
    }
}

fn directory(members: &[Member]) -> Directory {
    members
        .iter()
        .enumerate()
        .map(|(i, m)| ParticipantInfo::new(m.id.clone(), m.address.clone(), i == 0))
        .collect()
}

async fn broadcast_directory(members: &[Member]) {
    let directory = directory(members);
    for member in members {
        let _ = member
            .inbound
            .send(InboundMessage::DirectoryUpdate {
                directory: directory.clone(),
            })
            .await;
    }
}

async fn pair_newcomer(members: &[Member], newcomer: &ParticipantId, bidirectional: Option<bool>) {
    let Some(initiator) = members.iter().find(|m| &m.id == newcomer) else {
        return;
    };

    for existing in members.iter().filter(|m| m.meshed && &m.id != newcomer) {
        // Responder first, so it is ready before the offer can arrive
        let _ = existing
            .inbound
            .send(InboundMessage::ConnectDirective {
                remote_id: newcomer.clone(),
                should_initiate: false,
                bidirectional,
            })
            .await;
        let _ = initiator
            .inbound
            .send(InboundMessage::ConnectDirective {
                remote_id: existing.id.clone(),
                should_initiate: true,
                bidirectional,
            })
            .await;
    }
}

async fn send_to(members: &[Member], to: &ParticipantId, message: InboundMessage) {
    if let Some(member) = members.iter().find(|m| &m.id == to) {
        let _ = member.inbound.send(message).await;
    }
}

async fn remove_member(members: &mut Vec<Member>, id: &ParticipantId) {
    let before = members.len();
    members.retain(|m| &m.id != id);
    if members.len() == before {
        return;
    }

    for member in members.iter() {
        let _ = member
            .inbound
            .send(InboundMessage::StopConnection {
                remote_id: id.clone(),
            })
            .await;
    }
    broadcast_directory(members).await;
}
