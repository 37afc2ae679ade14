//! Peer connection registry.
//!
//! Maps remote identity to the live [`Connection`] for it. Owned by the
//! session actor; at most one entry per identity.

use super::connection::ConnectionActorHandle;
use super::messages::{ConnectionSummary, NegotiationState};
use crate::relay::Role;

use common::types::ParticipantId;
use std::collections::HashMap;
use tokio::task::JoinHandle;

/// One registry entry.
#[derive(Debug)]
pub struct Connection {
    pub remote_id: ParticipantId,
    pub role: Role,
    pub generation: u64,
    /// Last state reported by the connection actor.
    pub state: NegotiationState,
    pub handle: ConnectionActorHandle,
    /// Join handle for panic detection and orderly stop.
    pub task_handle: JoinHandle<()>,
}

impl Connection {
    #[must_use]
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            remote_id: self.remote_id.clone(),
            role: self.role,
            generation: self.generation,
            state: self.state,
        }
    }
}

/// Live connections keyed by remote identity.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    connections: HashMap<ParticipantId, Connection>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, remote_id: &ParticipantId) -> bool {
        self.connections.contains_key(remote_id)
    }

    /// Insert a connection. Returns it back if one already exists for the
    /// same identity.
    pub fn insert(&mut self, connection: Connection) -> Result<(), Connection> {
        if self.connections.contains_key(&connection.remote_id) {
            return Err(connection);
        }
        self.connections
            .insert(connection.remote_id.clone(), connection);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, remote_id: &ParticipantId) -> Option<&Connection> {
        self.connections.get(remote_id)
    }

    pub fn get_mut(&mut self, remote_id: &ParticipantId) -> Option<&mut Connection> {
        self.connections.get_mut(remote_id)
    }

    /// Remove and return the connection. Unknown identities yield `None`.
    pub fn remove(&mut self, remote_id: &ParticipantId) -> Option<Connection> {
        self.connections.remove(remote_id)
    }

    /// Remove every connection.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.connections.drain().map(|(_, c)| c).collect()
    }

    /// Identities whose actor task has exited.
    #[must_use]
    pub fn finished(&self) -> Vec<ParticipantId> {
        self.connections
            .values()
            .filter(|c| c.task_handle.is_finished())
            .map(|c| c.remote_id.clone())
            .collect()
    }

    /// Summaries sorted by remote identity.
    #[must_use]
    pub fn summaries(&self) -> Vec<ConnectionSummary> {
        let mut summaries: Vec<ConnectionSummary> =
            self.connections.values().map(Connection::summary).collect();
        summaries.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        summaries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
