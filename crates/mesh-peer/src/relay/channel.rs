//! In-process relay over tokio channels.
//!
//! [`ChannelRelay::pair`] returns the participant's [`RelayConnection`] and
//! the [`RelayEndpoint`] the coordinating process drives. The TCP transport
//! reuses [`ChannelRelay`] as its outbound queue.

use super::messages::{InboundMessage, OutboundMessage};
use super::{RelayConnection, RelaySender};
use crate::errors::PeerError;
use crate::observability;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outbound queue towards the coordinating process.
#[derive(Debug, Clone)]
pub struct ChannelRelay {
    tx: mpsc::UnboundedSender<OutboundMessage>,
    closed: CancellationToken,
}

impl ChannelRelay {
    /// Create a sender over an existing queue.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>, closed: CancellationToken) -> Self {
        Self { tx, closed }
    }

    /// Create a connected participant/coordinator pair.
    #[must_use]
    pub fn pair(buffer: usize) -> (RelayConnection, RelayEndpoint) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(buffer);
        let closed = CancellationToken::new();

        let connection = RelayConnection {
            sender: Arc::new(ChannelRelay::new(out_tx, closed.clone())),
            inbound: in_rx,
        };
        let endpoint = RelayEndpoint {
            outbound: out_rx,
            inbound: in_tx,
            closed,
        };

        (connection, endpoint)
    }
}

impl RelaySender for ChannelRelay {
    fn send(&self, message: OutboundMessage) -> Result<(), PeerError> {
        if self.closed.is_cancelled() {
            return Err(PeerError::RelayClosed);
        }

        let event = message.event_name();
        self.tx.send(message).map_err(|_| PeerError::RelayClosed)?;
        observability::record_relay_message("outbound", event);
        debug!(target: "mesh.relay", event, "Relay message queued");
        Ok(())
    }

    fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(target: "mesh.relay", "Relay released");
        }
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// The coordinating process's end of an in-process relay.
#[derive(Debug)]
pub struct RelayEndpoint {
    /// Messages sent by the participant.
    pub outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    /// Deliver messages to the participant. Dropping it disconnects.
    pub inbound: mpsc::Sender<InboundMessage>,
    /// Cancelled when the participant releases the relay.
    pub closed: CancellationToken,
}

impl RelayEndpoint {
    /// Receive the next participant message.
    ///
    /// Messages queued before release are still delivered; `None` once the
    /// participant has released the relay and the queue is drained.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        tokio::select! {
            biased;
            msg = self.outbound.recv() => msg,
            () = self.closed.cancelled() => self.outbound.try_recv().ok(),
        }
    }

    /// Deliver a message to the participant.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::RelayClosed` if the participant is gone.
    pub async fn deliver(&self, message: InboundMessage) -> Result<(), PeerError> {
        self.inbound
            .send(message)
            .await
            .map_err(|_| PeerError::RelayClosed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_carries_messages_both_ways() {
        let (mut connection, mut endpoint) = ChannelRelay::pair(8);

        connection
            .sender
            .send(OutboundMessage::AnnounceMetadata {
                address: "203.0.113.7".to_string(),
            })
            .unwrap();
        assert_eq!(
            endpoint.recv().await,
            Some(OutboundMessage::AnnounceMetadata {
                address: "203.0.113.7".to_string()
            })
        );

        endpoint
            .deliver(InboundMessage::IdentityAssigned { id: "A".into() })
            .await
            .unwrap();
        assert_eq!(
            connection.inbound.recv().await,
            Some(InboundMessage::IdentityAssigned { id: "A".into() })
        );
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (connection, _endpoint) = ChannelRelay::pair(8);

        connection.sender.close();
        connection.sender.close();

        assert!(connection.sender.is_closed());
        assert!(matches!(
            connection
                .sender
                .send(OutboundMessage::Depart { id: "A".into() }),
            Err(PeerError::RelayClosed)
        ));
    }

    #[tokio::test]
    async fn test_queued_message_delivered_before_close() {
        let (connection, mut endpoint) = ChannelRelay::pair(8);

        connection
            .sender
            .send(OutboundMessage::Depart { id: "A".into() })
            .unwrap();
        connection.sender.close();

        assert_eq!(
            endpoint.recv().await,
            Some(OutboundMessage::Depart { id: "A".into() })
        );
        assert_eq!(endpoint.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropping_endpoint_ends_inbound() {
        let (mut connection, endpoint) = ChannelRelay::pair(8);
        drop(endpoint);
        assert!(connection.inbound.recv().await.is_none());
    }
}
