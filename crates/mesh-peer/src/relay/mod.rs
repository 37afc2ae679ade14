//! Handshake relay.
//!
//! The relay is a bidirectional message bus between this participant and the
//! coordinating process. It never carries media. Outbound sends are
//! synchronous and non-blocking so that departure can be attempted from any
//! context; inbound messages arrive on a bounded channel in wire order.
//!
//! # Modules
//!
//! - [`messages`] - Wire messages and the `Directive` domain type
//! - [`channel`] - In-process transport over tokio channels
//! - [`tcp`] - JSON-lines transport over TCP

pub mod channel;
pub mod messages;
pub mod tcp;

pub use channel::{ChannelRelay, RelayEndpoint};
pub use messages::{Directive, InboundMessage, OutboundMessage, Role};
pub use tcp::TcpRelayConnector;

use crate::errors::PeerError;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound half of a relay connection.
pub trait RelaySender: Send + Sync {
    /// Queue a message for the coordinating process.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::RelayClosed` once the relay has been released.
    fn send(&self, message: OutboundMessage) -> Result<(), PeerError>;

    /// Release the relay. Idempotent.
    fn close(&self);

    /// Whether `close` has been called or the transport is gone.
    fn is_closed(&self) -> bool;
}

/// An established relay connection.
pub struct RelayConnection {
    pub sender: Arc<dyn RelaySender>,
    /// Ends when the coordinating process disconnects.
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Opens relay connections.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self) -> Result<RelayConnection, PeerError>;
}
