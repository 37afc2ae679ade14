//! JSON-lines relay over TCP.
//!
//! Wire format: one JSON object per line, `{"event": ..., "data": ...}\n`.
//! A reader task decodes inbound lines into the inbound channel; a writer
//! task drains the outbound queue. Malformed lines are logged and skipped.
//! Inbound lines are capped at [`MAX_LINE_LENGTH`] bytes by default; a
//! longer line ends the connection.

use super::channel::ChannelRelay;
use super::messages::{InboundMessage, OutboundMessage};
use super::{RelayConnection, RelayConnector};
use crate::config::PeerConfig;
use crate::errors::PeerError;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Longest inbound line accepted, in bytes.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Encode one outbound message as a newline-terminated line.
///
/// # Errors
///
/// Returns `PeerError::Codec` if serialization fails.
pub fn encode_line(message: &OutboundMessage) -> Result<String, PeerError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one inbound line.
///
/// # Errors
///
/// Returns `PeerError::Codec` for malformed JSON or unknown events.
pub fn decode_line(line: &str) -> Result<InboundMessage, PeerError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Connects to the coordinating process over TCP.
#[derive(Debug, Clone)]
pub struct TcpRelayConnector {
    address: String,
    buffer: usize,
    max_line_length: usize,
}

impl TcpRelayConnector {
    #[must_use]
    pub fn new(address: impl Into<String>, buffer: usize) -> Self {
        Self {
            address: address.into(),
            buffer,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    #[must_use]
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Connector for the configured relay address and buffer.
    #[must_use]
    pub fn from_config(config: &PeerConfig) -> Self {
        Self::new(config.relay_address.clone(), config.relay_buffer)
    }
}

#[async_trait]
impl RelayConnector for TcpRelayConnector {
    #[instrument(skip_all, name = "mesh.relay.connect", fields(address = %self.address))]
    async fn connect(&self) -> Result<RelayConnection, PeerError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| PeerError::Relay(format!("connect to {}: {e}", self.address)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| PeerError::Relay(format!("set_nodelay: {e}")))?;

        info!(target: "mesh.relay", address = %self.address, "Relay connected");

        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(self.buffer);
        let closed = CancellationToken::new();

        tokio::spawn(read_loop(
            read_half,
            self.max_line_length,
            in_tx,
            closed.clone(),
        ));
        tokio::spawn(write_loop(write_half, out_rx, closed.clone()));

        Ok(RelayConnection {
            sender: Arc::new(ChannelRelay::new(out_tx, closed)),
            inbound: in_rx,
        })
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    max_line_length: usize,
    inbound: mpsc::Sender<InboundMessage>,
    closed: CancellationToken,
) {
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(max_line_length));

    loop {
        let line = tokio::select! {
            () = closed.cancelled() => break,
            line = lines.next() => line,
        };

        match line {
            Some(Ok(line)) if line.trim().is_empty() => {}
            Some(Ok(line)) => match decode_line(&line) {
                Ok(message) => {
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(target: "mesh.relay", error = %e, "Skipping malformed relay line");
                }
            },
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                // The framing ends its stream after a decode error
                warn!(
                    target: "mesh.relay",
                    max_line_length,
                    "Relay line too long, disconnecting"
                );
                break;
            }
            None => {
                info!(target: "mesh.relay", "Relay closed by coordinating process");
                break;
            }
            Some(Err(e)) => {
                warn!(target: "mesh.relay", error = %e, "Relay read failed");
                break;
            }
        }
    }
    // Dropping `inbound` signals disconnect to the session
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    closed: CancellationToken,
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

        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(target: "mesh.relay", error = %e, "Dropping unencodable relay message");
                continue;
            }
        };

        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            warn!(target: "mesh.relay", error = %e, "Relay write failed");
            closed.cancel();
            break;
        }
    }

    if let Err(e) = write_half.shutdown().await {
        debug!(target: "mesh.relay", error = %e, "Relay shutdown failed");
    }
}
