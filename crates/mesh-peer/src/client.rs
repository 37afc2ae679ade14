//! Participant startup and relay pump.
//!
//! # Startup Flow
//!
//! 1. Acquire local media
//! 2. Discover the local address (bounded by the probe timeout)
//! 3. Connect the relay (only after both capabilities are available)
//! 4. Spawn the `SessionActor` and the relay pump

use crate::actors::{ActorMetrics, SessionActor, SessionHandle, SessionParams};
use crate::config::PeerConfig;
use crate::display::DisplaySurface;
use crate::engine::NegotiationEngine;
use crate::errors::PeerError;
use crate::media::LocalMedia;
use crate::observability;
use crate::probe::AddressProbe;
use crate::relay::{InboundMessage, RelayConnector};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How long `stop` waits for each task to finish.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Host-provided capabilities.
pub struct Capabilities {
    pub engine: Arc<dyn NegotiationEngine>,
    pub media: Arc<dyn LocalMedia>,
    pub probe: Arc<dyn AddressProbe>,
    pub display: Box<dyn DisplaySurface>,
}

/// A running participant.
pub struct MeshClient {
    session: SessionHandle,
    session_task: JoinHandle<()>,
    pump_task: JoinHandle<()>,
    metrics: Arc<ActorMetrics>,
    cancel_token: CancellationToken,
}

impl MeshClient {
    /// Acquire capabilities, connect the relay and start the session.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::CapabilityUnavailable` if media or address
    /// discovery fails; the relay is not contacted in that case. Returns the
    /// connector's error if the relay cannot be reached.
    #[instrument(skip_all, name = "mesh.client.start")]
    pub async fn start(
        config: &PeerConfig,
        capabilities: Capabilities,
        connector: &dyn RelayConnector,
    ) -> Result<Self, PeerError> {
        let Capabilities {
            engine,
            media,
            probe,
            display,
        } = capabilities;

        let local_media = media.acquire().await.map_err(|e| {
            warn!(target: "mesh.client", error = %e, "Local media unavailable");
            PeerError::CapabilityUnavailable(format!("local media: {e}"))
        })?;
        debug!(
            target: "mesh.client",
            stream_id = %local_media.id,
            tracks = local_media.tracks.len(),
            "Local media acquired"
        );

        let local_address = match tokio::time::timeout(config.address_probe_timeout, probe.probe())
            .await
        {
            Ok(Ok(address)) => address,
            Ok(Err(e)) => {
                warn!(target: "mesh.client", error = %e, "Address discovery failed");
                return Err(PeerError::CapabilityUnavailable(format!(
                    "address discovery: {e}"
                )));
            }
            Err(_) => {
                warn!(
                    target: "mesh.client",
                    timeout_ms = config.address_probe_timeout.as_millis(),
                    "Address discovery timed out, continuing without an address"
                );
                String::new()
            }
        };

        let connection = connector.connect().await?;
        info!(
            target: "mesh.client",
            address = %local_address,
            "Relay connected"
        );

        let cancel_token = CancellationToken::new();
        let metrics = ActorMetrics::new();

        let params = SessionParams {
            local_address,
            local_media,
            engine,
            relay: connection.sender,
            display,
            ice_servers: config.ice_servers.clone(),
            negotiation_timeout: config.negotiation_timeout,
        };
        let (session, session_task) =
            SessionActor::spawn(params, cancel_token.child_token(), Arc::clone(&metrics));

        let pump_task = tokio::spawn(relay_pump(
            connection.inbound,
            session.clone(),
            cancel_token.child_token(),
        ));

        Ok(Self {
            session,
            session_task,
            pump_task,
            metrics,
            cancel_token,
        })
    }

    /// Handle to the running session.
    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.session
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Announce departure and release every connection.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Internal` if the session actor is gone.
    pub async fn depart(&self) -> Result<(), PeerError> {
        self.session.on_depart().await
    }

    /// Hand `leave` to the relay without waiting, for synchronous shutdown
    /// paths. Connection teardown follows on the session actor.
    pub fn request_depart(&self) {
        self.session.request_depart();
    }

    /// Cancel the session and wait for every task to finish.
    pub async fn stop(self) {
        self.cancel_token.cancel();

        for (name, task) in [("session", self.session_task), ("relay_pump", self.pump_task)] {
            match tokio::time::timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(target: "mesh.client", task = name, error = %e, "Task ended abnormally");
                }
                Err(_) => {
                    warn!(target: "mesh.client", task = name, "Task did not stop in time");
                }
            }
        }

        info!(target: "mesh.client", "Client stopped");
    }
}

/// Forward inbound relay messages to the session in arrival order.
#[instrument(skip_all, name = "mesh.relay.pump")]
async fn relay_pump(
    mut inbound: mpsc::Receiver<InboundMessage>,
    session: SessionHandle,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "mesh.relay", "Relay pump cancelled");
                return;
            }

            message = inbound.recv() => {
                let Some(message) = message else {
                    break;
                };

                let event = message.event_name();
                observability::record_relay_message("inbound", event);
                debug!(target: "mesh.relay", event, "Relay message received");

                if let Err(e) = session.dispatch(message).await {
                    warn!(target: "mesh.relay", error = %e, "Session gone, stopping relay pump");
                    return;
                }
            }
        }
    }

    info!(target: "mesh.relay", "Relay inbound stream ended");
    if let Err(e) = session.on_relay_disconnected().await {
        debug!(target: "mesh.relay", error = %e, "Session gone before disconnect notice");
    }
}
