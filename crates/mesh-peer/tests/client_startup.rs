//! Startup ordering tests for `MeshClient`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mesh_peer::errors::PeerError;
use mesh_peer::relay::{OutboundMessage, RelayConnection, RelayConnector};
use mesh_test_utils::{MockCoordinator, MockMedia, MockProbe, TestParticipant, WAIT_TIMEOUT};

/// Connector that counts attempts before delegating.
struct CountingConnector {
    inner: MockCoordinator,
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl RelayConnector for CountingConnector {
    async fn connect(&self) -> Result<RelayConnection, PeerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.connect().await
    }
}

fn counting() -> (CountingConnector, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let connector = CountingConnector {
        inner: MockCoordinator::new(),
        attempts: Arc::clone(&attempts),
    };
    (connector, attempts)
}

#[tokio::test]
async fn test_denied_media_never_contacts_relay() {
    let (connector, attempts) = counting();

    let result = TestParticipant::new("203.0.113.1")
        .with_media(MockMedia::denied())
        .try_start(&connector)
        .await;

    assert!(matches!(result, Err(PeerError::CapabilityUnavailable(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_probe_never_contacts_relay() {
    let (connector, attempts) = counting();

    let result = TestParticipant::new("203.0.113.1")
        .with_probe(MockProbe::failing())
        .try_start(&connector)
        .await;

    assert!(matches!(result, Err(PeerError::CapabilityUnavailable(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_probe_timeout_announces_empty_address() {
    let (connector, attempts) = counting();

    let participant = TestParticipant::new("203.0.113.1")
        .with_probe(MockProbe::hanging())
        .start(&connector)
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let id = participant.id().await;
    participant
        .wait_for(|s| s.directory.get(&id).is_some())
        .await;

    let announced = connector.inner.received_from(&id);
    assert_eq!(
        announced.first(),
        Some(&OutboundMessage::AnnounceMetadata {
            address: String::new()
        })
    );
    assert_eq!(participant.state().await.local_address, "");
}

#[tokio::test]
async fn test_stop_ends_session() {
    let (connector, _attempts) = counting();
    let participant = TestParticipant::new("203.0.113.1").start(&connector).await;
    let handle = participant.client.handle().clone();

    participant.client.stop().await;

    assert!(handle.is_cancelled());
    assert!(handle.get_state().await.is_err());
}

#[tokio::test]
async fn test_request_depart_reaches_coordinator() {
    let (connector, _attempts) = counting();
    let participant = TestParticipant::new("203.0.113.1").start(&connector).await;
    let id = participant.id().await;

    participant.client.request_depart();

    let leave = OutboundMessage::Depart { id: id.clone() };
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !connector.inner.received_from(&id).contains(&leave) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("leave forwarded to the coordinator");

    let state = participant.wait_for(|s| s.departed).await;
    assert!(state.connections.is_empty());
}
