//! Full-mesh integration tests through the in-process coordinator.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::ParticipantId;
use mesh_peer::actors::NegotiationState;
use mesh_peer::relay::{OutboundMessage, Role};
use mesh_test_utils::{MockCoordinator, TestParticipant};

#[tokio::test]
async fn test_two_participants_connect_with_complementary_roles() {
    let coordinator = MockCoordinator::new();
    let alice = TestParticipant::new("203.0.113.1").start(&coordinator).await;
    let bob = TestParticipant::new("203.0.113.2").start(&coordinator).await;

    let alice_state = alice.wait_for_connected(1).await;
    let bob_state = bob.wait_for_connected(1).await;

    let alice_id = alice_state.local_id.clone().unwrap();
    let bob_id = bob_state.local_id.clone().unwrap();

    assert_eq!(
        alice_state.connection(&bob_id).unwrap().role,
        Role::Responder
    );
    assert_eq!(bob_state.connection(&alice_id).unwrap().role, Role::Initiator);

    // Exactly one offer crossed the relay
    let offers: usize = coordinator
        .received()
        .iter()
        .filter(|(_, m)| {
            matches!(m, OutboundMessage::RelaySessionDescription { description, .. }
                if description.sdp_type == common::types::SdpType::Offer)
        })
        .count();
    assert_eq!(offers, 1);
}

#[tokio::test]
async fn test_tiles_show_directory_metadata() {
    let coordinator = MockCoordinator::new();
    let alice = TestParticipant::new("203.0.113.1").start(&coordinator).await;
    let bob = TestParticipant::new("203.0.113.2").start(&coordinator).await;
    alice.wait_for_connected(1).await;
    bob.wait_for_connected(1).await;

    let alice_id = alice.id().await;
    let bob_id = bob.id().await;

    bob.wait_for(|s| s.tiles.contains(&alice_id) && s.tiles.contains(&bob_id))
        .await;

    // Alice joined first and leads
    let tile = bob.display.tile(&alice_id).unwrap();
    assert_eq!(tile.metadata.address, "203.0.113.1");
    assert!(tile.metadata.is_leader);
    assert!(tile.stream_id.is_some());

    let own = bob.display.tile(&bob_id).unwrap();
    assert_eq!(own.metadata.address, "203.0.113.2");
    assert_eq!(own.stream_id.as_deref(), Some(bob.media.stream().id.as_str()));
    assert!(bob.display.tile(&ParticipantId::anonymous()).is_none());
}

#[tokio::test]
async fn test_three_participants_form_full_mesh() {
    let coordinator = MockCoordinator::new();
    let participants = [
        TestParticipant::new("203.0.113.1").start(&coordinator).await,
        TestParticipant::new("203.0.113.2").start(&coordinator).await,
        TestParticipant::new("203.0.113.3").start(&coordinator).await,
    ];

    for participant in &participants {
        let state = participant.wait_for_connected(2).await;
        assert_eq!(state.directory.len(), 3);
        assert!(state
            .connections
            .iter()
            .all(|c| Some(&c.remote_id) != state.local_id.as_ref()));
    }

    // One engine handle per remote participant, none closed
    for participant in &participants {
        assert_eq!(participant.engine.handle_count(), 2);
        for index in 0..2 {
            assert!(!participant.engine.handle(index).unwrap().is_closed());
        }
    }
}

#[tokio::test]
async fn test_departure_propagates_stop() {
    let coordinator = MockCoordinator::new();
    let alice = TestParticipant::new("203.0.113.1").start(&coordinator).await;
    let bob = TestParticipant::new("203.0.113.2").start(&coordinator).await;
    let carol = TestParticipant::new("203.0.113.3").start(&coordinator).await;

    for participant in [&alice, &bob, &carol] {
        participant.wait_for_connected(2).await;
    }
    let carol_id = carol.id().await;

    carol.client.depart().await.unwrap();
    carol.client.depart().await.unwrap();

    for participant in [&alice, &bob] {
        let state = participant
            .wait_for(|s| s.connections.len() == 1 && s.directory.len() == 2)
            .await;
        assert!(state.connection(&carol_id).is_none());
        assert!(participant.display.tile(&carol_id).is_none());
        assert_eq!(
            state.connections.first().unwrap().state,
            NegotiationState::Connected
        );
    }

    let departures = coordinator
        .received_from(&carol_id)
        .into_iter()
        .filter(|m| matches!(m, OutboundMessage::Depart { .. }))
        .count();
    assert_eq!(departures, 1);

    let carol_state = carol.state().await;
    assert!(carol_state.departed);
    assert!(carol_state.connections.is_empty());
    assert!(carol.engine.handle(0).unwrap().is_closed());
}

#[tokio::test]
async fn test_relay_loss_clears_session() {
    let coordinator = MockCoordinator::new();
    let alice = TestParticipant::new("203.0.113.1").start(&coordinator).await;
    let bob = TestParticipant::new("203.0.113.2").start(&coordinator).await;
    alice.wait_for_connected(1).await;
    bob.wait_for_connected(1).await;

    let bob_id = bob.id().await;
    coordinator.disconnect(&bob_id);

    let state = bob
        .wait_for(|s| !s.relay_connected && s.connections.is_empty())
        .await;
    assert_eq!(state.local_id, None);

    // The remaining participant is told to stop
    alice.wait_for(|s| s.connections.is_empty()).await;
}

#[tokio::test]
async fn test_receive_only_directives_limit_media_to_initiator() {
    let coordinator = MockCoordinator::with_bidirectional(Some(false));
    let alice = TestParticipant::new("203.0.113.1").start(&coordinator).await;
    let bob = TestParticipant::new("203.0.113.2").start(&coordinator).await;
    alice.wait_for_connected(1).await;
    bob.wait_for_connected(1).await;

    // Alice responds and sends nothing; Bob initiates and sends
    let alice_calls = alice.engine.handle(0).unwrap().calls();
    assert!(!alice_calls.iter().any(|c| c.starts_with("add_track")));
    let bob_calls = bob.engine.handle(0).unwrap().calls();
    assert!(bob_calls.iter().any(|c| c.starts_with("add_track")));
}
