//! End-to-end signaling scenarios against a live room directory.
//!
//! Peers talk to room workers through their handles and read what the
//! coordinator queued for them, the same path a WebSocket connection takes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::time::Duration;

use signaling_service::actors::SignalOutcome;
use signaling_service::errors::SignalingError;
use signaling_service::mesh::NegotiationState;
use signaling_service::protocol::{LeaveReason, MediaState, MessageType, PresenceKind, SignalKind};
use signaling_test_utils::{pid, TestPeer, TestRoom};

fn presenting(on: bool) -> MediaState {
    MediaState {
        is_presenting: on,
        ..MediaState::default()
    }
}

// ============================================================================
// Negotiation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_party_call_then_heartbeat_timeout() {
    let started = TestRoom::new("H").with_title("R1").start().await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut guest = TestPeer::new("P");

    host.join(room).await.unwrap();
    host.expect_presence(PresenceKind::RoomState);
    let joined = guest.join(room).await.unwrap();
    assert_eq!(joined.edges.len(), 1);
    host.expect_presence(PresenceKind::Joined);
    guest.expect_presence(PresenceKind::RoomState);

    let outcome = room.signal(host.offer(guest.id())).await.unwrap();
    assert_eq!(outcome, SignalOutcome::Delivered { sequence: 1 });
    let offer = guest.expect_next(MessageType::SignalOffer);
    assert_eq!(offer.sequence, Some(1));
    assert_eq!(offer.from_id, pid("H"));

    room.signal(guest.answer(host.id())).await.unwrap();
    let answer = host.expect_next(MessageType::SignalAnswer);
    assert_eq!(answer.sequence, Some(1));

    let state = room.get_state().await.unwrap();
    assert_eq!(
        state.edge(&pid("H"), &pid("P")).unwrap().state,
        NegotiationState::Stable
    );

    // The guest goes silent; the host keeps beating.
    for step in [5, 5, 6] {
        tokio::time::advance(Duration::from_secs(step)).await;
        host.heartbeat(room).await.unwrap();
    }

    let state = room.get_state().await.unwrap();
    assert_eq!(state.snapshot.participants.len(), 1);
    assert!(state.edges.is_empty());
    assert_eq!(state.grace_records, 1);
    host.expect_left(&pid("P"), LeaveReason::Timeout);
    host.expect_silent();
}

#[tokio::test]
async fn test_glare_impolite_offer_wins() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    // "H" < "P": H is polite, P is impolite.
    let mut polite = TestPeer::new("H");
    let mut impolite = TestPeer::new("P");
    polite.join(room).await.unwrap();
    impolite.join(room).await.unwrap();
    polite.drain();
    impolite.drain();

    room.signal(polite.offer(impolite.id())).await.unwrap();
    let outcome = room.signal(impolite.offer(polite.id())).await.unwrap();
    assert_eq!(outcome, SignalOutcome::Delivered { sequence: 1 });

    impolite.expect_next(MessageType::SignalOffer);
    polite.expect_next(MessageType::SignalOffer);

    let state = room.get_state().await.unwrap();
    let edge = state.edge(&pid("H"), &pid("P")).unwrap();
    assert_eq!(edge.state, NegotiationState::Offering);
    assert_eq!(edge.pending_offerer, Some(pid("P")));

    // The polite side rolled back and answers the winning offer.
    room.signal(polite.answer(impolite.id())).await.unwrap();
    impolite.expect_next(MessageType::SignalAnswer);

    let state = room.get_state().await.unwrap();
    let edge = state.edge(&pid("H"), &pid("P")).unwrap();
    assert_eq!(edge.state, NegotiationState::Stable);
    assert!(edge.pending_offerer.is_none());
}

#[tokio::test]
async fn test_glare_polite_offer_ignored() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    let mut polite = TestPeer::new("H");
    let mut impolite = TestPeer::new("P");
    polite.join(room).await.unwrap();
    impolite.join(room).await.unwrap();
    polite.drain();
    impolite.drain();

    room.signal(impolite.offer(polite.id())).await.unwrap();
    let outcome = room.signal(polite.offer(impolite.id())).await.unwrap();
    assert_eq!(outcome, SignalOutcome::IgnoredGlare);

    polite.expect_next(MessageType::SignalOffer);
    impolite.expect_silent();

    room.signal(polite.answer(impolite.id())).await.unwrap();
    let answer = impolite.expect_next(MessageType::SignalAnswer);
    // The ignored offer consumed no delivery sequence.
    assert_eq!(answer.sequence, Some(1));

    let state = room.get_state().await.unwrap();
    assert_eq!(
        state.edge(&pid("H"), &pid("P")).unwrap().state,
        NegotiationState::Stable
    );
}

#[tokio::test]
async fn test_candidates_buffered_until_stable() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut guest = TestPeer::new("P");
    host.join(room).await.unwrap();
    guest.join(room).await.unwrap();
    host.drain();
    guest.drain();

    room.signal(host.offer(guest.id())).await.unwrap();
    for _ in 0..2 {
        let outcome = room.signal(host.candidate(guest.id())).await.unwrap();
        assert_eq!(outcome, SignalOutcome::Buffered);
    }
    guest.expect_next(MessageType::SignalOffer);
    guest.expect_silent();

    let state = room.get_state().await.unwrap();
    assert_eq!(
        state.edge(&pid("H"), &pid("P")).unwrap().buffered_candidates,
        2
    );

    room.signal(guest.answer(host.id())).await.unwrap();
    let flushed = guest.drain_kind(MessageType::SignalCandidate);
    let sequences: Vec<_> = flushed.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![Some(2), Some(3)]);

    // Once stable, candidates go straight through.
    let outcome = room.signal(host.candidate(guest.id())).await.unwrap();
    assert_eq!(outcome, SignalOutcome::Delivered { sequence: 4 });
}

#[tokio::test]
async fn test_sequence_gap_resets_edge_and_recovers() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut guest = TestPeer::new("P");
    host.join(room).await.unwrap();
    guest.join(room).await.unwrap();

    room.signal(host.offer(guest.id())).await.unwrap();
    room.signal(guest.answer(host.id())).await.unwrap();
    host.drain();
    guest.drain();

    let gap = host.signal_with_sequence(SignalKind::Candidate, guest.id(), 3);
    let err = room.signal(gap).await.unwrap_err();
    assert!(matches!(
        err,
        SignalingError::SequenceGap {
            expected: 2,
            received: 3
        }
    ));

    let state = room.get_state().await.unwrap();
    assert_eq!(
        state.edge(&pid("H"), &pid("P")).unwrap().state,
        NegotiationState::Idle
    );
    let refresh = guest.expect_next(MessageType::NegotiationNeeded);
    assert_eq!(refresh.from_id, pid("H"));
    guest.expect_silent();
    host.expect_silent();

    // The impolite side re-offers; both directions continue in order.
    room.signal(guest.offer(host.id())).await.unwrap();
    host.expect_next(MessageType::SignalOffer);
    room.signal(host.answer(guest.id())).await.unwrap();
    guest.expect_next(MessageType::SignalAnswer);

    let state = room.get_state().await.unwrap();
    assert_eq!(
        state.edge(&pid("H"), &pid("P")).unwrap().state,
        NegotiationState::Stable
    );
}

#[tokio::test]
async fn test_dead_queue_resets_edge_and_allows_reattach() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut guest = TestPeer::new("P");
    host.join(room).await.unwrap();
    guest.join(room).await.unwrap();
    host.drain();

    guest.disconnect();
    let err = room.signal(host.offer(guest.id())).await.unwrap_err();
    assert!(matches!(err, SignalingError::DeliveryFailed(_)));

    let state = room.get_state().await.unwrap();
    assert_eq!(
        state.edge(&pid("H"), &pid("P")).unwrap().state,
        NegotiationState::Idle
    );

    // Still a member, so a new connection binds without a fresh announcement.
    let rejoined = guest.join(room).await.unwrap();
    assert!(!rejoined.reconnected);
    assert_eq!(rejoined.edges.len(), 1);
    guest.expect_presence(PresenceKind::RoomState);
    host.expect_silent();
}

// ============================================================================
// Membership
// ============================================================================

#[tokio::test]
async fn test_mesh_grows_and_shrinks() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    let mut peers: Vec<TestPeer> = ["H", "P", "Q"].into_iter().map(TestPeer::new).collect();
    for peer in &mut peers {
        peer.join(room).await.unwrap();
    }

    let state = room.get_state().await.unwrap();
    assert_eq!(state.snapshot.participants.len(), 3);
    assert_eq!(state.edges.len(), 3);
    let order: Vec<_> = state
        .snapshot
        .participants
        .iter()
        .map(|p| p.id.as_str().to_string())
        .collect();
    assert_eq!(order, vec!["H", "P", "Q"]);

    for peer in &mut peers {
        peer.drain();
    }
    peers[2].leave(room).await.unwrap();
    peers[2].leave(room).await.unwrap();

    let state = room.get_state().await.unwrap();
    assert_eq!(state.edges.len(), 1);
    assert!(state.edge(&pid("H"), &pid("P")).is_some());
    assert_eq!(state.grace_records, 0);
    peers[0].expect_left(&pid("Q"), LeaveReason::Voluntary);
    peers[1].expect_left(&pid("Q"), LeaveReason::Voluntary);

    // A voluntary leave is not a reconnection.
    let back = peers[2].join(room).await.unwrap();
    assert!(!back.reconnected);
    assert_eq!(back.edges.len(), 2);
    peers[0].expect_presence(PresenceKind::Joined);
}

#[tokio::test]
async fn test_room_capacity_enforced() {
    let started = TestRoom::new("H").with_capacity(2).start().await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut guest = TestPeer::new("P");
    let mut late = TestPeer::new("Q");
    host.join(room).await.unwrap();
    guest.join(room).await.unwrap();

    let err = late.join(room).await.unwrap_err();
    assert!(matches!(err, SignalingError::RoomFull { capacity: 2 }));

    guest.leave(room).await.unwrap();
    late.join(room).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_participant_rejoins_with_same_identity() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut guest = TestPeer::new("P").with_display_name("Pat");
    host.join(room).await.unwrap();
    guest.join(room).await.unwrap();

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(5)).await;
        host.heartbeat(room).await.unwrap();
    }
    assert_eq!(room.get_state().await.unwrap().grace_records, 1);
    host.drain();

    let mut returning = TestPeer::new("P").with_display_name("Someone Else");
    let result = returning.join(room).await.unwrap();
    assert!(result.reconnected);
    assert_eq!(result.display_name, "Pat");
    let announcement = host.expect_presence(PresenceKind::Reconnected);
    assert_eq!(
        announcement.presence.unwrap().display_name.as_deref(),
        Some("Pat")
    );
}

#[tokio::test(start_paused = true)]
async fn test_grace_expiry_forgets_identity() {
    let started = TestRoom::new("H")
        .with_grace_period(Duration::from_secs(10))
        .start()
        .await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut guest = TestPeer::new("P").with_display_name("Pat");
    host.join(room).await.unwrap();
    guest.join(room).await.unwrap();

    // Timeout at 15s, grace runs out at 25s.
    for _ in 0..6 {
        tokio::time::advance(Duration::from_secs(5)).await;
        host.heartbeat(room).await.unwrap();
    }
    assert_eq!(room.get_state().await.unwrap().grace_records, 0);

    let mut returning = TestPeer::new("P").with_display_name("Pat Again");
    let result = returning.join(room).await.unwrap();
    assert!(!result.reconnected);
    assert_eq!(result.display_name, "Pat Again");
}

// ============================================================================
// Renegotiation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_screen_share_renegotiates_every_edge_once() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut presenter = TestPeer::new("P");
    let mut viewer = TestPeer::new("Q");
    host.join(room).await.unwrap();
    presenter.join(room).await.unwrap();
    viewer.join(room).await.unwrap();

    room.signal(host.offer(presenter.id())).await.unwrap();
    room.signal(presenter.answer(host.id())).await.unwrap();
    host.drain();
    presenter.drain();
    viewer.drain();

    for (i, on) in [true, false, true].into_iter().enumerate() {
        if i > 0 {
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        room.update_media(pid("P"), presenting(on)).await.unwrap();
    }
    presenter.expect_silent();

    tokio::time::advance(Duration::from_millis(400)).await;
    let state = room.get_state().await.unwrap();
    assert_eq!(
        state.edge(&pid("H"), &pid("P")).unwrap().state,
        NegotiationState::Renegotiating
    );
    assert_eq!(
        state.edge(&pid("P"), &pid("Q")).unwrap().state,
        NegotiationState::Idle
    );

    let requests = presenter.drain_kind(MessageType::NegotiationNeeded);
    let peers: HashSet<_> = requests.iter().map(|e| e.from_id.clone()).collect();
    assert_eq!(requests.len(), 2);
    assert_eq!(peers, HashSet::from([pid("H"), pid("Q")]));

    for other in [&mut host, &mut viewer] {
        let update = other.expect_presence(PresenceKind::MediaChanged);
        assert!(update.media_state.unwrap().is_presenting);
        other.expect_silent();
    }

    // A fresh offer settles the renegotiating edge again.
    room.signal(presenter.offer(host.id())).await.unwrap();
    room.signal(host.answer(presenter.id())).await.unwrap();
    let state = room.get_state().await.unwrap();
    assert_eq!(
        state.edge(&pid("H"), &pid("P")).unwrap().state,
        NegotiationState::Stable
    );
}

#[tokio::test(start_paused = true)]
async fn test_screen_share_round_trip_in_window_is_silent() {
    let started = TestRoom::new("H")
        .with_debounce(Duration::from_millis(200))
        .start()
        .await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut presenter = TestPeer::new("P");
    host.join(room).await.unwrap();
    presenter.join(room).await.unwrap();
    host.drain();
    presenter.drain();

    room.update_media(pid("P"), presenting(true)).await.unwrap();
    tokio::time::advance(Duration::from_millis(50)).await;
    room.update_media(pid("P"), presenting(false)).await.unwrap();

    tokio::time::advance(Duration::from_millis(300)).await;
    let state = room.get_state().await.unwrap();
    let p = state
        .snapshot
        .participants
        .iter()
        .find(|p| p.id == pid("P"))
        .unwrap();
    assert!(!p.media_state.is_presenting);
    host.expect_silent();
    presenter.expect_silent();
}

// ============================================================================
// Host controls
// ============================================================================

#[tokio::test]
async fn test_host_leaves_and_role_moves_in_join_order() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut second = TestPeer::new("P");
    let mut third = TestPeer::new("Q");
    host.join(room).await.unwrap();
    second.join(room).await.unwrap();
    third.join(room).await.unwrap();
    third.drain();

    host.leave(room).await.unwrap();

    third.expect_left(&pid("H"), LeaveReason::Voluntary);
    let change = third.expect_presence(PresenceKind::HostChanged);
    assert_eq!(change.presence.unwrap().host_id, Some(pid("P")));

    let state = room.get_state().await.unwrap();
    assert_eq!(state.snapshot.host_id, pid("P"));

    // The new host has the host's powers.
    room.remove_participant(pid("P"), pid("Q")).await.unwrap();
    third.expect_left(&pid("Q"), LeaveReason::Removed);
}

#[tokio::test]
async fn test_only_host_may_remove_or_close() {
    let started = TestRoom::new("H").start().await;
    let room = &started.room;
    let mut host = TestPeer::new("H");
    let mut guest = TestPeer::new("P");
    host.join(room).await.unwrap();
    guest.join(room).await.unwrap();
    host.drain();
    guest.drain();

    let err = room.remove_participant(pid("P"), pid("H")).await.unwrap_err();
    assert!(matches!(err, SignalingError::PermissionDenied(_)));
    let err = room.close(pid("P")).await.unwrap_err();
    assert!(matches!(err, SignalingError::PermissionDenied(_)));

    room.close(pid("H")).await.unwrap();
    host.expect_left(&pid("H"), LeaveReason::RoomClosed);
    guest.expect_left(&pid("P"), LeaveReason::RoomClosed);

    let err = room.get_state().await.unwrap_err();
    assert!(matches!(err, SignalingError::RoomNotFound(_)));
}

// ============================================================================
// Directory
// ============================================================================

#[tokio::test]
async fn test_directory_drain_notifies_members() {
    let started = TestRoom::new("H").start().await;
    let mut host = TestPeer::new("H");
    let mut guest = TestPeer::new("P");
    host.join(&started.room).await.unwrap();
    guest.join(&started.room).await.unwrap();
    host.drain();
    guest.drain();

    started
        .controller
        .shutdown(Duration::from_secs(5))
        .await
        .unwrap();

    for peer in [&mut host, &mut guest] {
        let notice = peer.recv().await.expect("drain notice");
        assert_eq!(notice.kind, MessageType::Error);
    }

    assert!(started
        .controller
        .create_room(pid("X"), None, None)
        .await
        .is_err());
}
