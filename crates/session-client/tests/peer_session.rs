//! Peer Session tests against fake platform connections.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::protocol::{IceCandidate, NegotiationMessage};
use session_client::config::IceServer;
use session_client::media::{LocalMediaTrackSet, MediaTrack, TrackKind};
use session_client::peer::{
    IceConnectionState, PeerConnectionEvent, PeerConnectionState, PeerError, PeerSession, SdpKind,
};
use session_test_utils::{FakeMediaTrack, FakePeerConnectionFactory};
use std::sync::Arc;
use std::time::Duration;

fn local_media() -> LocalMediaTrackSet {
    LocalMediaTrackSet::new(vec![
        FakeMediaTrack::new("mic-1", TrackKind::Audio) as Arc<dyn MediaTrack>,
        FakeMediaTrack::new("camera-1", TrackKind::Video) as Arc<dyn MediaTrack>,
    ])
}

fn ice_servers() -> Vec<IceServer> {
    vec![IceServer::new("stun:stun.test:3478")]
}

fn scripted_factory() -> FakePeerConnectionFactory {
    FakePeerConnectionFactory::builder()
        .auto_connect(false)
        .build()
}

fn candidate(n: u32) -> NegotiationMessage {
    NegotiationMessage::IceCandidate(IceCandidate::new(format!("candidate:{n}")))
}

/// Feed every platform callback currently queued into the session.
async fn pump(session: &mut PeerSession) -> Vec<NegotiationMessage> {
    let mut relayed = Vec::new();
    while let Ok(event) =
        tokio::time::timeout(Duration::from_millis(20), session.next_event()).await
    {
        if let Some(message) = session.handle_event(event) {
            relayed.push(message);
        }
    }
    relayed
}

#[tokio::test]
async fn test_new_attaches_local_tracks() {
    let factory = scripted_factory();
    let media = local_media();
    let session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();

    let fake = factory.latest().unwrap();
    assert_eq!(fake.attached_tracks(), vec!["mic-1", "camera-1"]);
    assert_eq!(fake.ice_servers(), vec!["stun:stun.test:3478"]);
    assert_eq!(session.state(), PeerConnectionState::New);
    assert!(!session.has_negotiated());
}

#[tokio::test]
async fn test_factory_failure_surfaces() {
    let factory = FakePeerConnectionFactory::builder().fail_create().build();
    let result = PeerSession::new(&factory, &ice_servers(), &local_media());
    assert!(matches!(result, Err(PeerError::Create(_))));
}

#[tokio::test]
async fn test_candidates_queued_until_remote_description() {
    let factory = scripted_factory();
    let media = local_media();
    let mut session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();
    let fake = factory.latest().unwrap();

    for n in 1..=3 {
        assert_eq!(session.handle_remote(candidate(n)).await.unwrap(), None);
    }
    assert_eq!(session.pending_candidates(), 3);
    assert!(fake.applied_candidates().is_empty());

    let reply = session
        .handle_remote(NegotiationMessage::Offer {
            sdp: "v=0 remote offer".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(reply, Some(NegotiationMessage::Answer { .. })));
    assert_eq!(session.pending_candidates(), 0);

    let applied: Vec<String> = fake
        .applied_candidates()
        .into_iter()
        .map(|c| c.candidate)
        .collect();
    assert_eq!(applied, vec!["candidate:1", "candidate:2", "candidate:3"]);

    // Once the description is in, candidates apply immediately.
    session.handle_remote(candidate(4)).await.unwrap();
    assert_eq!(session.pending_candidates(), 0);
    assert_eq!(fake.applied_candidates().len(), 4);
}

#[tokio::test]
async fn test_offer_answer_round() {
    let factory = scripted_factory();
    let media = local_media();
    let mut session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();
    let fake = factory.latest().unwrap();

    let offer = session.create_offer().await.unwrap();
    let NegotiationMessage::Offer { sdp } = offer else {
        panic!("expected an offer, got {offer:?}");
    };
    assert_eq!(fake.local_description(), Some((SdpKind::Offer, sdp)));
    assert_eq!(session.state(), PeerConnectionState::Connecting);

    // A second offer on the same session is refused.
    assert!(matches!(
        session.create_offer().await,
        Err(PeerError::Unexpected(_))
    ));

    session.handle_remote(candidate(1)).await.unwrap();
    assert_eq!(session.pending_candidates(), 1);

    let reply = session
        .handle_remote(NegotiationMessage::Answer {
            sdp: "v=0 remote answer".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(reply, None);
    assert!(session.has_remote_description());
    assert_eq!(session.pending_candidates(), 0);
    assert_eq!(fake.applied_candidates().len(), 1);

    // A second answer is out of order.
    assert!(matches!(
        session
            .handle_remote(NegotiationMessage::Answer {
                sdp: "v=0 again".to_string()
            })
            .await,
        Err(PeerError::Unexpected(_))
    ));
}

#[tokio::test]
async fn test_answer_without_offer_is_rejected() {
    let factory = scripted_factory();
    let media = local_media();
    let mut session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();

    let result = session
        .handle_remote(NegotiationMessage::Answer {
            sdp: "v=0 stray".to_string(),
        })
        .await;
    assert!(matches!(result, Err(PeerError::Unexpected(_))));
    assert!(factory.latest().unwrap().remote_description().is_none());
}

#[tokio::test]
async fn test_rejected_description_surfaces() {
    let factory = FakePeerConnectionFactory::builder()
        .auto_connect(false)
        .reject_remote_descriptions()
        .build();
    let media = local_media();
    let mut session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();

    let result = session
        .handle_remote(NegotiationMessage::Offer {
            sdp: "v=0 garbage".to_string(),
        })
        .await;
    assert!(matches!(result, Err(PeerError::Description(_))));
    assert!(!session.has_remote_description());
}

#[tokio::test]
async fn test_connected_needs_remote_track() {
    let factory = scripted_factory();
    let media = local_media();
    let mut session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();
    let fake = factory.latest().unwrap();

    session
        .handle_remote(NegotiationMessage::Offer {
            sdp: "v=0 remote offer".to_string(),
        })
        .await
        .unwrap();

    fake.emit_local_candidate("candidate:local");
    fake.emit_ice_state(IceConnectionState::Checking);
    fake.emit_ice_state(IceConnectionState::Connected);
    let relayed = pump(&mut session).await;
    assert_eq!(
        relayed,
        vec![NegotiationMessage::IceCandidate(IceCandidate::new(
            "candidate:local"
        ))]
    );
    assert_eq!(session.state(), PeerConnectionState::Connecting);

    fake.emit_remote_track();
    pump(&mut session).await;
    assert_eq!(session.state(), PeerConnectionState::Connected);
    assert_eq!(session.remote_tracks().len(), 1);
}

#[tokio::test]
async fn test_ice_loss_and_recovery() {
    let factory = FakePeerConnectionFactory::default();
    let media = local_media();
    let mut session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();
    let mut states = session.subscribe();
    let fake = factory.latest().unwrap();

    session.create_offer().await.unwrap();
    session
        .handle_remote(NegotiationMessage::Answer {
            sdp: "v=0 remote answer".to_string(),
        })
        .await
        .unwrap();
    pump(&mut session).await;
    assert_eq!(session.state(), PeerConnectionState::Connected);
    assert!(states.has_changed().unwrap());
    states.mark_unchanged();

    fake.emit_ice_state(IceConnectionState::Disconnected);
    pump(&mut session).await;
    assert_eq!(session.state(), PeerConnectionState::Disconnected);

    fake.emit_ice_state(IceConnectionState::Connected);
    pump(&mut session).await;
    assert_eq!(session.state(), PeerConnectionState::Connected);

    fake.emit_ice_state(IceConnectionState::Failed);
    pump(&mut session).await;
    assert_eq!(*states.borrow_and_update(), PeerConnectionState::Failed);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let factory = scripted_factory();
    let media = local_media();
    let mut session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();
    let fake = factory.latest().unwrap();

    assert!(session.close());
    assert!(!session.close());
    drop(session);

    assert_eq!(fake.close_count(), 1);
}

#[tokio::test]
async fn test_closed_session_refuses_messages() {
    let factory = scripted_factory();
    let media = local_media();
    let mut session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();
    session.handle_remote(candidate(1)).await.unwrap();

    session.close();
    assert_eq!(session.state(), PeerConnectionState::Closed);
    assert_eq!(session.pending_candidates(), 0);
    assert!(matches!(
        session.handle_remote(candidate(2)).await,
        Err(PeerError::Closed)
    ));
    assert!(matches!(session.create_offer().await, Err(PeerError::Closed)));
}

#[tokio::test]
async fn test_drop_closes_connection() {
    let factory = scripted_factory();
    let media = local_media();
    let session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();
    drop(session);
    assert!(factory.latest().unwrap().is_closed());
}

#[tokio::test]
async fn test_remote_track_events_after_close_ignored() {
    let factory = scripted_factory();
    let media = local_media();
    let mut session = PeerSession::new(&factory, &ice_servers(), &media).unwrap();
    session.close();

    let track = FakeMediaTrack::new("remote", TrackKind::Video);
    let relayed = session.handle_event(PeerConnectionEvent::RemoteTrack(track));
    assert!(relayed.is_none());
    assert!(session.remote_tracks().is_empty());
}
