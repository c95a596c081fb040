//! Signaling Channel tests against a scripted coordinator.
//!
//! Time is paused so the backoff schedule can be asserted exactly.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::protocol::{IceCandidate, NegotiationMessage, SignalingEvent};
use common::secret::SecretString;
use common::types::{MeetingId, ParticipantRole};
use session_client::config::ReconnectPolicy;
use session_client::signaling::transport::TransportError;
use session_client::signaling::{ChannelEvent, CloseReason, SignalingChannelHandle};
use session_test_utils::{joined_room, ScriptedConnector, TEST_SIGNALING_URL};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(400),
    }
}

fn meeting() -> MeetingId {
    MeetingId::parse("abc123").unwrap()
}

fn open(
    connector: &Arc<ScriptedConnector>,
) -> (SignalingChannelHandle, mpsc::Receiver<ChannelEvent>) {
    SignalingChannelHandle::connect(
        Arc::clone(connector) as _,
        TEST_SIGNALING_URL,
        SecretString::from("secret-token"),
        policy(),
        CancellationToken::new(),
    )
}

async fn next_event(events: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("channel event stream ended")
}

fn candidate(n: u32) -> NegotiationMessage {
    NegotiationMessage::IceCandidate(IceCandidate::new(format!("candidate:{n}")))
}

#[tokio::test(start_paused = true)]
async fn test_join_sent_once_connected() {
    let connector = Arc::new(ScriptedConnector::new());
    let (channel, mut events) = open(&connector);
    channel
        .join_room(meeting(), ParticipantRole::Clinician)
        .await
        .unwrap();

    let mut server = connector.next_connection().await;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    assert_eq!(
        server.recv().await,
        SignalingEvent::JoinRoom {
            meeting_id: meeting(),
            role: ParticipantRole::Clinician,
        }
    );

    server.send(joined_room("abc123")).await;
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Message(joined_room("abc123"))
    );
    assert_eq!(connector.presented_tokens(), vec!["secret-token".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_rejoins_after_transport_drop() {
    let connector = Arc::new(ScriptedConnector::new());
    let (channel, mut events) = open(&connector);
    channel
        .join_room(meeting(), ParticipantRole::Patient)
        .await
        .unwrap();

    let mut server = connector.next_connection().await;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    assert!(matches!(server.recv().await, SignalingEvent::JoinRoom { .. }));

    server.drop_transport();
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Degraded {
            attempt: 1,
            max_attempts: 3
        }
    );

    let mut server = connector.next_connection().await;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    assert_eq!(
        server.recv().await,
        SignalingEvent::JoinRoom {
            meeting_id: meeting(),
            role: ParticipantRole::Patient,
        }
    );
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_until_exhausted() {
    let connector = Arc::new(ScriptedConnector::new());
    connector.set_offline(true);
    let started = Instant::now();
    let (_channel, mut events) = open(&connector);

    for attempt in 1..=3 {
        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::Degraded {
                attempt,
                max_attempts: 3
            }
        );
    }
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Closed(CloseReason::Exhausted)
    );

    // 100 + 200 + 400 ms of backoff between the four attempts.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(700), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(750), "{elapsed:?}");
    assert_eq!(connector.attempts(), 4);
    assert!(events.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_recovers_before_exhaustion() {
    let connector = Arc::new(ScriptedConnector::new());
    connector.fail_next(2);
    let (_channel, mut events) = open(&connector);

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Degraded {
            attempt: 1,
            max_attempts: 3
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Degraded {
            attempt: 2,
            max_attempts: 3
        }
    );
    let _server = connector.next_connection().await;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    assert_eq!(connector.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_offline_messages_flushed_in_order_after_join() {
    let connector = Arc::new(ScriptedConnector::new());
    connector.set_offline(true);
    let (channel, mut events) = open(&connector);

    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::Degraded { attempt: 1, .. }
    ));
    channel
        .join_room(meeting(), ParticipantRole::Clinician)
        .await
        .unwrap();
    for n in 1..=3 {
        channel.send(candidate(n)).await.unwrap();
    }
    connector.set_offline(false);

    let mut server = connector.next_connection().await;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    assert!(matches!(server.recv().await, SignalingEvent::JoinRoom { .. }));
    for n in 1..=3 {
        assert_eq!(
            server.recv().await,
            SignalingEvent::IceCandidate {
                candidate: IceCandidate::new(format!("candidate:{n}")),
                meeting_id: meeting(),
            }
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_messages_before_join_wait_for_membership() {
    let connector = Arc::new(ScriptedConnector::new());
    let (channel, mut events) = open(&connector);
    let mut server = connector.next_connection().await;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);

    channel
        .send(NegotiationMessage::Offer {
            sdp: "v=0 offer".to_string(),
        })
        .await
        .unwrap();
    assert!(server.recv_within(Duration::from_millis(50)).await.is_none());

    channel
        .join_room(meeting(), ParticipantRole::Clinician)
        .await
        .unwrap();
    assert!(matches!(server.recv().await, SignalingEvent::JoinRoom { .. }));
    assert_eq!(
        server.recv().await,
        SignalingEvent::Offer {
            sdp: "v=0 offer".to_string(),
            meeting_id: meeting(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let connector = Arc::new(ScriptedConnector::new());
    let (channel, mut events) = open(&connector);
    let mut server = connector.next_connection().await;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);

    channel.disconnect().await;
    channel.disconnect().await;
    assert!(channel.is_closed());

    server.closed().await;
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Closed(CloseReason::Requested)
    );
    assert_eq!(
        channel.send(candidate(1)).await,
        Err(TransportError::Closed)
    );
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_owner_token_stops_reconnection() {
    let connector = Arc::new(ScriptedConnector::new());
    connector.set_offline(true);
    let token = CancellationToken::new();
    let (channel, mut events) = SignalingChannelHandle::connect(
        Arc::clone(&connector) as _,
        TEST_SIGNALING_URL,
        SecretString::from("secret-token"),
        policy(),
        token.clone(),
    );

    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::Degraded { attempt: 1, .. }
    ));
    token.cancel();
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Closed(CloseReason::Requested)
    );
    channel.disconnect().await;

    let attempts = connector.attempts();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempts(), attempts);
}

#[tokio::test(start_paused = true)]
async fn test_links_dropped_before_any_reply_exhaust_retries() {
    let connector = Arc::new(ScriptedConnector::new());
    let (_channel, mut events) = open(&connector);

    // The coordinator accepts every upgrade and hangs up at once.
    for attempt in 1..=3 {
        connector.next_connection().await.drop_transport();
        assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::Degraded {
                attempt,
                max_attempts: 3
            }
        );
    }
    connector.next_connection().await.drop_transport();
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Closed(CloseReason::Exhausted)
    );
    assert_eq!(connector.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_answered_link_resets_retry_count() {
    let connector = Arc::new(ScriptedConnector::new());
    connector.fail_next(1);
    let (channel, mut events) = open(&connector);
    channel
        .join_room(meeting(), ParticipantRole::Patient)
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Degraded {
            attempt: 1,
            max_attempts: 3
        }
    );
    let mut server = connector.next_connection().await;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    assert!(matches!(server.recv().await, SignalingEvent::JoinRoom { .. }));
    server.send(joined_room("abc123")).await;
    server.drop_transport();

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Message(joined_room("abc123"))
    );
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Degraded {
            attempt: 1,
            max_attempts: 3
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_try_send_reports_full_mailbox() {
    let connector = Arc::new(ScriptedConnector::new());
    let (channel, mut events) = open(&connector);
    channel
        .join_room(meeting(), ParticipantRole::Clinician)
        .await
        .unwrap();
    let mut server = connector.next_connection().await;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    assert!(matches!(server.recv().await, SignalingEvent::JoinRoom { .. }));

    // Nobody reads the event stream, so the actor stalls handing events over.
    for _ in 0..300 {
        server.send(joined_room("abc123")).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut accepted = 0;
    let refused = loop {
        match channel.try_send(candidate(accepted)) {
            Ok(()) => accepted += 1,
            Err(e) => break e,
        }
        assert!(accepted <= 1000, "mailbox never filled");
    };
    assert_eq!(refused, TransportError::Busy);
    assert!(accepted > 0);

    for _ in 0..300 {
        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::Message(joined_room("abc123"))
        );
    }
    assert_eq!(
        server.recv().await,
        SignalingEvent::IceCandidate {
            candidate: IceCandidate::new("candidate:0"),
            meeting_id: meeting(),
        }
    );
}
