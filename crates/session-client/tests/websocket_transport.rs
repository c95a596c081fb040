//! WebSocket connector tests against the real coordinator router.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::protocol::{NegotiationMessage, SignalingEvent};
use common::secret::SecretString;
use common::types::{MeetingId, ParticipantRole};
use room_coordinator::actors::RoomCoordinatorActorHandle;
use room_coordinator::ws::{signaling_router, SignalingState, SIGNALING_PATH};
use session_client::config::ClientConfig;
use session_client::signaling::{SignalingConnector, TransportError, WebSocketConnector};
use session_client::SessionState;
use session_test_utils::{test_config, FakeMediaDevices, FakePeerConnectionFactory, TestParticipant};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct TestCoordinator {
    addr: SocketAddr,
    coordinator: RoomCoordinatorActorHandle,
}

impl TestCoordinator {
    async fn start() -> Self {
        let coordinator = RoomCoordinatorActorHandle::new("rc-transport-test".to_string(), 10);
        let app = signaling_router(SignalingState {
            coordinator: coordinator.clone(),
            require_auth_token: true,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server");
        });

        Self { addr, coordinator }
    }

    fn url(&self) -> String {
        format!("ws://{}{SIGNALING_PATH}", self.addr)
    }

    fn config(&self) -> ClientConfig {
        let mut config = test_config();
        config.signaling_url = self.url();
        config
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        self.coordinator.cancel();
    }
}

fn token() -> SecretString {
    SecretString::from("ws-test-token")
}

fn meeting() -> MeetingId {
    MeetingId::parse("abc123").unwrap()
}

async fn recv(inbound: &mut tokio::sync::mpsc::Receiver<SignalingEvent>) -> SignalingEvent {
    tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("timed out waiting for coordinator event")
        .expect("link closed")
}

#[tokio::test]
async fn test_join_over_websocket() {
    let server = TestCoordinator::start().await;
    let mut link = WebSocketConnector
        .connect(&server.url(), &token())
        .await
        .unwrap();

    link.outbound
        .send(SignalingEvent::JoinRoom {
            meeting_id: meeting(),
            role: ParticipantRole::Patient,
        })
        .await
        .unwrap();

    assert_eq!(
        recv(&mut link.inbound).await,
        SignalingEvent::JoinedRoom {
            success: true,
            meeting_id: meeting(),
            reason: None,
        }
    );
}

#[tokio::test]
async fn test_relay_between_two_links() {
    let server = TestCoordinator::start().await;
    let mut doctor = WebSocketConnector
        .connect(&server.url(), &token())
        .await
        .unwrap();
    let mut patient = WebSocketConnector
        .connect(&server.url(), &token())
        .await
        .unwrap();

    doctor
        .outbound
        .send(SignalingEvent::JoinRoom {
            meeting_id: meeting(),
            role: ParticipantRole::Clinician,
        })
        .await
        .unwrap();
    assert!(matches!(
        recv(&mut doctor.inbound).await,
        SignalingEvent::JoinedRoom { success: true, .. }
    ));

    patient
        .outbound
        .send(SignalingEvent::JoinRoom {
            meeting_id: meeting(),
            role: ParticipantRole::Patient,
        })
        .await
        .unwrap();
    assert!(matches!(
        recv(&mut patient.inbound).await,
        SignalingEvent::JoinedRoom { success: true, .. }
    ));
    assert_eq!(recv(&mut doctor.inbound).await, SignalingEvent::StartCall {});

    let offer = NegotiationMessage::Offer {
        sdp: "v=0 offer".to_string(),
    }
    .into_event(meeting());
    doctor.outbound.send(offer.clone()).await.unwrap();
    assert_eq!(recv(&mut patient.inbound).await, offer);

    drop(patient);
    assert_eq!(
        recv(&mut doctor.inbound).await,
        SignalingEvent::PeerLeft {
            meeting_id: meeting()
        }
    );
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WebSocketConnector
        .connect(&format!("ws://{addr}{SIGNALING_PATH}"), &token())
        .await;
    assert!(matches!(result, Err(TransportError::Connect(_))));
}

#[tokio::test]
async fn test_invalid_endpoint() {
    let result = WebSocketConnector.connect("not a url", &token()).await;
    assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
}

#[tokio::test]
async fn test_consultation_over_websocket() {
    let server = TestCoordinator::start().await;
    let connector: Arc<dyn SignalingConnector> = Arc::new(WebSocketConnector);

    let doctor = TestParticipant::with_platform(
        "abc123",
        ParticipantRole::Clinician,
        FakeMediaDevices::granting(),
        Arc::new(FakePeerConnectionFactory::default()),
        Arc::clone(&connector),
        server.config(),
    );
    let patient = TestParticipant::with_platform(
        "abc123",
        ParticipantRole::Patient,
        FakeMediaDevices::granting(),
        Arc::new(FakePeerConnectionFactory::default()),
        Arc::clone(&connector),
        server.config(),
    );

    doctor.handle.start().await.unwrap();
    patient.handle.start().await.unwrap();
    doctor
        .wait_for_state(|s| *s == SessionState::Connected)
        .await;
    patient
        .wait_for_state(|s| *s == SessionState::Connected)
        .await;
    assert_eq!(doctor.peers.total_offers(), 1);

    doctor.handle.end_call().await;
    patient.handle.end_call().await;
    assert_eq!(doctor.handle.state(), SessionState::Ended);
    assert_eq!(patient.handle.state(), SessionState::Ended);
}
