//! Two Session Controllers meeting through in-process room actors.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::types::ParticipantRole;
use session_client::peer::IceConnectionState;
use session_client::{SessionError, SessionState};
use session_test_utils::{
    test_config, wait_until, FakeMediaDevices, FakePeerConnectionFactory, InMemoryRoomConnector,
    TestParticipant,
};
use std::sync::Arc;
use std::time::Duration;

const MEETING: &str = "abc123";

fn clinician(connector: &Arc<InMemoryRoomConnector>) -> TestParticipant {
    TestParticipant::new(MEETING, ParticipantRole::Clinician, Arc::clone(connector) as _)
}

fn patient(connector: &Arc<InMemoryRoomConnector>) -> TestParticipant {
    TestParticipant::new(MEETING, ParticipantRole::Patient, Arc::clone(connector) as _)
}

async fn wait_connected(participant: &TestParticipant) {
    participant
        .wait_for_state(|s| *s == SessionState::Connected)
        .await;
}

#[tokio::test]
async fn test_clinician_and_patient_connect() {
    let connector = Arc::new(InMemoryRoomConnector::new());
    let doctor = clinician(&connector);
    let patient = patient(&connector);

    doctor.handle.start().await.unwrap();
    doctor
        .wait_for_state(|s| *s == SessionState::WaitingForPeer)
        .await;
    assert_eq!(
        doctor.handle.status_message(),
        "Waiting for the patient to join..."
    );

    patient.handle.start().await.unwrap();
    wait_connected(&doctor).await;
    wait_connected(&patient).await;

    // Exactly one offer, from the clinician.
    assert_eq!(doctor.peers.total_offers(), 1);
    assert_eq!(patient.peers.total_offers(), 0);
    assert_eq!(patient.peers.latest().unwrap().answers_created(), 1);

    // Each side received the other's trickled candidate.
    let doctor_pc = doctor.peers.latest().unwrap();
    let patient_pc = patient.peers.latest().unwrap();
    wait_until(|| {
        !doctor_pc.applied_candidates().is_empty() && !patient_pc.applied_candidates().is_empty()
    })
    .await;
    assert!(doctor_pc.applied_candidates()[0]
        .candidate
        .contains("192.0.2.1"));

    assert_eq!(doctor.handle.snapshot().remote_tracks.len(), 1);
    assert_eq!(patient.handle.snapshot().remote_tracks.len(), 1);
    assert_eq!(connector.room_count().await, 1);
}

#[tokio::test]
async fn test_patient_first_then_clinician() {
    let connector = Arc::new(InMemoryRoomConnector::new());
    let patient = patient(&connector);
    let doctor = clinician(&connector);

    patient.handle.start().await.unwrap();
    patient
        .wait_for_state(|s| *s == SessionState::WaitingForPeer)
        .await;
    assert_eq!(
        patient.handle.status_message(),
        "Waiting for the doctor to join..."
    );

    doctor.handle.start().await.unwrap();
    wait_connected(&doctor).await;
    wait_connected(&patient).await;
    assert_eq!(doctor.peers.total_offers(), 1);
    assert_eq!(patient.peers.total_offers(), 0);
}

#[tokio::test]
async fn test_connected_only_after_remote_track() {
    let connector = Arc::new(InMemoryRoomConnector::new());
    let doctor = TestParticipant::with_platform(
        MEETING,
        ParticipantRole::Clinician,
        FakeMediaDevices::granting(),
        Arc::new(
            FakePeerConnectionFactory::builder()
                .auto_remote_track(false)
                .build(),
        ),
        Arc::clone(&connector) as _,
        test_config(),
    );
    let patient = patient(&connector);

    doctor.handle.start().await.unwrap();
    patient.handle.start().await.unwrap();
    wait_connected(&patient).await;

    // ICE is up on the clinician's side but no media has arrived.
    doctor
        .wait_for_state(|s| *s == SessionState::Negotiating)
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(doctor.handle.state(), SessionState::Negotiating);
    assert!(doctor.handle.snapshot().remote_tracks.is_empty());

    doctor.peers.latest().unwrap().emit_remote_track();
    wait_connected(&doctor).await;
    assert_eq!(doctor.handle.snapshot().remote_tracks.len(), 1);
}

#[tokio::test]
async fn test_second_clinician_rejected() {
    let connector = Arc::new(InMemoryRoomConnector::new());
    let doctor = clinician(&connector);
    doctor.handle.start().await.unwrap();
    doctor
        .wait_for_state(|s| *s == SessionState::WaitingForPeer)
        .await;

    let intruder = clinician(&connector);
    intruder.handle.start().await.unwrap();
    let state = intruder.wait_for_state(SessionState::is_terminal).await;

    assert_eq!(
        state,
        SessionState::Failed(SessionError::RoomRejected(
            "A clinician is already connected to this meeting".to_string()
        ))
    );
    assert!(intruder.media.tracks().iter().all(|t| t.is_stopped()));
    assert_eq!(doctor.handle.state(), SessionState::WaitingForPeer);
}

#[tokio::test]
async fn test_patient_leaves_and_returns() {
    let connector = Arc::new(InMemoryRoomConnector::new());
    let doctor = clinician(&connector);
    let first_visit = patient(&connector);

    doctor.handle.start().await.unwrap();
    first_visit.handle.start().await.unwrap();
    wait_connected(&doctor).await;
    wait_connected(&first_visit).await;

    first_visit.handle.end_call().await;
    assert_eq!(first_visit.handle.state(), SessionState::Ended);

    // `peer-left` alone does not end media; the transport reports the loss.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(doctor.handle.state(), SessionState::Connected);
    doctor
        .peers
        .latest()
        .unwrap()
        .emit_ice_state(IceConnectionState::Disconnected);
    doctor
        .wait_for_state(|s| *s == SessionState::WaitingForPeer)
        .await;

    let second_visit = patient(&connector);
    second_visit.handle.start().await.unwrap();
    wait_connected(&doctor).await;
    wait_connected(&second_visit).await;

    let connections = doctor.peers.connections();
    assert_eq!(connections.len(), 2);
    assert!(connections[0].is_closed());
    assert_eq!(doctor.peers.total_offers(), 2);
}

#[tokio::test]
async fn test_patient_reload_while_connected() {
    let connector = Arc::new(InMemoryRoomConnector::new());
    let doctor = clinician(&connector);
    let before_reload = patient(&connector);

    doctor.handle.start().await.unwrap();
    before_reload.handle.start().await.unwrap();
    wait_connected(&doctor).await;
    wait_connected(&before_reload).await;

    // Page unload: the handle goes away without an explicit end_call.
    let TestParticipant { handle, media, .. } = before_reload;
    drop(handle);
    wait_until(|| media.tracks().iter().all(|t| t.is_stopped())).await;

    let after_reload = patient(&connector);
    after_reload.handle.start().await.unwrap();
    after_reload
        .wait_for_state(|s| *s == SessionState::WaitingForPeer)
        .await;

    // The room paired again while the old media path still looked alive.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(doctor.peers.total_offers(), 1);

    doctor
        .peers
        .latest()
        .unwrap()
        .emit_ice_state(IceConnectionState::Disconnected);
    wait_connected(&after_reload).await;
    wait_connected(&doctor).await;
    assert_eq!(doctor.peers.total_offers(), 2);
}

#[tokio::test]
async fn test_both_rejoin_after_coordinator_drops_links() {
    let connector = Arc::new(InMemoryRoomConnector::new());
    let doctor = clinician(&connector);
    let patient = patient(&connector);

    doctor.handle.start().await.unwrap();
    patient.handle.start().await.unwrap();
    wait_connected(&doctor).await;
    wait_connected(&patient).await;
    assert_eq!(connector.connects(), 2);

    connector.drop_all_links();
    wait_until(|| connector.connects() == 4).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Media never stopped flowing, so neither side renegotiates.
    assert_eq!(doctor.handle.state(), SessionState::Connected);
    assert_eq!(patient.handle.state(), SessionState::Connected);
    assert_eq!(doctor.peers.total_offers(), 1);
    assert_eq!(connector.room_count().await, 1);
}

#[tokio::test]
async fn test_end_call_disconnects_from_coordinator() {
    let connector = Arc::new(InMemoryRoomConnector::new());
    let doctor = clinician(&connector);

    doctor.handle.start().await.unwrap();
    doctor
        .wait_for_state(|s| *s == SessionState::WaitingForPeer)
        .await;

    doctor.handle.end_call().await;
    doctor.handle.end_call().await;

    wait_until(|| connector.client_disconnects() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.client_disconnects(), 1);
    assert_eq!(connector.connects(), 1);
    wait_until_room_count(&connector, 0).await;
}

async fn wait_until_room_count(connector: &InMemoryRoomConnector, expected: usize) {
    for _ in 0..200 {
        if connector.room_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("room count never reached {expected}");
}
