//! Configs, session parameters and wait helpers.

use common::secret::SecretString;
use common::types::ParticipantRole;
use session_client::config::{ClientConfig, IceServer, ReconnectPolicy};
use session_client::signaling::SignalingConnector;
use session_client::{
    SessionControllerHandle, SessionParams, SessionPlatform, SessionSnapshot, SessionState,
};
use std::sync::Arc;
use std::time::Duration;

use crate::mock_media::FakeMediaDevices;
use crate::mock_peer::FakePeerConnectionFactory;

/// Endpoint used by every test config. Fake connectors ignore it.
pub const TEST_SIGNALING_URL: &str = "ws://rc.test/signaling";

/// Auth token presented by [`session_params`].
pub const TEST_AUTH_TOKEN: &str = "test-auth-token";

/// How long the wait helpers wait before failing a test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client config with short reconnect delays.
#[must_use]
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(TEST_SIGNALING_URL);
    config.ice_servers = vec![IceServer::new("stun:stun.test:3478")];
    config.reconnect = ReconnectPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(400),
    };
    config
}

#[must_use]
pub fn session_params(meeting_id: &str, role: ParticipantRole) -> SessionParams {
    SessionParams {
        meeting_id: meeting_id.to_string(),
        role,
        auth_token: SecretString::from(TEST_AUTH_TOKEN),
    }
}

/// One side of a consultation, driven entirely by fakes.
pub struct TestParticipant {
    pub handle: SessionControllerHandle,
    pub media: Arc<FakeMediaDevices>,
    pub peers: Arc<FakePeerConnectionFactory>,
}

impl TestParticipant {
    /// Participant with granting devices and auto-connecting peers.
    #[must_use]
    pub fn new(
        meeting_id: &str,
        role: ParticipantRole,
        signaling: Arc<dyn SignalingConnector>,
    ) -> Self {
        Self::with_platform(
            meeting_id,
            role,
            FakeMediaDevices::granting(),
            Arc::new(FakePeerConnectionFactory::default()),
            signaling,
            test_config(),
        )
    }

    #[must_use]
    pub fn with_platform(
        meeting_id: &str,
        role: ParticipantRole,
        media: Arc<FakeMediaDevices>,
        peers: Arc<FakePeerConnectionFactory>,
        signaling: Arc<dyn SignalingConnector>,
        config: ClientConfig,
    ) -> Self {
        let platform = SessionPlatform {
            media: Arc::clone(&media) as _,
            peers: Arc::clone(&peers) as _,
            signaling,
        };
        let handle = SessionControllerHandle::new(session_params(meeting_id, role), platform, config);
        Self {
            handle,
            media,
            peers,
        }
    }

    /// Wait until the session state satisfies `pred`. Panics on timeout.
    pub async fn wait_for_state(&self, pred: impl Fn(&SessionState) -> bool) -> SessionState {
        self.wait_for(|s| pred(&s.state)).await.state
    }

    /// Wait until the snapshot satisfies `pred`. Panics on timeout.
    pub async fn wait_for(&self, pred: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let mut snapshots = self.handle.subscribe();
        let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
            snapshots.wait_for(|s| pred(s)).await.map(|s| s.clone())
        })
        .await;

        match waited {
            Ok(Ok(snapshot)) => snapshot,
            // Controller stopped: its last snapshot is final.
            Ok(Err(_)) => {
                let snapshot = self.handle.snapshot();
                assert!(
                    pred(&snapshot),
                    "controller stopped in {} ({})",
                    snapshot.state,
                    snapshot.status_message
                );
                snapshot
            }
            Err(_) => panic!(
                "timed out waiting; state is {} ({})",
                self.handle.state(),
                self.handle.status_message()
            ),
        }
    }
}

/// Poll `condition` until it holds. Panics on timeout.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met in time");
}
