//! Signaling connectors for tests.
//!
//! - [`ScriptedConnector`] hands the coordinator side of every link to the
//!   test as a [`ServerEnd`], so the test plays the coordinator.
//! - [`InMemoryRoomConnector`] wires every link to the real room actors of
//!   an in-process `RoomCoordinatorActorHandle`, with no sockets involved.
//!
//! Both can be told to refuse connections to exercise reconnection.

use async_trait::async_trait;
use common::protocol::SignalingEvent;
use common::secret::{ExposeSecret, SecretString};
use common::types::MeetingId;
use room_coordinator::actors::RoomCoordinatorActorHandle;
use room_coordinator::connection::ClientConnection;
use session_client::signaling::transport::LINK_BUFFER;
use session_client::signaling::{SignalingConnector, SignalingLink, TransportError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long [`ServerEnd`] and [`ScriptedConnector`] wait before failing a test.
pub const SCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinator side of one scripted link.
#[derive(Debug)]
pub struct ServerEnd {
    from_client: mpsc::Receiver<SignalingEvent>,
    to_client: mpsc::Sender<SignalingEvent>,
}

impl ServerEnd {
    /// Next event from the client. Panics on timeout or if the client closed
    /// the link.
    pub async fn recv(&mut self) -> SignalingEvent {
        tokio::time::timeout(SCRIPT_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for client event")
            .expect("client closed the link")
    }

    /// Next event within `within`, if any.
    pub async fn recv_within(&mut self, within: Duration) -> Option<SignalingEvent> {
        tokio::time::timeout(within, self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn send(&self, event: SignalingEvent) {
        self.to_client
            .send(event)
            .await
            .expect("client dropped the link");
    }

    /// Wait until the client drops the link. Panics on timeout.
    pub async fn closed(&mut self) {
        let deadline = tokio::time::Instant::now() + SCRIPT_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.from_client.recv()).await {
                Ok(None) => return,
                Ok(Some(_)) => {}
                Err(_) => panic!("client did not close the link"),
            }
        }
    }

    /// Simulate the transport dropping.
    pub fn drop_transport(self) {}
}

#[derive(Debug, Default)]
struct ScriptState {
    fail_remaining: u32,
    offline: bool,
    attempts: u32,
    tokens: Vec<String>,
}

/// Connector whose links are played by the test.
#[derive(Debug)]
pub struct ScriptedConnector {
    state: Mutex<ScriptState>,
    accepted_tx: mpsc::UnboundedSender<ServerEnd>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEnd>>,
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnector {
    #[must_use]
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(ScriptState::default()),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().unwrap().fail_remaining = count;
    }

    /// Refuse every attempt while `offline`.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Connection attempts so far, successful or not.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.state.lock().unwrap().attempts
    }

    /// Auth tokens presented, in attempt order.
    #[must_use]
    pub fn presented_tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens.clone()
    }

    /// Wait for the next accepted link. Panics on timeout.
    pub async fn next_connection(&self) -> ServerEnd {
        let mut accepted = self.accepted_rx.lock().await;
        tokio::time::timeout(SCRIPT_TIMEOUT, accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }
}

#[async_trait]
impl SignalingConnector for ScriptedConnector {
    async fn connect(
        &self,
        _endpoint: &str,
        auth_token: &SecretString,
    ) -> Result<SignalingLink, TransportError> {
        {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            state.tokens.push(auth_token.expose_secret().to_string());
            if state.offline {
                return Err(TransportError::Connect("coordinator offline".to_string()));
            }
            if state.fail_remaining > 0 {
                state.fail_remaining -= 1;
                return Err(TransportError::Connect("scripted failure".to_string()));
            }
        }

        let (client_tx, from_client) = mpsc::channel(LINK_BUFFER);
        let (to_client, client_rx) = mpsc::channel(LINK_BUFFER);
        let _ = self.accepted_tx.send(ServerEnd {
            from_client,
            to_client,
        });

        Ok(SignalingLink {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}

/// Connector backed by real in-process room actors.
pub struct InMemoryRoomConnector {
    coordinator: RoomCoordinatorActorHandle,
    offline: AtomicBool,
    connects: AtomicU32,
    client_disconnects: Arc<AtomicU32>,
    links: Mutex<Vec<CancellationToken>>,
}

impl Default for InMemoryRoomConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRoomConnector {
    /// Connector with its own coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_coordinator(RoomCoordinatorActorHandle::new(
            "rc-in-memory".to_string(),
            100,
        ))
    }

    #[must_use]
    pub fn with_coordinator(coordinator: RoomCoordinatorActorHandle) -> Self {
        Self {
            coordinator,
            offline: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            client_disconnects: Arc::new(AtomicU32::new(0)),
            links: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &RoomCoordinatorActorHandle {
        &self.coordinator
    }

    /// Successful connects so far.
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Links closed by the client side.
    #[must_use]
    pub fn client_disconnects(&self) -> u32 {
        self.client_disconnects.load(Ordering::SeqCst)
    }

    /// Refuse new connections while `offline`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop every open link from the coordinator side.
    pub fn drop_all_links(&self) {
        for token in self.links.lock().unwrap().drain(..) {
            token.cancel();
        }
    }

    /// Rooms currently open on the coordinator.
    pub async fn room_count(&self) -> usize {
        self.coordinator.get_status().await.unwrap().room_count
    }
}

impl Drop for InMemoryRoomConnector {
    fn drop(&mut self) {
        self.coordinator.cancel();
    }
}

#[async_trait]
impl SignalingConnector for InMemoryRoomConnector {
    async fn connect(
        &self,
        _endpoint: &str,
        _auth_token: &SecretString,
    ) -> Result<SignalingLink, TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("coordinator offline".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (client_tx, mut from_client) = mpsc::channel(LINK_BUFFER);
        let (to_client, client_rx) = mpsc::channel(LINK_BUFFER);
        let token = CancellationToken::new();
        self.links.lock().unwrap().push(token.clone());

        let mut connection = ClientConnection::new(self.coordinator.clone(), to_client);
        let client_disconnects = Arc::clone(&self.client_disconnects);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    event = from_client.recv() => match event {
                        Some(event) => connection.handle_event(event).await,
                        None => {
                            client_disconnects.fetch_add(1, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            }
            connection.leave().await;
        });

        Ok(SignalingLink {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}

/// Successful `joined-room` acknowledgement for `meeting_id`.
#[must_use]
pub fn joined_room(meeting_id: &str) -> SignalingEvent {
    SignalingEvent::JoinedRoom {
        success: true,
        meeting_id: MeetingId::parse(meeting_id).unwrap(),
        reason: None,
    }
}
