//! Transport-independent half of a client connection.
//!
//! A `ClientConnection` turns decoded [`SignalingEvent`]s into coordinator and
//! room calls: `join-room` goes to the coordinator, relayed events go to the
//! joined room, and leaving releases the role slot. The WebSocket endpoint
//! drives one per socket; in-process transports can drive one directly.

use crate::actors::{ParticipantConnection, RoomActorHandle, RoomCoordinatorActorHandle};
use crate::observability::metrics;

use common::protocol::SignalingEvent;
use common::types::{MeetingId, ParticipantRole};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct Membership {
    room: RoomActorHandle,
    role: ParticipantRole,
}

/// One client's view of the coordinator.
pub struct ClientConnection {
    connection_id: String,
    coordinator: RoomCoordinatorActorHandle,
    outbound: mpsc::Sender<SignalingEvent>,
    membership: Option<Membership>,
}

impl ClientConnection {
    /// Create a connection whose coordinator-originated events are queued on
    /// `outbound`.
    #[must_use]
    pub fn new(coordinator: RoomCoordinatorActorHandle, outbound: mpsc::Sender<SignalingEvent>) -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            coordinator,
            outbound,
            membership: None,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Meeting the connection currently belongs to.
    #[must_use]
    pub fn meeting_id(&self) -> Option<&MeetingId> {
        self.membership.as_ref().map(|m| m.room.meeting_id())
    }

    /// Handle one event received from the client.
    pub async fn handle_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::JoinRoom { meeting_id, role } => self.join(meeting_id, role).await,
            event if event.is_relayed() => self.relay(event).await,
            other => {
                warn!(
                    target: "rc.ws",
                    event = other.name(),
                    "Server-only event from client dropped"
                );
                metrics::record_dropped(metrics::DROP_MALFORMED);
            }
        }
    }

    async fn join(&mut self, meeting_id: MeetingId, role: ParticipantRole) {
        let same_slot = self
            .membership
            .as_ref()
            .is_some_and(|m| m.room.meeting_id() == &meeting_id && m.role == role);
        if !same_slot {
            self.leave().await;
        }

        let connection =
            ParticipantConnection::new(self.connection_id.clone(), self.outbound.clone());
        match self
            .coordinator
            .join(meeting_id.clone(), role, connection)
            .await
        {
            Ok(room) => {
                info!(target: "rc.ws", meeting_id = %meeting_id, role = %role, "Joined room");
                self.membership = Some(Membership { room, role });
            }
            Err(e) => {
                info!(
                    target: "rc.ws",
                    meeting_id = %meeting_id,
                    role = %role,
                    error = %e,
                    error_code = e.error_code(),
                    "Join rejected"
                );
                let reply = SignalingEvent::JoinedRoom {
                    success: false,
                    meeting_id,
                    reason: Some(e.client_message()),
                };
                if self.outbound.try_send(reply).is_err() {
                    metrics::record_dropped(metrics::DROP_BACKPRESSURE);
                }
            }
        }
    }

    async fn relay(&mut self, event: SignalingEvent) {
        let Some(membership) = &self.membership else {
            debug!(target: "rc.ws", event = event.name(), "Event before join dropped");
            metrics::record_dropped(metrics::DROP_NOT_JOINED);
            return;
        };

        if let Err(e) = membership.room.relay(self.connection_id.clone(), event).await {
            warn!(target: "rc.ws", error = %e, "Room unavailable, relay failed");
            self.membership = None;
        }
    }

    /// Release the role slot, if any. The other participant gets `peer-left`.
    pub async fn leave(&mut self) {
        if let Some(membership) = self.membership.take() {
            if let Err(e) = membership.room.leave(self.connection_id.clone()).await {
                debug!(target: "rc.ws", error = %e, "Room already gone on leave");
            }
        }
    }
}
