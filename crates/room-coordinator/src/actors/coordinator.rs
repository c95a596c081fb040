//! `RoomCoordinatorActor` - singleton supervisor for room actors.
//!
//! - Singleton per coordinator instance
//! - Creates a `RoomActor` lazily on the first join for a meeting
//! - Removes rooms once their last participant has left
//! - Enforces the room limit
//! - Owns the root `CancellationToken` for graceful shutdown
//!
//! Joins are processed one at a time and each is awaited to completion
//! before the next message is read. A room reported empty is re-checked
//! before removal, so a join that raced the report keeps its room.
//!
//! # Graceful Shutdown
//!
//! On SIGTERM the coordinator stops accepting joins, cancels every room and
//! waits (bounded by a deadline) for the room tasks to finish.

use crate::errors::RcError;
use crate::observability::metrics;

use super::messages::{CoordinatorMessage, CoordinatorStatus, ParticipantConnection};
use super::room::{RoomActor, RoomActorHandle};

use common::types::{MeetingId, ParticipantRole};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 1000;

/// Time allowed for rooms to stop when the root token is cancelled.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Handle to the `RoomCoordinatorActor`.
#[derive(Clone)]
pub struct RoomCoordinatorActorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl RoomCoordinatorActorHandle {
    /// Spawn the coordinator actor and return a handle to it.
    ///
    /// # Arguments
    ///
    /// * `instance_id` - Coordinator instance ID (logs only)
    /// * `max_rooms` - Maximum concurrently open rooms
    #[must_use]
    pub fn new(instance_id: String, max_rooms: usize) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomCoordinatorActor {
            instance_id,
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            max_rooms,
            accepting_new: true,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Place `connection` in the room for `meeting_id` under `role`.
    ///
    /// Returns the room handle on success. The room has already queued the
    /// `joined-room` acknowledgement on the connection's outbound queue.
    pub async fn join(
        &self,
        meeting_id: MeetingId,
        role: ParticipantRole,
        connection: ParticipantConnection,
    ) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Join {
                meeting_id,
                role,
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_status(&self) -> Result<CoordinatorStatus, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting joins and wait for all rooms to stop.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for per-connection tasks that must stop with the
    /// coordinator.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `RoomCoordinatorActor` implementation.
pub struct RoomCoordinatorActor {
    instance_id: String,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Given to rooms so they can report emptiness. Weak so that dropping
    /// every handle still closes the mailbox.
    self_sender: mpsc::WeakSender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<MeetingId, ManagedRoom>,
    max_rooms: usize,
    accepting_new: bool,
}

impl RoomCoordinatorActor {
    #[instrument(skip_all, name = "rc.actor.coordinator", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.coordinator",
            max_rooms = self.max_rooms,
            "RoomCoordinatorActor started"
        );

        loop {
            self.check_room_health();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.coordinator",
                        "RoomCoordinatorActor received cancellation signal"
                    );
                    self.drain_rooms(DEFAULT_SHUTDOWN_DEADLINE).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "rc.actor.coordinator",
                                "RoomCoordinatorActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.coordinator",
            rooms_remaining = self.rooms.len(),
            "RoomCoordinatorActor stopped"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Join {
                meeting_id,
                role,
                connection,
                respond_to,
            } => {
                let result = self.join(meeting_id, role, connection).await;
                metrics::record_join(if result.is_ok() {
                    metrics::OUTCOME_ACCEPTED
                } else {
                    metrics::OUTCOME_REJECTED
                });
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::RoomEmpty { meeting_id } => {
                self.remove_if_empty(&meeting_id).await;
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(CoordinatorStatus {
                    instance_id: self.instance_id.clone(),
                    room_count: self.rooms.len(),
                    is_draining: !self.accepting_new,
                });
            }

            CoordinatorMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.drain_rooms(deadline).await;
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    async fn join(
        &mut self,
        meeting_id: MeetingId,
        role: ParticipantRole,
        connection: ParticipantConnection,
    ) -> Result<RoomActorHandle, RcError> {
        if !self.accepting_new {
            return Err(RcError::Draining);
        }

        let handle = match self.rooms.get(&meeting_id) {
            Some(managed) => managed.handle.clone(),
            None => self.create_room(meeting_id.clone())?,
        };

        match handle.join(role, connection).await {
            Ok(()) => Ok(handle),
            Err(e) => {
                // A freshly created room that never admitted anyone must not linger.
                self.remove_if_empty(&meeting_id).await;
                Err(e)
            }
        }
    }

    fn create_room(&mut self, meeting_id: MeetingId) -> Result<RoomActorHandle, RcError> {
        if self.rooms.len() >= self.max_rooms {
            warn!(
                target: "rc.actor.coordinator",
                rooms = self.rooms.len(),
                "Room limit reached, rejecting join"
            );
            return Err(RcError::CapacityExceeded);
        }

        let coordinator = self
            .self_sender
            .upgrade()
            .ok_or_else(|| RcError::Internal("coordinator mailbox closed".to_string()))?;

        let (handle, task_handle) =
            RoomActor::spawn(meeting_id.clone(), self.cancel_token.child_token(), coordinator);

        self.rooms.insert(
            meeting_id,
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );
        metrics::set_rooms_active(self.rooms.len());

        debug!(
            target: "rc.actor.coordinator",
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(handle)
    }

    async fn remove_if_empty(&mut self, meeting_id: &MeetingId) {
        let Some(managed) = self.rooms.get(meeting_id) else {
            return;
        };

        match managed.handle.get_state().await {
            Ok(state) if !state.is_empty() => {
                debug!(
                    target: "rc.actor.coordinator",
                    participants = state.participant_count(),
                    "Room repopulated before removal, keeping it"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    target: "rc.actor.coordinator",
                    error = %e,
                    "Room unreachable, removing it"
                );
            }
        }

        if let Some(managed) = self.rooms.remove(meeting_id) {
            managed.handle.cancel();
            metrics::set_rooms_active(self.rooms.len());
            debug!(
                target: "rc.actor.coordinator",
                total_rooms = self.rooms.len(),
                "Room removed"
            );

            tokio::spawn(async move {
                if tokio::time::timeout(Duration::from_secs(5), managed.task_handle)
                    .await
                    .is_err()
                {
                    warn!(
                        target: "rc.actor.coordinator",
                        "Room task did not stop within 5s"
                    );
                }
            });
        }
    }

    /// Drop rooms whose task ended without being removed.
    fn check_room_health(&mut self) {
        let finished: Vec<MeetingId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(meeting_id, _)| meeting_id.clone())
            .collect();

        if finished.is_empty() {
            return;
        }

        for meeting_id in finished {
            if self.rooms.remove(&meeting_id).is_some() {
                error!(
                    target: "rc.actor.coordinator",
                    "Room task ended unexpectedly, room dropped"
                );
            }
        }
        metrics::set_rooms_active(self.rooms.len());
    }

    async fn drain_rooms(&mut self, deadline: Duration) {
        if !self.accepting_new && self.rooms.is_empty() {
            return;
        }

        self.accepting_new = false;
        info!(
            target: "rc.actor.coordinator",
            rooms = self.rooms.len(),
            deadline_secs = deadline.as_secs(),
            "Draining rooms"
        );

        let rooms: Vec<ManagedRoom> = self.rooms.drain().map(|(_, managed)| managed).collect();
        for managed in &rooms {
            managed.handle.cancel();
        }

        let wait_all = futures::future::join_all(rooms.into_iter().map(|m| m.task_handle));
        if tokio::time::timeout(deadline, wait_all).await.is_err() {
            warn!(
                target: "rc.actor.coordinator",
                "Rooms did not stop before shutdown deadline"
            );
        }

        metrics::set_rooms_active(0);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::protocol::SignalingEvent;

    fn meeting(id: &str) -> MeetingId {
        MeetingId::parse(id).unwrap()
    }

    fn connection(id: &str) -> (ParticipantConnection, mpsc::Receiver<SignalingEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (ParticipantConnection::new(id, tx), rx)
    }

    #[tokio::test]
    async fn test_rooms_created_lazily_per_meeting() {
        let coordinator = RoomCoordinatorActorHandle::new("rc-test".to_string(), 10);
        assert_eq!(coordinator.get_status().await.unwrap().room_count, 0);

        let (c1, _rx1) = connection("conn-1");
        let (c2, _rx2) = connection("conn-2");
        let (c3, _rx3) = connection("conn-3");

        let room_a = coordinator
            .join(meeting("abc123"), ParticipantRole::Clinician, c1)
            .await
            .unwrap();
        let room_a_again = coordinator
            .join(meeting("abc123"), ParticipantRole::Patient, c2)
            .await
            .unwrap();
        let room_b = coordinator
            .join(meeting("xyz789"), ParticipantRole::Patient, c3)
            .await
            .unwrap();

        assert_eq!(room_a.meeting_id(), room_a_again.meeting_id());
        assert_eq!(room_b.meeting_id(), &meeting("xyz789"));
        assert_eq!(coordinator.get_status().await.unwrap().room_count, 2);

        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_room_removed_after_last_leave() {
        let coordinator = RoomCoordinatorActorHandle::new("rc-test".to_string(), 10);
        let (c1, _rx1) = connection("conn-1");

        let room = coordinator
            .join(meeting("abc123"), ParticipantRole::Patient, c1)
            .await
            .unwrap();
        room.leave("conn-1".to_string()).await.unwrap();

        // RoomEmpty is processed asynchronously; poll until it lands.
        let mut removed = false;
        for _ in 0..50 {
            if coordinator.get_status().await.unwrap().room_count == 0 {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(removed, "Empty room should be removed");

        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_capacity_limit_rejects_new_rooms() {
        let coordinator = RoomCoordinatorActorHandle::new("rc-test".to_string(), 1);
        let (c1, _rx1) = connection("conn-1");
        let (c2, _rx2) = connection("conn-2");
        let (c3, _rx3) = connection("conn-3");

        coordinator
            .join(meeting("abc123"), ParticipantRole::Patient, c1)
            .await
            .unwrap();

        let result = coordinator
            .join(meeting("xyz789"), ParticipantRole::Patient, c2)
            .await;
        assert!(matches!(result, Err(RcError::CapacityExceeded)));

        // Existing rooms still admit their second participant.
        coordinator
            .join(meeting("abc123"), ParticipantRole::Clinician, c3)
            .await
            .unwrap();

        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_rejected_join_keeps_occupied_room() {
        let coordinator = RoomCoordinatorActorHandle::new("rc-test".to_string(), 10);
        let (c1, _rx1) = connection("conn-1");
        let (c2, _rx2) = connection("conn-2");

        coordinator
            .join(meeting("abc123"), ParticipantRole::Patient, c1)
            .await
            .unwrap();
        let result = coordinator
            .join(meeting("abc123"), ParticipantRole::Patient, c2)
            .await;

        assert!(matches!(result, Err(RcError::RoleTaken(_))));
        assert_eq!(coordinator.get_status().await.unwrap().room_count, 1);

        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects_joins() {
        let coordinator = RoomCoordinatorActorHandle::new("rc-test".to_string(), 10);
        let (c1, _rx1) = connection("conn-1");
        let (c2, _rx2) = connection("conn-2");

        let room = coordinator
            .join(meeting("abc123"), ParticipantRole::Patient, c1)
            .await
            .unwrap();

        coordinator.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(room.is_cancelled());

        let status = coordinator.get_status().await.unwrap();
        assert!(status.is_draining);
        assert_eq!(status.room_count, 0);

        let result = coordinator
            .join(meeting("xyz789"), ParticipantRole::Patient, c2)
            .await;
        assert!(matches!(result, Err(RcError::Draining)));

        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_coordinator() {
        let coordinator = RoomCoordinatorActorHandle::new("rc-test".to_string(), 10);
        let child = coordinator.child_token();

        coordinator.cancel();
        assert!(coordinator.is_cancelled());
        assert!(child.is_cancelled());
    }
}
