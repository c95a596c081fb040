//! `RoomActor` - one per active meeting.
//!
//! A room has exactly two slots, one per [`ParticipantRole`]. It:
//!
//! - Answers every join with `joined-room` on the joiner's own queue
//! - Sends `start-call` to the clinician once both slots are filled
//! - Relays `offer`, `answer` and `ice-candidate` to the other slot, in the
//!   order they were received, and only when they name this room's meeting
//! - Sends `peer-left` to the remaining participant when one leaves
//! - Tells the coordinator when it becomes empty
//!
//! Outbound queues are written with `try_send`. A slow or dead client never
//! stalls the room; its messages are dropped and counted.

use crate::errors::RcError;
use crate::observability::metrics;

use super::messages::{CoordinatorMessage, ParticipantConnection, RoomMessage, RoomState};

use common::protocol::SignalingEvent;
use common::types::{MeetingId, ParticipantRole};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    meeting_id: MeetingId,
}

impl RoomActorHandle {
    #[must_use]
    pub fn meeting_id(&self) -> &MeetingId {
        &self.meeting_id
    }

    /// Claim `role` for `connection`.
    ///
    /// On success the room has already queued `joined-room` (and
    /// `start-call` where due) on the connection's outbound queue.
    pub async fn join(
        &self,
        role: ParticipantRole,
        connection: ParticipantConnection,
    ) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                role,
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Forward a negotiation event from `connection_id` to the other slot.
    pub async fn relay(&self, connection_id: String, event: SignalingEvent) -> Result<(), RcError> {
        self.sender
            .send(RoomMessage::Relay {
                connection_id,
                event,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Release whatever slot `connection_id` holds.
    pub async fn leave(&self, connection_id: String) -> Result<(), RcError> {
        self.sender
            .send(RoomMessage::Leave { connection_id })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn get_state(&self) -> Result<RoomState, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    meeting_id: MeetingId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    coordinator: mpsc::Sender<CoordinatorMessage>,
    clinician: Option<ParticipantConnection>,
    patient: Option<ParticipantConnection>,
    messages_relayed: u64,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// `cancel_token` is a child of the coordinator's token. `coordinator` is
    /// used only to report that the room became empty.
    pub fn spawn(
        meeting_id: MeetingId,
        cancel_token: CancellationToken,
        coordinator: mpsc::Sender<CoordinatorMessage>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            meeting_id: meeting_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            coordinator,
            clinician: None,
            patient: None,
            messages_relayed: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            meeting_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rc.actor.room", fields(meeting_id = %self.meeting_id))]
    async fn run(mut self) {
        debug!(target: "rc.actor.room", "RoomActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "rc.actor.room", "RoomActor received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            debug!(target: "rc.actor.room", "RoomActor channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.room",
            participants = self.state().participant_count(),
            messages_relayed = self.messages_relayed,
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                role,
                connection,
                respond_to,
            } => {
                let result = self.handle_join(role, connection);
                let _ = respond_to.send(result);
            }
            RoomMessage::Relay {
                connection_id,
                event,
            } => self.handle_relay(&connection_id, event),
            RoomMessage::Leave { connection_id } => self.handle_leave(&connection_id),
            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }
        }
    }

    fn handle_join(
        &mut self,
        role: ParticipantRole,
        connection: ParticipantConnection,
    ) -> Result<(), RcError> {
        let connection_id = connection.connection_id.clone();

        // Same connection re-announcing its role: acknowledge again, nothing else.
        if self
            .slot(role)
            .as_ref()
            .is_some_and(|held| held.connection_id == connection_id)
        {
            debug!(target: "rc.actor.room", role = %role, "Repeated join on same connection");
            self.send_to(role, self.joined_ack());
            return Ok(());
        }

        // A connection holds at most one slot.
        if self
            .slot(role.counterpart())
            .as_ref()
            .is_some_and(|held| held.connection_id == connection_id)
        {
            return Err(RcError::RoleTaken(role.counterpart()));
        }

        match self.slot(role) {
            Some(held) if !held.is_stale() => {
                warn!(
                    target: "rc.actor.room",
                    role = %role,
                    "Join rejected, role already held by a live connection"
                );
                return Err(RcError::RoleTaken(role));
            }
            Some(_) => {
                info!(
                    target: "rc.actor.room",
                    role = %role,
                    "Replacing stale connection for role"
                );
            }
            None => {}
        }

        *self.slot_mut(role) = Some(connection);
        info!(
            target: "rc.actor.room",
            role = %role,
            participants = self.state().participant_count(),
            "Participant joined room"
        );

        self.send_to(role, self.joined_ack());
        if self.clinician.is_some() && self.patient.is_some() {
            debug!(target: "rc.actor.room", "Room paired, signalling clinician to start call");
            self.send_to(ParticipantRole::Clinician, SignalingEvent::StartCall {});
        }

        Ok(())
    }

    fn handle_relay(&mut self, connection_id: &str, event: SignalingEvent) {
        let Some(sender_role) = self.role_of(connection_id) else {
            debug!(target: "rc.actor.room", event = event.name(), "Relay from non-member dropped");
            metrics::record_dropped(metrics::DROP_NOT_JOINED);
            return;
        };

        if event.meeting_id() != Some(&self.meeting_id) {
            warn!(
                target: "rc.actor.room",
                event = event.name(),
                role = %sender_role,
                "Event scoped to another meeting dropped"
            );
            metrics::record_dropped(metrics::DROP_MEETING_MISMATCH);
            return;
        }

        let target = sender_role.counterpart();
        if self.slot(target).is_none() {
            debug!(
                target: "rc.actor.room",
                event = event.name(),
                role = %sender_role,
                "No peer to relay to, dropped"
            );
            metrics::record_dropped(metrics::DROP_NO_PEER);
            return;
        }

        let name = event.name();
        if self.send_to(target, event) {
            self.messages_relayed += 1;
            metrics::record_relayed(name);
        }
    }

    fn handle_leave(&mut self, connection_id: &str) {
        let Some(role) = self.role_of(connection_id) else {
            return;
        };

        *self.slot_mut(role) = None;
        info!(target: "rc.actor.room", role = %role, "Participant left room");

        let remaining = role.counterpart();
        if self.slot(remaining).is_some() {
            self.send_to(
                remaining,
                SignalingEvent::PeerLeft {
                    meeting_id: self.meeting_id.clone(),
                },
            );
        }

        if self.state().is_empty() {
            if let Err(e) = self.coordinator.try_send(CoordinatorMessage::RoomEmpty {
                meeting_id: self.meeting_id.clone(),
            }) {
                warn!(
                    target: "rc.actor.room",
                    error = %e,
                    "Failed to report empty room to coordinator"
                );
            }
        }
    }

    /// Queue `event` for the connection in `role`'s slot. Returns whether it
    /// was queued.
    fn send_to(&self, role: ParticipantRole, event: SignalingEvent) -> bool {
        let Some(connection) = self.slot(role) else {
            return false;
        };

        match connection.outbound.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "rc.actor.room",
                    role = %role,
                    error = %e,
                    "Outbound queue unavailable, event dropped"
                );
                metrics::record_dropped(metrics::DROP_BACKPRESSURE);
                false
            }
        }
    }

    fn joined_ack(&self) -> SignalingEvent {
        SignalingEvent::JoinedRoom {
            success: true,
            meeting_id: self.meeting_id.clone(),
            reason: None,
        }
    }

    fn role_of(&self, connection_id: &str) -> Option<ParticipantRole> {
        [ParticipantRole::Clinician, ParticipantRole::Patient]
            .into_iter()
            .find(|role| {
                self.slot(*role)
                    .as_ref()
                    .is_some_and(|held| held.connection_id == connection_id)
            })
    }

    fn slot(&self, role: ParticipantRole) -> &Option<ParticipantConnection> {
        match role {
            ParticipantRole::Clinician => &self.clinician,
            ParticipantRole::Patient => &self.patient,
        }
    }

    fn slot_mut(&mut self, role: ParticipantRole) -> &mut Option<ParticipantConnection> {
        match role {
            ParticipantRole::Clinician => &mut self.clinician,
            ParticipantRole::Patient => &mut self.patient,
        }
    }

    fn state(&self) -> RoomState {
        RoomState {
            meeting_id: self.meeting_id.clone(),
            clinician: self.clinician.as_ref().map(|c| c.connection_id.clone()),
            patient: self.patient.as_ref().map(|c| c.connection_id.clone()),
        }
    }
}
