//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use crate::errors::RcError;

use super::room::RoomActorHandle;

use common::protocol::SignalingEvent;
use common::types::{MeetingId, ParticipantRole};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Messages sent to `RoomCoordinatorActor`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Place a connection into the room for `meeting_id`, creating the room
    /// if it does not exist yet.
    Join {
        meeting_id: MeetingId,
        role: ParticipantRole,
        connection: ParticipantConnection,
        /// Response channel for the room handle or a rejection.
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// A room reported that its last participant left.
    RoomEmpty { meeting_id: MeetingId },

    /// Current coordinator status (health checks, tests).
    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },

    /// Stop accepting joins and drain all rooms.
    Shutdown {
        /// Deadline for rooms to stop.
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Claim a role slot in the room.
    Join {
        role: ParticipantRole,
        connection: ParticipantConnection,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Forward a negotiation event to the other participant.
    Relay {
        connection_id: String,
        event: SignalingEvent,
    },

    /// The connection closed or left.
    Leave { connection_id: String },

    /// Current room occupancy.
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// A client connection as seen by a room: an identifier and the queue its
/// WebSocket writer drains.
#[derive(Debug, Clone)]
pub struct ParticipantConnection {
    pub connection_id: String,
    pub outbound: mpsc::Sender<SignalingEvent>,
}

impl ParticipantConnection {
    #[must_use]
    pub fn new(connection_id: impl Into<String>, outbound: mpsc::Sender<SignalingEvent>) -> Self {
        Self {
            connection_id: connection_id.into(),
            outbound,
        }
    }

    /// Whether the writer side of this connection is gone.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Occupancy of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub meeting_id: MeetingId,
    /// Connection holding the clinician slot.
    pub clinician: Option<String>,
    /// Connection holding the patient slot.
    pub patient: Option<String>,
}

impl RoomState {
    #[must_use]
    pub fn participant_count(&self) -> usize {
        usize::from(self.clinician.is_some()) + usize::from(self.patient.is_some())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participant_count() == 0
    }

    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.participant_count() == 2
    }
}

/// Status of the `RoomCoordinatorActor`.
#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub instance_id: String,
    pub room_count: usize,
    pub is_draining: bool,
}
