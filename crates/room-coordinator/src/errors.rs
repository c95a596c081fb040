//! Room Coordinator error types.
//!
//! Errors that reach a client are turned into `joined-room{success: false}`
//! frames carrying `client_message()`. Internal details are logged
//! server-side but never sent to clients.

use common::types::ParticipantRole;
use thiserror::Error;

/// Room Coordinator error type.
///
/// Maps to numeric codes used in logs and metrics:
/// - `Unauthorized`: 2
/// - `RoleTaken`, `NotJoined`: 5 (conflict)
/// - `MeetingMismatch`, `InvalidMeeting`: 4
/// - `CapacityExceeded`, `Draining`: 7
/// - `Config`, `Internal`: 6
#[derive(Debug, Error)]
pub enum RcError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upgrade request carried no auth token.
    #[error("Missing auth token")]
    Unauthorized,

    /// The role slot in this room is held by a live connection.
    #[error("Role already taken: {0}")]
    RoleTaken(ParticipantRole),

    /// Event scoped to a different meeting than the sender's room.
    #[error("Meeting mismatch")]
    MeetingMismatch,

    /// Event that requires room membership arrived before `join-room`.
    #[error("Connection has not joined a room")]
    NotJoined,

    /// Meeting identifier missing or malformed.
    #[error("Invalid meeting: {0}")]
    InvalidMeeting(String),

    /// Coordinator is at its room limit.
    #[error("Coordinator at capacity")]
    CapacityExceeded,

    /// Coordinator is shutting down.
    #[error("Coordinator is draining")]
    Draining,

    /// Internal error (actor channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RcError::Unauthorized => 2,
            RcError::MeetingMismatch | RcError::InvalidMeeting(_) => 4,
            RcError::RoleTaken(_) | RcError::NotJoined => 5,
            RcError::Config(_) | RcError::Internal(_) => 6,
            RcError::CapacityExceeded | RcError::Draining => 7,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::Config(_) | RcError::Internal(_) => "An internal error occurred".to_string(),
            RcError::Unauthorized => "Authentication required".to_string(),
            RcError::RoleTaken(role) => {
                format!("A {role} is already connected to this meeting")
            }
            RcError::MeetingMismatch => "Event does not belong to this meeting".to_string(),
            RcError::NotJoined => "Join a room before sending signaling events".to_string(),
            RcError::InvalidMeeting(_) => "Invalid meeting".to_string(),
            RcError::CapacityExceeded => "Server is at capacity, please try again".to_string(),
            RcError::Draining => "Server is shutting down, please reconnect".to_string(),
        }
    }
}
