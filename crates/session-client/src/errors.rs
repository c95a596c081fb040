//! Session error taxonomy.
//!
//! Every failure the Session Controller can surface maps to one
//! [`SessionError`] variant. Recoverable conditions (`ConnectionDegraded`,
//! single `Negotiation` errors) are absorbed where they are detected and only
//! ever shown as a status line; fatal ones end the session in `Failed`.

use crate::media::MediaAccessError;
use thiserror::Error;

/// Errors surfaced by the session client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Missing or malformed meeting identifier.
    #[error("Invalid meeting: {0}")]
    InvalidMeeting(String),

    /// Camera or microphone could not be acquired.
    #[error("Media access failed: {0}")]
    MediaAccess(#[from] MediaAccessError),

    /// The signaling transport dropped and is being retried.
    #[error("Signaling connection degraded (attempt {attempt} of {max_attempts})")]
    ConnectionDegraded { attempt: u32, max_attempts: u32 },

    /// Malformed or unexpected session description or candidate.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Peer-to-peer connectivity failed with no recovery path.
    #[error("Peer connection failed: {0}")]
    PeerConnectionFailed(String),

    /// The Room Coordinator refused to admit this participant.
    #[error("Room rejected join: {0}")]
    RoomRejected(String),

    /// Signaling reconnection attempts are exhausted.
    #[error("Signaling unavailable")]
    SignalingUnavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether this error ends the session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::ConnectionDegraded { .. } | SessionError::Negotiation(_)
        )
    }

    /// Status line shown to the participant.
    ///
    /// Never includes descriptions, candidates or credentials.
    #[must_use]
    pub fn status_message(&self) -> String {
        match self {
            SessionError::InvalidMeeting(_) => {
                "This appointment has no valid meeting link.".to_string()
            }
            SessionError::MediaAccess(MediaAccessError::PermissionDenied) => {
                "Camera and microphone access was denied. Allow access and try again.".to_string()
            }
            SessionError::MediaAccess(MediaAccessError::NotFound) => {
                "No camera or microphone was found.".to_string()
            }
            SessionError::MediaAccess(_) => {
                "Could not start your camera or microphone.".to_string()
            }
            SessionError::ConnectionDegraded {
                attempt,
                max_attempts,
            } => format!("Connection lost. Reconnecting ({attempt}/{max_attempts})..."),
            SessionError::Negotiation(_) => "Could not set up the call.".to_string(),
            SessionError::PeerConnectionFailed(_) => "The call connection failed.".to_string(),
            SessionError::RoomRejected(reason) => format!("Could not join the consultation: {reason}"),
            SessionError::SignalingUnavailable => {
                "Could not reach the consultation service.".to_string()
            }
            SessionError::Internal(_) => "An internal error occurred.".to_string(),
        }
    }
}
