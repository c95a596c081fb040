//! Session states and the snapshot published to the presentation layer.

use crate::errors::SessionError;
use crate::media::MediaTrack;
use crate::peer::PeerConnectionState;

use common::types::ParticipantRole;
use std::fmt;
use std::sync::Arc;

/// Session Controller lifecycle.
///
/// `Ended` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AcquiringMedia,
    JoiningRoom,
    WaitingForPeer,
    Negotiating,
    Connected,
    Ended,
    Failed(SessionError),
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed(_))
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AcquiringMedia => "acquiring_media",
            SessionState::JoiningRoom => "joining_room",
            SessionState::WaitingForPeer => "waiting_for_peer",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Ended => "ended",
            SessionState::Failed(_) => "failed",
        }
    }

    /// Default status line for this state.
    #[must_use]
    pub fn status_message(&self, role: ParticipantRole) -> String {
        match self {
            SessionState::Idle => "Ready to join".to_string(),
            SessionState::AcquiringMedia => {
                "Requesting camera and microphone access...".to_string()
            }
            SessionState::JoiningRoom => "Connecting to the consultation room...".to_string(),
            SessionState::WaitingForPeer => match role {
                ParticipantRole::Clinician => "Waiting for the patient to join...".to_string(),
                ParticipantRole::Patient => "Waiting for the doctor to join...".to_string(),
            },
            SessionState::Negotiating => "Connecting the call...".to_string(),
            SessionState::Connected => "Connected".to_string(),
            SessionState::Ended => "Call ended".to_string(),
            SessionState::Failed(error) => error.status_message(),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub status_message: String,
    pub peer_state: PeerConnectionState,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub remote_tracks: Vec<Arc<dyn MediaTrack>>,
    /// Set once terminal: where "return to appointment list" navigates.
    pub exit_route: Option<&'static str>,
}

impl SessionSnapshot {
    #[must_use]
    pub fn initial(role: ParticipantRole) -> Self {
        Self {
            state: SessionState::Idle,
            status_message: SessionState::Idle.status_message(role),
            peer_state: PeerConnectionState::New,
            audio_enabled: false,
            video_enabled: false,
            remote_tracks: Vec::new(),
            exit_route: None,
        }
    }
}
