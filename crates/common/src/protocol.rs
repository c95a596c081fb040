//! Signaling wire protocol between session clients and the Room Coordinator.
//!
//! Every frame is a JSON text message, adjacently tagged:
//!
//! ```text
//! {"event": "offer", "data": {"sdp": "v=0...", "meetingId": "abc123"}}
//! ```
//!
//! | event           | direction                          |
//! |-----------------|------------------------------------|
//! | `join-room`     | client -> coordinator              |
//! | `joined-room`   | coordinator -> joiner              |
//! | `start-call`    | coordinator -> clinician only      |
//! | `offer`         | relayed peer -> peer               |
//! | `answer`        | relayed peer -> peer               |
//! | `ice-candidate` | relayed peer -> peer               |
//! | `peer-left`     | coordinator -> remaining peer      |
//!
//! Relayed events carry the sender's `meetingId`; the coordinator never
//! delivers them into a room with a different identifier. Signaling carries
//! room membership and negotiation only, never media.

use crate::types::{MeetingId, ParticipantRole};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding or encoding wire frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame was not a valid signaling event.
    #[error("Malformed signaling frame: {0}")]
    Malformed(String),

    /// Event could not be serialized.
    #[error("Failed to encode signaling event: {0}")]
    Encode(String),
}

/// A network path proposal exchanged during negotiation.
///
/// Field names follow the browser `RTCIceCandidateInit` dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate attribute line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line the candidate belongs to.
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate with only the attribute line set.
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// A signaling event as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalingEvent {
    /// Announce room membership. Re-sent after every reconnect.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        meeting_id: MeetingId,
        role: ParticipantRole,
    },

    /// Coordinator's answer to `join-room`.
    #[serde(rename_all = "camelCase")]
    JoinedRoom {
        success: bool,
        meeting_id: MeetingId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Both participants are present; the clinician may offer.
    StartCall {},

    /// Session description offer.
    #[serde(rename_all = "camelCase")]
    Offer { sdp: String, meeting_id: MeetingId },

    /// Session description answer.
    #[serde(rename_all = "camelCase")]
    Answer { sdp: String, meeting_id: MeetingId },

    /// Trickled ICE candidate.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        candidate: IceCandidate,
        meeting_id: MeetingId,
    },

    /// The other participant left the room or lost its transport.
    #[serde(rename_all = "camelCase")]
    PeerLeft { meeting_id: MeetingId },
}

impl SignalingEvent {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if the frame is not a known event.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Encode` if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Wire name of the event. Bounded set, safe as a metric label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SignalingEvent::JoinRoom { .. } => "join-room",
            SignalingEvent::JoinedRoom { .. } => "joined-room",
            SignalingEvent::StartCall {} => "start-call",
            SignalingEvent::Offer { .. } => "offer",
            SignalingEvent::Answer { .. } => "answer",
            SignalingEvent::IceCandidate { .. } => "ice-candidate",
            SignalingEvent::PeerLeft { .. } => "peer-left",
        }
    }

    /// Meeting the event is scoped to, if it carries one.
    #[must_use]
    pub fn meeting_id(&self) -> Option<&MeetingId> {
        match self {
            SignalingEvent::StartCall {} => None,
            SignalingEvent::JoinRoom { meeting_id, .. }
            | SignalingEvent::JoinedRoom { meeting_id, .. }
            | SignalingEvent::Offer { meeting_id, .. }
            | SignalingEvent::Answer { meeting_id, .. }
            | SignalingEvent::IceCandidate { meeting_id, .. }
            | SignalingEvent::PeerLeft { meeting_id } => Some(meeting_id),
        }
    }

    /// Whether the coordinator relays this event to the other participant.
    #[must_use]
    pub const fn is_relayed(&self) -> bool {
        matches!(
            self,
            SignalingEvent::Offer { .. }
                | SignalingEvent::Answer { .. }
                | SignalingEvent::IceCandidate { .. }
        )
    }

    /// Split a relayed event into its meeting and negotiation payload.
    #[must_use]
    pub fn into_negotiation(self) -> Option<(MeetingId, NegotiationMessage)> {
        match self {
            SignalingEvent::Offer { sdp, meeting_id } => {
                Some((meeting_id, NegotiationMessage::Offer { sdp }))
            }
            SignalingEvent::Answer { sdp, meeting_id } => {
                Some((meeting_id, NegotiationMessage::Answer { sdp }))
            }
            SignalingEvent::IceCandidate {
                candidate,
                meeting_id,
            } => Some((meeting_id, NegotiationMessage::IceCandidate(candidate))),
            _ => None,
        }
    }
}

/// Negotiation payload exchanged between the two Peer Sessions.
///
/// Transient: relayed, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationMessage {
    /// Offer session description.
    Offer { sdp: String },
    /// Answer session description.
    Answer { sdp: String },
    /// ICE candidate.
    IceCandidate(IceCandidate),
}

impl NegotiationMessage {
    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            NegotiationMessage::Offer { .. } => "offer",
            NegotiationMessage::Answer { .. } => "answer",
            NegotiationMessage::IceCandidate(_) => "ice-candidate",
        }
    }

    /// Scope the payload to a meeting for sending.
    #[must_use]
    pub fn into_event(self, meeting_id: MeetingId) -> SignalingEvent {
        match self {
            NegotiationMessage::Offer { sdp } => SignalingEvent::Offer { sdp, meeting_id },
            NegotiationMessage::Answer { sdp } => SignalingEvent::Answer { sdp, meeting_id },
            NegotiationMessage::IceCandidate(candidate) => SignalingEvent::IceCandidate {
                candidate,
                meeting_id,
            },
        }
    }
}
