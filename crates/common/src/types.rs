//! Common data types for the telehealth session plane.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error returned when a meeting identifier is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeetingIdError {
    /// The identifier was missing or blank.
    #[error("Meeting ID is empty")]
    Empty,
}

/// Opaque identifier of a scheduled session, shared by both participants.
///
/// The only room key used by the Room Coordinator. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeetingId(String);

impl MeetingId {
    /// Parse a meeting identifier, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns `MeetingIdError::Empty` if nothing remains after trimming.
    pub fn parse(raw: &str) -> Result<Self, MeetingIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MeetingIdError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MeetingId {
    type Error = MeetingIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MeetingId> for String {
    fn from(value: MeetingId) -> Self {
        value.0
    }
}

impl fmt::Display for MeetingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the consultation a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// The doctor. The only role allowed to create the offer.
    Clinician,
    /// The patient. Answers the clinician's offer.
    Patient,
}

impl ParticipantRole {
    /// Returns the role as a string for log fields and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Clinician => "clinician",
            ParticipantRole::Patient => "patient",
        }
    }

    /// The other role in a two-party consultation.
    #[must_use]
    pub const fn counterpart(&self) -> Self {
        match self {
            ParticipantRole::Clinician => ParticipantRole::Patient,
            ParticipantRole::Patient => ParticipantRole::Clinician,
        }
    }

    /// Whether this role initiates negotiation once the room is paired.
    #[must_use]
    pub const fn is_offerer(&self) -> bool {
        matches!(self, ParticipantRole::Clinician)
    }

    /// Derive the role from the entry route the participant came through.
    ///
    /// Clinicians enter through `/doctor/...` routes; every other entry point
    /// belongs to a patient.
    #[must_use]
    pub fn from_entry_path(path: &str) -> Self {
        if path.contains("/doctor/") {
            ParticipantRole::Clinician
        } else {
            ParticipantRole::Patient
        }
    }

    /// Route of the appointment list this role returns to when a session ends.
    #[must_use]
    pub const fn appointment_list_route(&self) -> &'static str {
        match self {
            ParticipantRole::Clinician => "/doctor-booking-history",
            ParticipantRole::Patient => "/booking-history",
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
