//! Appointment Gate: decides whether a participant may enter a session now.
//!
//! Consulted once, before a Session Controller is created. Entry opens
//! 15 minutes before the scheduled start and closes 30 minutes after it,
//! both bounds inclusive. All times are the clinic's local wall clock.
//!
//! Pure functions with no I/O. Unparseable dates or times fail closed.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// How long before the scheduled start entry is allowed.
pub const ENTRY_OPENS_BEFORE_MINUTES: i64 = 15;

/// How long after the scheduled start entry is still allowed.
pub const ENTRY_CLOSES_AFTER_MINUTES: i64 = 30;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Combine a scheduled `(date, time)` pair into a local instant.
///
/// Accepts `YYYY-MM-DD` and `HH:MM` or `HH:MM:SS`. Returns `None` for
/// anything else.
#[must_use]
pub fn scheduled_instant(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()?;
    let time = TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(time.trim(), format).ok())?;
    Some(date.and_time(time))
}

/// Whether `now` falls in the entry window of a slot scheduled at
/// `(scheduled_date, scheduled_time)`.
///
/// True iff `scheduled - 15min <= now <= scheduled + 30min`. Malformed input
/// reports the window closed.
#[must_use]
pub fn is_entry_window_open(scheduled_date: &str, scheduled_time: &str, now: NaiveDateTime) -> bool {
    let Some(scheduled) = scheduled_instant(scheduled_date, scheduled_time) else {
        return false;
    };

    // Slots at the edge of the calendar range have no representable window.
    let (Some(opens), Some(closes)) = (
        scheduled.checked_sub_signed(Duration::minutes(ENTRY_OPENS_BEFORE_MINUTES)),
        scheduled.checked_add_signed(Duration::minutes(ENTRY_CLOSES_AFTER_MINUTES)),
    ) else {
        return false;
    };
    now >= opens && now <= closes
}

/// Consultation mode of an appointment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsultationMode {
    /// Video consultation through the session plane.
    Online,
    /// Physical visit; no session is ever opened.
    #[serde(rename = "In-person")]
    InPerson,
}

/// The slice of an appointment record the gate looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Scheduled date, `YYYY-MM-DD`.
    pub date: String,
    /// Scheduled time, `HH:MM` or `HH:MM:SS`.
    pub time: String,
    /// Consultation mode. Records without one are in-person visits.
    #[serde(default)]
    pub mode: Option<ConsultationMode>,
    /// Meeting identifier issued for online consultations.
    #[serde(default)]
    pub meeting_id: Option<String>,
}

/// What the appointment list offers for one appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppointmentAction {
    /// Not an online consultation.
    InPerson,
    /// Online consultation without a usable meeting identifier.
    MissingMeetingId,
    /// Entry window is open; the participant may join this meeting.
    Join { meeting_id: String },
    /// Scheduled start is still ahead and the window has not opened.
    Upcoming,
    /// Window has closed (or the schedule cannot be read).
    Completed,
}

/// Decide the action for an appointment at `now`.
#[must_use]
pub fn appointment_action(appointment: &Appointment, now: NaiveDateTime) -> AppointmentAction {
    if appointment.mode != Some(ConsultationMode::Online) {
        return AppointmentAction::InPerson;
    }

    let meeting_id = match appointment.meeting_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return AppointmentAction::MissingMeetingId,
    };

    if is_entry_window_open(&appointment.date, &appointment.time, now) {
        return AppointmentAction::Join { meeting_id };
    }

    match scheduled_instant(&appointment.date, &appointment.time) {
        Some(scheduled) if now < scheduled => AppointmentAction::Upcoming,
        _ => AppointmentAction::Completed,
    }
}
