//! Common utilities and types shared across the telehealth session plane.

#![warn(clippy::pedantic)]

/// Module for identifiers and participant roles
pub mod types;

/// Module for the signaling wire protocol
pub mod protocol;

/// Module for the appointment entry gate
pub mod appointment;

/// Module for secret types that prevent accidental logging
pub mod secret;
