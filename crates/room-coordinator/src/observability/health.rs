//! Health endpoints for the Room Coordinator.
//!
//! - `GET /health` - Liveness: answers 200 for as long as the process serves
//! - `GET /ready` - Readiness: 200 only while joins are accepted
//!
//! `/metrics` is mounted on the same router by `main.rs`.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Where the coordinator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Listeners not bound yet.
    Starting = 0,
    /// Signaling is up and joins are accepted.
    Accepting = 1,
    /// Shutdown started; rooms are being drained.
    Draining = 2,
}

impl Phase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Accepting,
            2 => Phase::Draining,
            _ => Phase::Starting,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Accepting => "accepting",
            Phase::Draining => "draining",
        }
    }
}

/// Shared lifecycle phase read by the probes.
#[derive(Debug, Default)]
pub struct HealthState {
    phase: AtomicU8,
}

impl HealthState {
    /// New state in [`Phase::Starting`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Signaling listener bound; start taking joins.
    pub fn accepting(&self) {
        self.phase.store(Phase::Accepting as u8, Ordering::SeqCst);
    }

    /// Shutdown started. Never goes back to accepting.
    pub fn draining(&self) {
        self.phase.store(Phase::Draining as u8, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Accepting
    }
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness))
        .with_state(health_state)
}

async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    let phase = state.phase();
    let status = if phase == Phase::Accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, phase.as_str())
}
