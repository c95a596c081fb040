//! Observability for the Room Coordinator.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit safe
//! fields. Session descriptions, candidates and auth tokens never appear in
//! logs or metric labels.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `rc_rooms_active` | Gauge | none |
//! | `rc_connections_active` | Gauge | none |
//! | `rc_joins_total` | Counter | `outcome` |
//! | `rc_messages_relayed_total` | Counter | `event` |
//! | `rc_messages_dropped_total` | Counter | `reason` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
