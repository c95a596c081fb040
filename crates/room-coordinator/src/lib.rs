//! Room Coordinator Library
//!
//! Reference signaling relay for two-party telehealth consultations. It:
//!
//! - Groups exactly two participants (one clinician, one patient) by meeting ID
//! - Acknowledges joins and tells the clinician when to start the call
//! - Relays session descriptions and ICE candidates between the pair
//! - Tells a participant when the other one leaves
//!
//! Media never passes through the coordinator.
//!
//! # Architecture
//!
//! ```text
//! RoomCoordinatorActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active meeting)
//!         └── holds the outbound queues of up to two WebSocket connections
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Coordinator and room actors
//! - [`config`] - Service configuration from environment
//! - [`connection`] - Transport-independent client connection
//! - [`errors`] - Error types with error codes and client-safe messages
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`ws`] - WebSocket signaling endpoint

pub mod actors;
pub mod config;
pub mod connection;
pub mod errors;
pub mod observability;
pub mod ws;
