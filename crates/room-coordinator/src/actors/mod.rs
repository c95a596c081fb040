//! Actor hierarchy of the Room Coordinator.
//!
//! ```text
//! RoomCoordinatorActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active meeting, two role slots)
//! ```
//!
//! WebSocket connections are not actors; each is a reader loop plus a writer
//! task draining the connection's outbound queue (see [`crate::ws`]).
//!
//! # Modules
//!
//! - [`coordinator`] - `RoomCoordinatorActor`, creates and removes rooms
//! - [`room`] - `RoomActor`, join acknowledgement, pairing and relay
//! - [`messages`] - Message types for actor communication

pub mod coordinator;
pub mod messages;
pub mod room;

pub use coordinator::{RoomCoordinatorActor, RoomCoordinatorActorHandle};
pub use messages::*;
pub use room::{RoomActor, RoomActorHandle};
