//! Telehealth Session Client
//!
//! Client half of a two-party consultation: acquires local media, joins the
//! meeting's room through the Room Coordinator, negotiates a direct peer
//! connection and tears everything down exactly once when the call ends.
//!
//! # Architecture
//!
//! ```text
//! SessionControllerActor (one per consultation attempt)
//! ├── LocalMediaTrackSet   (MediaAcquirer over the platform MediaDevices)
//! ├── PeerSession          (platform PeerConnection, candidate queue)
//! └── SignalingChannelActor (reconnecting transport to the coordinator)
//! ```
//!
//! The platform media stack and the signaling transport are traits, so the
//! host supplies real bindings and tests supply fakes.
//!
//! # Modules
//!
//! - [`config`] - Client configuration from environment
//! - [`controller`] - Session Controller state machine
//! - [`errors`] - Session error taxonomy
//! - [`media`] - Media Acquirer and local track set
//! - [`peer`] - Peer Session
//! - [`signaling`] - Signaling Channel and transports
//! - [`state`] - Session states and presentation snapshot

pub mod config;
pub mod controller;
pub mod errors;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod state;

pub use controller::{SessionControllerHandle, SessionParams, SessionPlatform};
pub use errors::SessionError;
pub use state::{SessionSnapshot, SessionState};
