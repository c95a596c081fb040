//! Signaling Channel and transports.
//!
//! - [`channel`] - Reconnecting channel actor used by the Session Controller
//! - [`transport`] - Connector trait and the WebSocket connector

pub mod channel;
pub mod transport;

pub use channel::{ChannelEvent, CloseReason, SignalingChannelHandle};
pub use transport::{SignalingConnector, SignalingLink, TransportError, WebSocketConnector};
