//! # Session Test Utilities
//!
//! Fakes and fixtures for testing the session client without a browser,
//! camera or network.
//!
//! ## Modules
//!
//! - `mock_media` - Fake camera/microphone with observable tracks
//! - `mock_peer` - Scriptable fake peer connections
//! - `mock_signaling` - Scripted connector and an in-memory coordinator
//!   backed by the real room actors
//! - `fixtures` - Configs, session parameters and wait helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let connector = Arc::new(InMemoryRoomConnector::new());
//!
//!     let clinician = TestParticipant::new("abc123", ParticipantRole::Clinician, connector.clone());
//!     let patient = TestParticipant::new("abc123", ParticipantRole::Patient, connector.clone());
//!
//!     clinician.handle.start().await.unwrap();
//!     patient.handle.start().await.unwrap();
//!
//!     clinician.wait_for_state(|s| s == &SessionState::Connected).await;
//! }
//! ```
//!
//! ### Scripting the coordinator side
//!
//! ```rust,ignore
//! let connector = Arc::new(ScriptedConnector::new());
//! connector.fail_next(2);
//!
//! // ... start a session, then play the coordinator:
//! let mut server = connector.next_connection().await;
//! assert!(matches!(server.recv().await, SignalingEvent::JoinRoom { .. }));
//! server.send(joined_room("abc123")).await;
//! ```

pub mod fixtures;
pub mod mock_media;
pub mod mock_peer;
pub mod mock_signaling;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_media::*;
pub use mock_peer::*;
pub use mock_signaling::*;
