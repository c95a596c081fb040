//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for every credential that crosses the
//! session plane: the login subsystem's auth token handed to the Session
//! Controller and the TURN credential in the client ICE configuration.
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds one stays safe to log via `{:?}` or tracing fields.
//! The value is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinCredentials {
//!     meeting_id: String,
//!     auth_token: SecretString,
//! }
//!
//! let creds = JoinCredentials {
//!     meeting_id: "abc123".to_string(),
//!     auth_token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! assert!(!format!("{creds:?}").contains("eyJhbGciOi"));
//! let bearer = format!("Bearer {}", creds.auth_token.expose_secret());
//! assert!(bearer.starts_with("Bearer "));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
