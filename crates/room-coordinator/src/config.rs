//! Room Coordinator configuration.
//!
//! Configuration is loaded from environment variables, with a
//! `from_vars` constructor for tests.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default signaling (WebSocket) bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8443";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default maximum number of concurrently open rooms.
pub const DEFAULT_MAX_ROOMS: u32 = 1000;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rc";

/// Room Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signaling server bind address (default: "0.0.0.0:8443").
    pub bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Maximum concurrently open rooms.
    pub max_rooms: u32,

    /// Reject WebSocket upgrades that carry no auth token.
    pub require_auth_token: bool,

    /// Unique identifier for this coordinator instance.
    pub instance_id: String,
}

/// Every variable has a default, so only malformed values fail.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_rooms = match vars.get("RC_MAX_ROOMS") {
            Some(raw) => raw.parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(|| {
                ConfigError::InvalidValue(format!("RC_MAX_ROOMS must be a positive integer, got '{raw}'"))
            })?,
            None => DEFAULT_MAX_ROOMS,
        };

        let require_auth_token = match vars.get("RC_REQUIRE_AUTH_TOKEN").map(String::as_str) {
            None => true,
            Some("true" | "1") => true,
            Some("false" | "0") => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "RC_REQUIRE_AUTH_TOKEN must be true or false, got '{other}'"
                )))
            }
        };

        let instance_id = vars.get("RC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            max_rooms,
            require_auth_token,
            instance_id,
        })
    }
}
