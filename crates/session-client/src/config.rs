//! Session client configuration.
//!
//! Loaded from `TH_*` environment variables, with a `from_vars` constructor
//! for tests. The TURN credential is held as a [`SecretString`] and is
//! redacted from `Debug` output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default discovery server list.
pub const DEFAULT_ICE_SERVERS: &str = "stun:stun.l.google.com:19302";

/// Default (and minimum) reconnection attempts after a transport drop.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Default (and minimum) delay before the first reconnection attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Default cap on the reconnection delay.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Default number of consecutive negotiation errors tolerated.
pub const DEFAULT_MAX_NEGOTIATION_ERRORS: u32 = 3;

/// One discovery (STUN) or relay (TURN) server.
#[derive(Debug, Clone)]
pub struct IceServer {
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<SecretString>,
}

impl IceServer {
    /// A server without credentials.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    /// Whether this is a relay server.
    #[must_use]
    pub fn is_relay(&self) -> bool {
        self.url.starts_with("turn:") || self.url.starts_with("turns:")
    }
}

/// Signaling reconnection policy.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.base_delay;
        for _ in 1..attempt {
            delay = (delay * 2).min(self.max_delay);
            if delay == self.max_delay {
                break;
            }
        }
        delay.min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
        }
    }
}

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Room Coordinator WebSocket endpoint.
    pub signaling_url: String,

    /// Fixed discovery/relay server list for every Peer Session.
    pub ice_servers: Vec<IceServer>,

    pub reconnect: ReconnectPolicy,

    /// Consecutive negotiation errors before the session fails.
    pub max_negotiation_errors: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl ClientConfig {
    /// Configuration with defaults for everything but the endpoint.
    #[must_use]
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ice_servers: vec![IceServer::new(DEFAULT_ICE_SERVERS)],
            reconnect: ReconnectPolicy::default(),
            max_negotiation_errors: DEFAULT_MAX_NEGOTIATION_ERRORS,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_url = vars
            .get("TH_SIGNALING_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnvVar("TH_SIGNALING_URL".to_string()))?;

        if !(signaling_url.starts_with("ws://") || signaling_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "TH_SIGNALING_URL must be a ws:// or wss:// URL, got '{signaling_url}'"
            )));
        }

        let username = vars.get("TH_TURN_USERNAME").cloned();
        let credential = vars
            .get("TH_TURN_CREDENTIAL")
            .map(|c| SecretString::from(c.clone()));

        let raw_servers = vars
            .get("TH_ICE_SERVERS")
            .map_or(DEFAULT_ICE_SERVERS, String::as_str);
        let ice_servers: Vec<IceServer> = raw_servers
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| {
                let mut server = IceServer::new(url);
                if server.is_relay() {
                    server.username.clone_from(&username);
                    server.credential.clone_from(&credential);
                }
                server
            })
            .collect();

        if ice_servers.is_empty() {
            return Err(ConfigError::InvalidValue(
                "TH_ICE_SERVERS must name at least one server".to_string(),
            ));
        }

        let max_attempts = parse_at_least(
            vars,
            "TH_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        )?;
        let base_delay_ms = parse_at_least(
            vars,
            "TH_RECONNECT_BASE_DELAY_MS",
            DEFAULT_RECONNECT_BASE_DELAY_MS,
            DEFAULT_RECONNECT_BASE_DELAY_MS,
        )?;
        let max_delay_ms = parse_at_least(
            vars,
            "TH_RECONNECT_MAX_DELAY_MS",
            DEFAULT_RECONNECT_MAX_DELAY_MS,
            base_delay_ms,
        )?;
        let max_negotiation_errors = parse_at_least(
            vars,
            "TH_MAX_NEGOTIATION_ERRORS",
            DEFAULT_MAX_NEGOTIATION_ERRORS,
            1,
        )?;

        Ok(ClientConfig {
            signaling_url,
            ice_servers,
            reconnect: ReconnectPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms),
            },
            max_negotiation_errors,
        })
    }
}

fn parse_at_least<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
    minimum: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };
    raw.parse::<T>()
        .ok()
        .filter(|value| *value >= minimum)
        .ok_or_else(|| {
            ConfigError::InvalidValue(format!("{name} must be at least {minimum}, got '{raw}'"))
        })
}
