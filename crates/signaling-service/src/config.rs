//! Signaling coordinator configuration.
//!
//! Configuration is loaded from environment variables. The identity
//! secret is redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8443";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default maximum number of concurrent rooms.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Default maximum participants per room.
pub const DEFAULT_ROOM_CAPACITY: usize = 25;

/// Default heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5000;

/// Default number of missed intervals before a participant is timed out.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MULTIPLIER: u32 = 3;

/// Default reconnection grace period in seconds.
pub const DEFAULT_RECONNECT_GRACE_PERIOD_SECONDS: u64 = 30;

/// Default screen-share renegotiation debounce window in milliseconds.
pub const DEFAULT_RENEGOTIATION_DEBOUNCE_MS: u64 = 500;

/// Default per-participant outbound queue capacity.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Upper bound for the heartbeat interval in milliseconds.
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 10 * 60 * 1000;

/// Upper bound for the heartbeat miss multiplier.
pub const MAX_HEARTBEAT_TIMEOUT_MULTIPLIER: u32 = 100;

/// Upper bound for the reconnection grace period in seconds.
pub const MAX_RECONNECT_GRACE_PERIOD_SECONDS: u64 = 24 * 60 * 60;

/// Upper bound for the renegotiation debounce window in milliseconds.
pub const MAX_RENEGOTIATION_DEBOUNCE_MS: u64 = 60 * 1000;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "sig";

/// Room-level settings copied into every room worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSettings {
    /// Maximum participants per room.
    pub capacity: usize,
    /// Expected heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Missed intervals tolerated before timeout.
    pub heartbeat_timeout_multiplier: u32,
    /// How long a timed-out participant may rejoin and keep its identity.
    pub reconnect_grace_period: Duration,
    /// Coalescing window for screen-share toggles.
    pub renegotiation_debounce: Duration,
}

impl RoomSettings {
    /// Silence after which a participant is considered gone.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.heartbeat_timeout_multiplier)
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_ROOM_CAPACITY,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout_multiplier: DEFAULT_HEARTBEAT_TIMEOUT_MULTIPLIER,
            reconnect_grace_period: Duration::from_secs(DEFAULT_RECONNECT_GRACE_PERIOD_SECONDS),
            renegotiation_debounce: Duration::from_millis(DEFAULT_RENEGOTIATION_DEBOUNCE_MS),
        }
    }
}

/// Signaling coordinator configuration.
#[derive(Clone)]
pub struct Config {
    /// WebSocket server bind address (default: "0.0.0.0:8443").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Secret used to verify identity tokens.
    /// Protected by `SecretString` to prevent accidental logging.
    pub identity_secret: SecretString,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// Maximum concurrent rooms.
    pub max_rooms: usize,

    /// Per-room settings.
    pub room: RoomSettings,

    /// Bounded capacity of each participant's outbound queue.
    pub outbound_queue_capacity: usize,

    /// Emit JSON-formatted logs.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("identity_secret", &"[REDACTED]")
            .field("instance_id", &self.instance_id)
            .field("max_rooms", &self.max_rooms)
            .field("room", &self.room)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}

/// Parse an optional variable that must be strictly positive.
fn parse_nonzero<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let value = parse_var(vars, key, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!("{key} must be non-zero")));
    }
    Ok(value)
}

/// Reject values above `max`.
fn at_most<T>(key: &str, value: T, max: T) -> Result<T, ConfigError>
where
    T: PartialOrd + fmt::Display,
{
    if value > max {
        return Err(ConfigError::InvalidValue(format!(
            "{key}={value} exceeds maximum {max}"
        )));
    }
    Ok(value)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let identity_secret = vars
            .get("SIGNALING_IDENTITY_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("SIGNALING_IDENTITY_SECRET".to_string()))?;
        let identity_secret = SecretString::from(identity_secret.clone());

        let bind_address = vars
            .get("SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SIGNALING_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_rooms = parse_nonzero(vars, "SIGNALING_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        let capacity = parse_nonzero(vars, "SIGNALING_ROOM_CAPACITY", DEFAULT_ROOM_CAPACITY)?;
        let heartbeat_interval_ms = at_most(
            "SIGNALING_HEARTBEAT_INTERVAL_MS",
            parse_nonzero(
                vars,
                "SIGNALING_HEARTBEAT_INTERVAL_MS",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )?,
            MAX_HEARTBEAT_INTERVAL_MS,
        )?;
        let heartbeat_timeout_multiplier = at_most(
            "SIGNALING_HEARTBEAT_TIMEOUT_MULTIPLIER",
            parse_nonzero(
                vars,
                "SIGNALING_HEARTBEAT_TIMEOUT_MULTIPLIER",
                DEFAULT_HEARTBEAT_TIMEOUT_MULTIPLIER,
            )?,
            MAX_HEARTBEAT_TIMEOUT_MULTIPLIER,
        )?;
        // Zero grace and zero debounce are allowed: both just disable the feature.
        let grace_seconds = at_most(
            "SIGNALING_RECONNECT_GRACE_PERIOD_SECONDS",
            parse_var(
                vars,
                "SIGNALING_RECONNECT_GRACE_PERIOD_SECONDS",
                DEFAULT_RECONNECT_GRACE_PERIOD_SECONDS,
            )?,
            MAX_RECONNECT_GRACE_PERIOD_SECONDS,
        )?;
        let debounce_ms = at_most(
            "SIGNALING_RENEGOTIATION_DEBOUNCE_MS",
            parse_var(
                vars,
                "SIGNALING_RENEGOTIATION_DEBOUNCE_MS",
                DEFAULT_RENEGOTIATION_DEBOUNCE_MS,
            )?,
            MAX_RENEGOTIATION_DEBOUNCE_MS,
        )?;
        let outbound_queue_capacity = parse_nonzero(
            vars,
            "SIGNALING_OUTBOUND_QUEUE_CAPACITY",
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        )?;
        let log_json = parse_var(vars, "SIGNALING_LOG_JSON", false)?;

        let instance_id = vars.get("SIGNALING_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            identity_secret,
            instance_id,
            max_rooms,
            room: RoomSettings {
                capacity,
                heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
                heartbeat_timeout_multiplier,
                reconnect_grace_period: Duration::from_secs(grace_seconds),
                renegotiation_debounce: Duration::from_millis(debounce_ms),
            },
            outbound_queue_capacity,
            log_json,
        })
    }
}
