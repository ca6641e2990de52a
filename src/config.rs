//! Configuration for the consumer group manager
//!
//! Three layers of settings: `ClientConfig` is handed verbatim to the Kafka
//! client library when a session is built, `FactoryConfig` pairs a broker
//! list with a `ClientConfig` (replacing it is the essence of reconfigure),
//! and `ManagerConfig` tunes the manager itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, ShepherdError};

/// Default time to wait for a conflicting command lock to clear
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

/// Default capacity of a group's persistent error channel
pub const DEFAULT_ERROR_CHANNEL_CAPACITY: usize = 16;

/// Default Kafka session timeout in milliseconds
pub const DEFAULT_SESSION_TIMEOUT_MS: i32 = 30_000;

/// Default heartbeat interval in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: i32 = 3_000;

/// Default rebalance timeout in milliseconds
pub const DEFAULT_REBALANCE_TIMEOUT_MS: i32 = 60_000;

/// Default maximum records returned by a single poll
pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;

/// Where a fresh group starts consuming when no committed offset exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialOffset {
    /// Start from the newest available record
    #[default]
    Latest,
    /// Start from the oldest available record
    Earliest,
}

/// Client-level settings handed to the Kafka client library when building
/// a consumer-group session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier reported to the brokers
    pub client_id: String,
    /// Session timeout in milliseconds
    pub session_timeout_ms: i32,
    /// Heartbeat interval in milliseconds; must be below the session timeout
    pub heartbeat_interval_ms: i32,
    /// Rebalance timeout in milliseconds
    pub rebalance_timeout_ms: i32,
    /// Offset to start from when the group has no committed offset
    pub initial_offset: InitialOffset,
    /// Maximum records returned by a single poll
    pub max_poll_records: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "shepherd".to_string(),
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            rebalance_timeout_ms: DEFAULT_REBALANCE_TIMEOUT_MS,
            initial_offset: InitialOffset::default(),
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
        }
    }
}

impl ClientConfig {
    /// Validate internal consistency of the client settings.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(ShepherdError::config("client_id must not be empty"));
        }
        if self.session_timeout_ms <= 0 {
            return Err(ShepherdError::config("session_timeout_ms must be positive"));
        }
        if self.heartbeat_interval_ms <= 0 {
            return Err(ShepherdError::config(
                "heartbeat_interval_ms must be positive",
            ));
        }
        if self.heartbeat_interval_ms >= self.session_timeout_ms {
            return Err(ShepherdError::config(
                "heartbeat_interval_ms must be below session_timeout_ms",
            ));
        }
        if self.max_poll_records == 0 {
            return Err(ShepherdError::config("max_poll_records must be positive"));
        }
        Ok(())
    }
}

/// Broker list and client settings used by the session factory.
///
/// Replacing the installed `FactoryConfig` is what `reconfigure` does; every
/// session built afterwards uses the new values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Bootstrap broker addresses, `host:port`
    pub brokers: Vec<String>,
    /// Client settings for sessions built from this config
    pub client: ClientConfig,
}

impl FactoryConfig {
    pub fn new(brokers: Vec<String>, client: ClientConfig) -> Self {
        Self { brokers, client }
    }

    /// Validate the broker list and the embedded client settings.
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(ShepherdError::config("broker list must not be empty"));
        }
        if self.brokers.iter().any(|b| b.is_empty()) {
            return Err(ShepherdError::config("broker address must not be empty"));
        }
        self.client.validate()
    }
}

/// Manager-level tuning knobs
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a `lock_before` acquisition waits for a conflicting lock to
    /// clear before failing
    pub lock_timeout: Duration,
    /// Capacity of each group's persistent error channel
    pub error_channel_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            error_channel_capacity: DEFAULT_ERROR_CHANNEL_CAPACITY,
        }
    }
}
