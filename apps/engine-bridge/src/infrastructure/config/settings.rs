//! Bridge Configuration Settings
//!
//! Configuration types for the engine bridge, loaded from environment
//! variables.

use std::time::Duration;

/// Backend channel connection settings.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Command request/reply channel URL.
    pub command_url: String,
    /// Market data publish/subscribe channel URL.
    pub market_data_url: String,
    /// Heartbeat channel URL.
    pub heartbeat_url: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            command_url: "ws://localhost:9101/commands".to_string(),
            market_data_url: "ws://localhost:9102/market-data".to_string(),
            heartbeat_url: "ws://localhost:9103/heartbeat".to_string(),
        }
    }
}

/// Connection supervision settings shared by all three channels.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Expected heartbeat cadence from the backend.
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before the backend is declared
    /// disconnected.
    pub max_missed_heartbeats: u32,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            max_missed_heartbeats: 10,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Command correlation settings.
#[derive(Debug, Clone)]
pub struct CommandSettings {
    /// Deadline for a backend response before the outcome is reported
    /// indeterminate.
    pub command_timeout: Duration,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(2),
        }
    }
}

/// Internal pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Capacity of the tick hand-off channel between the wire adapter and
    /// the sequencing pipeline.
    pub market_data_capacity: usize,
    /// Capacity of each session's outbound queue.
    pub session_queue_capacity: usize,
    /// Number of order shard workers.
    pub order_shards: usize,
    /// Pause before retrying a failed snapshot fetch.
    pub snapshot_retry: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            market_data_capacity: 10_000,
            session_queue_capacity: 1_000,
            order_shards: 8,
            snapshot_retry: Duration::from_millis(250),
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Backend channel URLs.
    pub backend: BackendSettings,
    /// Connection supervision settings.
    pub connection: ConnectionSettings,
    /// Command correlation settings.
    pub command: CommandSettings,
    /// Internal pipeline settings.
    pub pipeline: PipelineSettings,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a provided channel URL is empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = BackendSettings::default();
        let backend = BackendSettings {
            command_url: parse_env_string("ENGINE_BRIDGE_COMMAND_URL", &defaults.command_url),
            market_data_url: parse_env_string(
                "ENGINE_BRIDGE_MARKET_DATA_URL",
                &defaults.market_data_url,
            ),
            heartbeat_url: parse_env_string("ENGINE_BRIDGE_HEARTBEAT_URL", &defaults.heartbeat_url),
        };

        for (name, url) in [
            ("ENGINE_BRIDGE_COMMAND_URL", &backend.command_url),
            ("ENGINE_BRIDGE_MARKET_DATA_URL", &backend.market_data_url),
            ("ENGINE_BRIDGE_HEARTBEAT_URL", &backend.heartbeat_url),
        ] {
            if url.is_empty() {
                return Err(ConfigError::EmptyValue(name.to_string()));
            }
        }

        let connection = ConnectionSettings {
            heartbeat_interval: parse_env_duration_millis(
                "ENGINE_BRIDGE_HEARTBEAT_INTERVAL_MS",
                ConnectionSettings::default().heartbeat_interval,
            ),
            max_missed_heartbeats: parse_env_u32(
                "ENGINE_BRIDGE_MAX_MISSED_HEARTBEATS",
                ConnectionSettings::default().max_missed_heartbeats,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "ENGINE_BRIDGE_RECONNECT_DELAY_INITIAL_MS",
                ConnectionSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "ENGINE_BRIDGE_RECONNECT_DELAY_MAX_SECS",
                ConnectionSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "ENGINE_BRIDGE_RECONNECT_DELAY_MULTIPLIER",
                ConnectionSettings::default().reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "ENGINE_BRIDGE_MAX_RECONNECT_ATTEMPTS",
                ConnectionSettings::default().max_reconnect_attempts,
            ),
        };

        let command = CommandSettings {
            command_timeout: parse_env_duration_millis(
                "ENGINE_BRIDGE_COMMAND_TIMEOUT_MS",
                CommandSettings::default().command_timeout,
            ),
        };

        let pipeline = PipelineSettings {
            market_data_capacity: parse_env_usize(
                "ENGINE_BRIDGE_MARKET_DATA_CAPACITY",
                PipelineSettings::default().market_data_capacity,
            ),
            session_queue_capacity: parse_env_usize(
                "ENGINE_BRIDGE_SESSION_QUEUE_CAPACITY",
                PipelineSettings::default().session_queue_capacity,
            ),
            order_shards: parse_env_usize(
                "ENGINE_BRIDGE_ORDER_SHARDS",
                PipelineSettings::default().order_shards,
            ),
            snapshot_retry: parse_env_duration_millis(
                "ENGINE_BRIDGE_SNAPSHOT_RETRY_MS",
                PipelineSettings::default().snapshot_retry,
            ),
        };

        Ok(Self {
            backend,
            connection,
            command,
            pipeline,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_settings_defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(settings.max_missed_heartbeats, 10);
        assert_eq!(settings.reconnect_delay_initial, Duration::from_millis(500));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 0);
    }

    #[test]
    fn command_timeout_default() {
        assert_eq!(
            CommandSettings::default().command_timeout,
            Duration::from_secs(2)
        );
    }

    #[test]
    fn pipeline_settings_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.market_data_capacity, 10_000);
        assert_eq!(settings.session_queue_capacity, 1_000);
        assert_eq!(settings.order_shards, 8);
    }
}
