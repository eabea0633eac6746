use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol;

/// One week
const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
/// Thirty days
const MAX_STALE_AFTER_SECS: u64 = 30 * 24 * 60 * 60;
const MAX_QUEUE_CAPACITY: u64 = 65_536;
const MAX_CONNECTIONS: u64 = 65_536;
const MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub announcer: AnnouncerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-connection read timeout; a stalled sender is dropped after this
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
    /// Cap on concurrently handled connections. Unbounded when unset.
    #[serde(default)]
    pub max_connections: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnouncerConfig {
    #[serde(default = "default_announce_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Log and back off on transport errors instead of exiting
    #[serde(default)]
    pub retry_on_error: bool,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_tick_interval() -> u64 {
    protocol::TICK_INTERVAL_SECS
}

fn default_stale_after() -> u64 {
    protocol::STALE_AFTER_SECS
}

fn default_queue_capacity() -> usize {
    protocol::QUEUE_CAPACITY
}

fn default_read_timeout() -> u64 {
    30
}

fn default_max_payload() -> usize {
    1024 * 1024
}

fn default_announce_interval() -> u64 {
    protocol::ANNOUNCE_INTERVAL_SECS
}

fn default_connect_timeout() -> u64 {
    protocol::CONNECT_TIMEOUT_SECS
}

fn default_max_backoff() -> u64 {
    300
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            stale_after_secs: default_stale_after(),
            queue_capacity: default_queue_capacity(),
            read_timeout_secs: default_read_timeout(),
            max_payload_bytes: default_max_payload(),
            max_connections: None,
        }
    }
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_announce_interval(),
            connect_timeout_secs: default_connect_timeout(),
            retry_on_error: false,
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl CollectorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Saturates at the largest representable duration
    pub fn stale_after(&self) -> chrono::Duration {
        i64::try_from(self.stale_after_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl AnnouncerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise use built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        let c = &self.collector;
        check_range("collector.tick_interval_secs", c.tick_interval_secs, MAX_INTERVAL_SECS)?;
        check_range("collector.stale_after_secs", c.stale_after_secs, MAX_STALE_AFTER_SECS)?;
        check_range("collector.queue_capacity", c.queue_capacity as u64, MAX_QUEUE_CAPACITY)?;
        check_range("collector.read_timeout_secs", c.read_timeout_secs, MAX_INTERVAL_SECS)?;
        check_range("collector.max_payload_bytes", c.max_payload_bytes as u64, MAX_PAYLOAD_BYTES)?;
        if let Some(max_connections) = c.max_connections {
            check_range("collector.max_connections", max_connections as u64, MAX_CONNECTIONS)?;
        }

        let a = &self.announcer;
        check_range("announcer.interval_secs", a.interval_secs, MAX_INTERVAL_SECS)?;
        check_range("announcer.connect_timeout_secs", a.connect_timeout_secs, MAX_INTERVAL_SECS)?;
        check_range("announcer.max_backoff_secs", a.max_backoff_secs, MAX_INTERVAL_SECS)?;
        Ok(())
    }
}

fn check_range(key: &str, value: u64, max: u64) -> Result<()> {
    if value == 0 {
        bail!("{} must be greater than zero", key);
    }
    if value > max {
        bail!("{} must be at most {} (got {})", key, max, value);
    }
    Ok(())
}

/// Read the `DEBUG` environment flag. Unset or unparseable values count as false.
pub fn debug_from_env() -> bool {
    std::env::var("DEBUG")
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(false)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
