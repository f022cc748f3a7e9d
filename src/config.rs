//! Configuration Module
//!
//! Handles loading engine and server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Cross-context broadcast transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Native publish/subscribe channel
    Channel,
    /// Short-lived entries in the shared durable store
    Storage,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "channel" => Ok(TransportKind::Channel),
            "storage" => Ok(TransportKind::Storage),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

/// Engine and server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Debounce window in milliseconds before a pending batch is flushed
    pub debounce_ms: u64,
    /// Number of keys that triggers an immediate flush
    pub max_batch_size: usize,
    /// Retries allowed after the first failed attempt
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub retry_base_delay_ms: u64,
    /// Cache entry TTL in seconds
    pub cache_ttl: u64,
    /// Interval in seconds between expired-entry sweeps
    pub sweep_interval: u64,
    /// Interval in seconds between reachability probes
    pub probe_interval: u64,
    /// Snapshots older than this many seconds are ignored
    pub snapshot_max_age: u64,
    /// Lifetime of a fallback broadcast entry in milliseconds
    pub broadcast_ttl_ms: u64,
    /// Interval in seconds between `metrics-collected` events
    pub metrics_interval: u64,
    /// Version stamped into snapshots and remote requests
    pub schema_version: u32,
    /// Base URL of the authoritative store, None = embedded reference store
    pub remote_url: Option<String>,
    /// Bearer token sent with remote requests
    pub auth_token: Option<String>,
    /// Directory used by the file storage backend
    pub storage_dir: PathBuf,
    /// Optional JSON file holding setting defaults
    pub defaults_file: Option<PathBuf>,
    /// Broadcast transport
    pub transport: TransportKind,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `DEBOUNCE_MS` - Debounce window (default: 1000)
    /// - `MAX_BATCH_SIZE` - Keys per batch before forced flush (default: 50)
    /// - `MAX_RETRIES` - Retries after the first failure (default: 3)
    /// - `RETRY_BASE_DELAY_MS` - Backoff base delay (default: 1000)
    /// - `CACHE_TTL` - Cache entry TTL in seconds (default: 3600)
    /// - `SWEEP_INTERVAL` - Expired-entry sweep in seconds (default: 60)
    /// - `PROBE_INTERVAL` - Reachability probe in seconds (default: 30)
    /// - `SNAPSHOT_MAX_AGE` - Snapshot freshness in seconds (default: 86400)
    /// - `BROADCAST_TTL_MS` - Fallback broadcast entry lifetime (default: 1000)
    /// - `METRICS_INTERVAL` - Metrics event interval in seconds (default: 60)
    /// - `SCHEMA_VERSION` - Snapshot schema version (default: 1)
    /// - `REMOTE_URL` - Authoritative store base URL (default: unset)
    /// - `AUTH_TOKEN` - Remote bearer token (default: unset)
    /// - `STORAGE_DIR` - File storage directory (default: .settings-sync)
    /// - `DEFAULTS_FILE` - JSON defaults file (default: unset)
    /// - `SYNC_TRANSPORT` - `channel` or `storage` (default: channel)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            debounce_ms: parse_var("DEBOUNCE_MS").unwrap_or(defaults.debounce_ms),
            max_batch_size: parse_var("MAX_BATCH_SIZE").unwrap_or(defaults.max_batch_size),
            max_retries: parse_var("MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_base_delay_ms: parse_var("RETRY_BASE_DELAY_MS")
                .unwrap_or(defaults.retry_base_delay_ms),
            cache_ttl: parse_var("CACHE_TTL").unwrap_or(defaults.cache_ttl),
            sweep_interval: parse_var("SWEEP_INTERVAL").unwrap_or(defaults.sweep_interval),
            probe_interval: parse_var("PROBE_INTERVAL").unwrap_or(defaults.probe_interval),
            snapshot_max_age: parse_var("SNAPSHOT_MAX_AGE").unwrap_or(defaults.snapshot_max_age),
            broadcast_ttl_ms: parse_var("BROADCAST_TTL_MS").unwrap_or(defaults.broadcast_ttl_ms),
            metrics_interval: parse_var("METRICS_INTERVAL").unwrap_or(defaults.metrics_interval),
            schema_version: parse_var("SCHEMA_VERSION").unwrap_or(defaults.schema_version),
            remote_url: non_empty_var("REMOTE_URL"),
            auth_token: non_empty_var("AUTH_TOKEN"),
            storage_dir: non_empty_var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            defaults_file: non_empty_var("DEFAULTS_FILE").map(PathBuf::from),
            transport: parse_var("SYNC_TRANSPORT").unwrap_or(defaults.transport),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn cache_ttl_ms(&self) -> u64 {
        self.cache_ttl * 1000
    }

    pub fn snapshot_max_age_ms(&self) -> u64 {
        self.snapshot_max_age * 1000
    }

    pub fn broadcast_ttl(&self) -> Duration {
        Duration::from_millis(self.broadcast_ttl_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            debounce_ms: 1000,
            max_batch_size: 50,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            cache_ttl: 3600,
            sweep_interval: 60,
            probe_interval: 30,
            snapshot_max_age: 86_400,
            broadcast_ttl_ms: 1000,
            metrics_interval: 60,
            schema_version: 1,
            remote_url: None,
            auth_token: None,
            storage_dir: PathBuf::from(".settings-sync"),
            defaults_file: None,
            transport: TransportKind::Channel,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
