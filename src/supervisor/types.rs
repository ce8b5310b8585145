//! Types for the worker supervisor
//!
//! Requests arriving from the control surface, the public view of a worker,
//! idle timeouts and supervisor configuration.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GraphHostError, Result};

// ============================================================================
// Requests
// ============================================================================

/// Start one worker for a channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(alias = "channel")]
    pub channel_name: String,
    #[serde(alias = "graph")]
    pub graph_name: String,
    /// Idle timeout in seconds: negative never expires, zero or absent uses
    /// the configured default
    #[serde(default)]
    pub timeout: Option<i64>,
    /// Free-form properties handed to the worker through its property file
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl StartRequest {
    pub fn new(channel_name: impl Into<String>, graph_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            graph_name: graph_name.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, secs: i64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_channel(&self.channel_name)?;
        if self.graph_name.trim().is_empty() {
            return Err(GraphHostError::InvalidRequest(
                "graph_name is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(alias = "channel")]
    pub channel_name: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingRequest {
    #[serde(alias = "channel")]
    pub channel_name: String,
}

/// Channel names end up in file names, so path separators are refused
pub fn validate_channel(channel: &str) -> Result<()> {
    if channel.trim().is_empty() {
        return Err(GraphHostError::InvalidRequest(
            "channel_name is required".to_string(),
        ));
    }
    if channel.contains(['/', '\\', '\0']) || channel == "." || channel == ".." {
        return Err(GraphHostError::InvalidRequest(format!(
            "channel_name {channel:?} contains path characters"
        )));
    }
    Ok(())
}

// ============================================================================
// Worker view
// ============================================================================

/// What `list` reports for each live worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub channel_name: String,
    pub graph_name: String,
    pub pid: Option<u32>,
    pub control_port: u16,
    pub created_at: DateTime<Utc>,
    /// -1 when the worker never expires
    pub idle_timeout_secs: i64,
    pub log_path: PathBuf,
}

/// How long a worker may go without a ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTimeout {
    Never,
    After(Duration),
}

impl IdleTimeout {
    /// Negative seconds mean never
    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(secs) => Self::After(Duration::from_secs(secs)),
            Err(_) => Self::Never,
        }
    }

    /// Requested timeout if non-zero, otherwise the configured default
    pub fn resolve(requested: Option<i64>, default_secs: i64) -> Self {
        match requested {
            Some(secs) if secs != 0 => Self::from_secs(secs),
            _ => Self::from_secs(default_secs),
        }
    }

    pub fn as_secs(&self) -> i64 {
        match self {
            Self::Never => -1,
            Self::After(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub fn is_expired(&self, last_activity: Instant, now: Instant) -> bool {
        match self {
            Self::Never => false,
            Self::After(timeout) => now.saturating_duration_since(last_activity) > *timeout,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

fn default_max_workers() -> usize {
    4
}
fn default_port_min() -> u16 {
    10000
}
fn default_port_max() -> u16 {
    11000
}
fn default_timeout_secs() -> i64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    5
}
fn default_worker_bin() -> String {
    "tman".to_string()
}
fn default_worker_args() -> Vec<String> {
    ["run", "start", "--", "--property", "{property}"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".graph-host")
}
fn default_log_dir() -> PathBuf {
    state_dir().join("logs")
}
fn default_property_dir() -> PathBuf {
    state_dir().join("properties")
}

/// Supervisor settings, fixed at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_port_min")]
    pub port_min: u16,
    #[serde(default = "default_port_max")]
    pub port_max: u16,
    /// Used when a start request carries no timeout; -1 never expires
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Graph-hosting executable
    #[serde(default = "default_worker_bin")]
    pub worker_bin: String,
    /// Arguments; `{property}`, `{channel}`, `{graph}` and `{port}` are substituted
    #[serde(default = "default_worker_args")]
    pub worker_args: Vec<String>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_property_dir")]
    pub property_dir: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            port_min: default_port_min(),
            port_max: default_port_max(),
            default_timeout_secs: default_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            worker_bin: default_worker_bin(),
            worker_args: default_worker_args(),
            work_dir: None,
            log_dir: default_log_dir(),
            property_dir: default_property_dir(),
        }
    }
}

impl SupervisorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Number of ports in the configured range
    pub fn port_span(&self) -> usize {
        if self.port_min > self.port_max {
            return 0;
        }
        usize::from(self.port_max - self.port_min) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_validation() {
        assert!(StartRequest::new("room-1", "voice_assistant").validate().is_ok());

        let err = StartRequest::new("", "voice_assistant").validate().unwrap_err();
        assert!(matches!(err, GraphHostError::InvalidRequest(_)));

        let err = StartRequest::new("room-1", "  ").validate().unwrap_err();
        assert!(matches!(err, GraphHostError::InvalidRequest(_)));

        assert!(StartRequest::new("../etc", "g").validate().is_err());
        assert!(StartRequest::new("..", "g").validate().is_err());
    }

    #[test]
    fn test_start_request_accepts_short_field_names() {
        let req: StartRequest = serde_json::from_value(serde_json::json!({
            "channel": "room-1",
            "graph": "voice_assistant",
            "timeout": 30
        }))
        .unwrap();
        assert_eq!(req.channel_name, "room-1");
        assert_eq!(req.graph_name, "voice_assistant");
        assert_eq!(req.timeout, Some(30));
        assert!(req.properties.is_null());
    }

    #[test]
    fn test_idle_timeout_resolution() {
        assert_eq!(
            IdleTimeout::resolve(Some(30), 60),
            IdleTimeout::After(Duration::from_secs(30))
        );
        assert_eq!(
            IdleTimeout::resolve(None, 60),
            IdleTimeout::After(Duration::from_secs(60))
        );
        assert_eq!(
            IdleTimeout::resolve(Some(0), 60),
            IdleTimeout::After(Duration::from_secs(60))
        );
        assert_eq!(IdleTimeout::resolve(Some(-1), 60), IdleTimeout::Never);
        assert_eq!(IdleTimeout::resolve(None, -1), IdleTimeout::Never);
        assert_eq!(IdleTimeout::Never.as_secs(), -1);
    }

    #[test]
    fn test_idle_timeout_expiry() {
        let start = Instant::now();
        let timeout = IdleTimeout::After(Duration::from_secs(60));
        assert!(!timeout.is_expired(start, start + Duration::from_secs(60)));
        assert!(timeout.is_expired(start, start + Duration::from_secs(61)));
        assert!(!IdleTimeout::Never.is_expired(start, start + Duration::from_secs(86_400 * 365)));
    }

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config: SupervisorConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.port_min, 10000);
        assert_eq!(config.port_max, 11000);
        assert_eq!(config.port_span(), 1001);
        assert_eq!(config.worker_args.last().map(String::as_str), Some("{property}"));
    }
}
