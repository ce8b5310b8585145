// src/config/file.rs
// File-based configuration from ~/.graph-host/config.toml

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::env::apply_overrides;
use crate::error::{GraphHostError, Result};
use crate::runtime::{SchedulerConfig, DEFAULT_DRAIN_GRACE};
use crate::supervisor::SupervisorConfig;

fn default_drain_grace_ms() -> u64 {
    u64::try_from(DEFAULT_DRAIN_GRACE.as_millis()).unwrap_or(500)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Extension runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How long a closing scheduler waits for queued work before cancelling it
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            drain_grace: Duration::from_millis(self.drain_grace_ms),
        }
    }
}

/// Top-level config structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supervisor: SupervisorConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl HostConfig {
    /// `~/.graph-host/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".graph-host")
            .join("config.toml")
    }

    /// Load from `path`, or the default location when `None`, then apply
    /// environment overrides and validate.
    ///
    /// An explicit path must exist and parse. The default location may be
    /// missing or broken, in which case defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::load_default(),
        };
        apply_overrides(&mut config, |name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GraphHostError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&contents)?;
        debug!(path = %path.display(), "Loaded config from file");
        Ok(config)
    }

    fn load_default() -> Self {
        let path = Self::default_path();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let sup = &self.supervisor;

        if sup.max_workers == 0 {
            return Err(GraphHostError::Config(
                "supervisor.max_workers must be at least 1".to_string(),
            ));
        }
        if sup.port_min > sup.port_max {
            return Err(GraphHostError::Config(format!(
                "supervisor.port_min ({}) is above port_max ({})",
                sup.port_min, sup.port_max
            )));
        }
        if sup.sweep_interval_secs == 0 {
            return Err(GraphHostError::Config(
                "supervisor.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if sup.default_timeout_secs == 0 {
            return Err(GraphHostError::Config(
                "supervisor.default_timeout_secs must be positive, or -1 for never".to_string(),
            ));
        }
        if sup.worker_bin.trim().is_empty() {
            return Err(GraphHostError::Config(
                "supervisor.worker_bin is empty".to_string(),
            ));
        }

        if sup.port_span() <= sup.max_workers {
            warn!(
                ports = sup.port_span(),
                max_workers = sup.max_workers,
                "Port range is not larger than max_workers, live workers may share a port"
            );
        }
        if !sup.worker_args.iter().any(|a| a.contains("{property}")) {
            warn!("supervisor.worker_args has no {{property}} placeholder, workers will not see their property file");
        }

        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        self.runtime.scheduler_config()
    }
}
