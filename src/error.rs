// src/error.rs
// Error types shared by the extension runtime and the worker supervisor

use thiserror::Error;

/// Main error type for graph-host
#[derive(Error, Debug)]
pub enum GraphHostError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("worker limit reached ({max} workers)")]
    CapacityExceeded { max: usize },

    #[error("failed to launch worker: {0}")]
    Launch(String),

    #[error("failed to materialize worker property: {0}")]
    Property(String),

    #[error("extension {extension}: expected state {expected}, found {actual}")]
    Lifecycle {
        extension: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("extension {extension} is not started (state: {state})")]
    NotStarted {
        extension: String,
        state: &'static str,
    },

    #[error("scheduler is no longer accepting tasks")]
    SchedulerClosed,

    #[error("failed to start scheduler thread: {0}")]
    SchedulerStart(String),

    #[error("unknown addon: {0}")]
    UnknownAddon(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience type alias for Result using GraphHostError
pub type Result<T> = std::result::Result<T, GraphHostError>;

impl GraphHostError {
    /// True for errors a caller caused (bad input, duplicates, limits),
    /// as opposed to failures inside the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::Conflict(_)
                | Self::NotFound(_)
                | Self::CapacityExceeded { .. }
        )
    }
}
