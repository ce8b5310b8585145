// src/runtime/lifecycle.rs
// Extension lifecycle states and the transitions between them

use serde::{Deserialize, Serialize};

/// Where an extension is in its lifecycle. Transitions are strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Initialized,
    Started,
    Stopped,
    Deinitialized,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Deinitialized => "deinitialized",
        }
    }

    pub fn accepts_messages(&self) -> bool {
        matches!(self, Self::Started)
    }
}

/// One host lifecycle call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Configure,
    Init,
    Start,
    Stop,
    Deinit,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Deinit => "deinit",
        }
    }

    /// Reported in place of a state while this stage's handler is running
    pub fn in_progress(&self) -> &'static str {
        match self {
            Self::Configure => "configuring",
            Self::Init => "initializing",
            Self::Start => "starting",
            Self::Stop => "stopping",
            Self::Deinit => "deinitializing",
        }
    }

    /// State the extension must have reached before this stage may run
    pub fn requires(&self) -> LifecycleState {
        match self {
            Self::Configure => LifecycleState::Unconfigured,
            Self::Init => LifecycleState::Configured,
            Self::Start => LifecycleState::Initialized,
            Self::Stop => LifecycleState::Started,
            Self::Deinit => LifecycleState::Stopped,
        }
    }

    /// State entered once this stage's handler has completed
    pub fn completes(&self) -> LifecycleState {
        match self {
            Self::Configure => LifecycleState::Configured,
            Self::Init => LifecycleState::Initialized,
            Self::Start => LifecycleState::Started,
            Self::Stop => LifecycleState::Stopped,
            Self::Deinit => LifecycleState::Deinitialized,
        }
    }
}
