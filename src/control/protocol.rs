// src/control/protocol.rs
// NDJSON protocol types for the supervisor control surface

use serde::{Deserialize, Serialize};

use crate::error::GraphHostError;

/// Control request, one per line.
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlRequest {
    /// "start", "stop", "ping" or "list"
    pub op: String,
    /// Echoed back for correlation
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Outcome class, so an HTTP layer can pick a response code without parsing
/// error text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Ok,
    Validation,
    Conflict,
    NotFound,
    Capacity,
    LaunchFailed,
    Internal,
}

impl ControlStatus {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Capacity => 503,
            Self::LaunchFailed => 500,
            Self::Internal => 500,
        }
    }
}

impl From<&GraphHostError> for ControlStatus {
    fn from(err: &GraphHostError) -> Self {
        match err {
            GraphHostError::InvalidRequest(_) => Self::Validation,
            GraphHostError::Conflict(_) => Self::Conflict,
            GraphHostError::NotFound(_) => Self::NotFound,
            GraphHostError::CapacityExceeded { .. } => Self::Capacity,
            GraphHostError::Launch(_) | GraphHostError::Property(_) => Self::LaunchFailed,
            _ => Self::Internal,
        }
    }
}

/// Control response, one per request line.
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: String,
    pub ok: bool,
    pub status: ControlStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn success(id: String, result: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            status: ControlStatus::Ok,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: String, status: ControlStatus, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            status,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn from_error(id: String, err: &GraphHostError) -> Self {
        Self::failure(id, ControlStatus::from(err), err.to_string())
    }
}
