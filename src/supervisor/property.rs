//! Per-worker property files
//!
//! The supervisor hands each worker a path to a generated property file. What
//! goes inside belongs to the graph layer; the supervisor never reads it back.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::types::StartRequest;
use crate::error::{GraphHostError, Result};

/// Turns a start request into a file the worker process can load
#[async_trait]
pub trait PropertyWriter: Send + Sync {
    async fn materialize(&self, request: &StartRequest, control_port: u16) -> Result<PathBuf>;
}

#[derive(Serialize)]
struct PropertyFile<'a> {
    graph_name: &'a str,
    channel_name: &'a str,
    control_port: u16,
    properties: &'a serde_json::Value,
}

/// Writes `property-{channel}-{unix_nanos}.json` under a directory
#[derive(Debug, Clone)]
pub struct JsonPropertyWriter {
    dir: PathBuf,
}

impl JsonPropertyWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl PropertyWriter for JsonPropertyWriter {
    async fn materialize(&self, request: &StartRequest, control_port: u16) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            GraphHostError::Property(format!("cannot create {}: {e}", self.dir.display()))
        })?;

        let path = self.dir.join(format!(
            "property-{}-{}.json",
            request.channel_name,
            unix_nanos()
        ));
        let file = PropertyFile {
            graph_name: &request.graph_name,
            channel_name: &request.channel_name,
            control_port,
            properties: &request.properties,
        };
        let body = serde_json::to_vec_pretty(&file)?;

        tokio::fs::write(&path, body).await.map_err(|e| {
            GraphHostError::Property(format!("cannot write {}: {e}", path.display()))
        })?;

        debug!(channel = %request.channel_name, path = %path.display(), "Wrote property file");
        Ok(path)
    }
}

pub(crate) fn unix_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
