// src/config/env.rs
// Environment overrides - every GRAPH_HOST_* variable is read here

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, warn};

use super::file::HostConfig;

pub const MAX_WORKERS: &str = "GRAPH_HOST_MAX_WORKERS";
pub const PORT_MIN: &str = "GRAPH_HOST_PORT_MIN";
pub const PORT_MAX: &str = "GRAPH_HOST_PORT_MAX";
pub const WORKER_TIMEOUT: &str = "GRAPH_HOST_WORKER_TIMEOUT";
pub const SWEEP_INTERVAL_SECS: &str = "GRAPH_HOST_SWEEP_INTERVAL_SECS";
pub const WORKER_BIN: &str = "GRAPH_HOST_WORKER_BIN";
pub const LOG_DIR: &str = "GRAPH_HOST_LOG_DIR";
pub const PROPERTY_DIR: &str = "GRAPH_HOST_PROPERTY_DIR";
pub const DRAIN_GRACE_MS: &str = "GRAPH_HOST_DRAIN_GRACE_MS";
pub const LOG_LEVEL: &str = "GRAPH_HOST_LOG_LEVEL";

/// Non-empty trimmed value of `name`
fn read<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<F, T>(lookup: &F, name: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = read(lookup, name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Apply `GRAPH_HOST_*` overrides. `lookup` is `std::env::var` outside tests.
pub fn apply_overrides<F>(config: &mut HostConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let sup = &mut config.supervisor;
    let mut applied = Vec::new();

    if let Some(v) = parse(&lookup, MAX_WORKERS) {
        sup.max_workers = v;
        applied.push(MAX_WORKERS);
    }
    if let Some(v) = parse(&lookup, PORT_MIN) {
        sup.port_min = v;
        applied.push(PORT_MIN);
    }
    if let Some(v) = parse(&lookup, PORT_MAX) {
        sup.port_max = v;
        applied.push(PORT_MAX);
    }
    if let Some(v) = parse(&lookup, WORKER_TIMEOUT) {
        sup.default_timeout_secs = v;
        applied.push(WORKER_TIMEOUT);
    }
    if let Some(v) = parse(&lookup, SWEEP_INTERVAL_SECS) {
        sup.sweep_interval_secs = v;
        applied.push(SWEEP_INTERVAL_SECS);
    }
    if let Some(v) = read(&lookup, WORKER_BIN) {
        sup.worker_bin = v;
        applied.push(WORKER_BIN);
    }
    if let Some(v) = read(&lookup, LOG_DIR) {
        sup.log_dir = PathBuf::from(v);
        applied.push(LOG_DIR);
    }
    if let Some(v) = read(&lookup, PROPERTY_DIR) {
        sup.property_dir = PathBuf::from(v);
        applied.push(PROPERTY_DIR);
    }
    if let Some(v) = parse(&lookup, DRAIN_GRACE_MS) {
        config.runtime.drain_grace_ms = v;
        applied.push(DRAIN_GRACE_MS);
    }
    if let Some(v) = read(&lookup, LOG_LEVEL) {
        config.log_level = v;
        applied.push(LOG_LEVEL);
    }

    if !applied.is_empty() {
        debug!(vars = ?applied, "Applied environment overrides");
    }
}
