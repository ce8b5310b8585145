// src/config/mod.rs
// Configuration: TOML file plus GRAPH_HOST_* environment overrides

pub mod env;
pub mod file;

pub use env::apply_overrides;
pub use file::{HostConfig, RuntimeConfig};
