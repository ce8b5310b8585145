// src/cli/mod.rs
// CLI module for graph-host commands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod check;
pub mod serve;

pub use check::run_check_config;
pub use serve::run_serve;

#[derive(Parser)]
#[command(name = "graph-host")]
#[command(about = "Extension runtime host and session worker supervisor")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ~/.graph-host/config.toml)
    #[arg(short, long, global = true, env = "GRAPH_HOST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Supervise workers, reading NDJSON control requests from stdin (default)
    Serve,

    /// Print the effective configuration and exit
    CheckConfig,
}
