// src/main.rs
// graph-host - supervises one graph-hosting worker process per channel

mod cli;

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use graph_host::config::{env, HostConfig};
use graph_host::runtime::SharedScheduler;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::INFO)
}

/// Install the subscriber before config is loaded so load-time warnings are
/// kept. The level starts from `GRAPH_HOST_LOG_LEVEL` and is replaced once the
/// config is known.
fn init_logging() -> Result<reload::Handle<LevelFilter, Registry>> {
    let provisional = std::env::var(env::LOG_LEVEL)
        .map(|v| parse_level(&v))
        .unwrap_or(LevelFilter::INFO);
    let (filter, handle) = reload::Layer::new(provisional);
    // stdout carries control responses, so logs go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(handle)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let logging = init_logging()?;
    let config = HostConfig::load(cli.config.as_deref())?;
    logging.reload(parse_level(&config.log_level))?;
    SharedScheduler::init_global(config.scheduler_config());

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::CheckConfig => cli::run_check_config(&config),
        Commands::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let result = runtime.block_on(cli::run_serve(config));
            // A stdin read parked on a blocking thread would otherwise hold shutdown open.
            runtime.shutdown_timeout(Duration::from_secs(1));
            result
        }
    }
}
