// src/cli/check.rs
// Print the configuration after file, defaults and environment are merged

use anyhow::Result;
use graph_host::config::HostConfig;

pub fn run_check_config(config: &HostConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config)?;
    println!("{rendered}");
    Ok(())
}
