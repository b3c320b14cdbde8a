//! Resolved configuration view, `masdash config`.

use std::path::Path;

use anyhow::{Context, Result};

use masdash::config::DashConfig;

/// `path` is the file resolution read from, if any.
pub fn cmd_config(config: &DashConfig, path: Option<&Path>) -> Result<()> {
    println!();
    println!("{}", console::style("masdash configuration").bold().cyan());
    println!();
    match path {
        Some(path) if path.exists() => println!("Config file: {}", path.display()),
        Some(path) => println!("Config file: {} (not found, using defaults)", path.display()),
        None => println!("Config file: none"),
    }
    println!("Realtime URL: {}", config.realtime_url());
    println!(
        "Token: {}",
        if config.token.is_some() {
            console::style("set").green()
        } else {
            console::style("not set").yellow()
        }
    );
    println!();

    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}
