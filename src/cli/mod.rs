//! CLI subcommand definitions and handlers.
//!
//! - `start` (default) -- run the proxy server
//! - `config show|path` -- inspect the effective configuration
//! - `version` -- print version info

use clap::{Parser, Subcommand};

use crate::config;

/// Gadget content sanitizer and MIME-enforcing resource proxy.
#[derive(Parser, Debug)]
#[command(
    name = "gadget-shield",
    version = env!("CARGO_PKG_VERSION"),
    about = "Gadget content sanitizer and MIME-enforcing resource proxy"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version and platform information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration, defaults included, as JSON.
    Show,

    /// Print the config file path.
    Path,
}

/// Run `config show`. Validation issues go to stderr.
pub fn handle_config_show() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    for issue in config::validate_config(&cfg) {
        eprintln!("warning: {}: {}", issue.path, issue.message);
    }
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

pub fn handle_config_path() {
    println!("{}", config::get_config_path().display());
}

pub fn handle_version() {
    println!("gadget-shield {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform: {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}
