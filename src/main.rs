use clap::Parser;
use tracing::{info, warn};

use gadget_shield::cli::{self, Cli, Command, ConfigCommand};
use gadget_shield::config::{self, AppConfig};
use gadget_shield::logging::{self, LogConfig};
use gadget_shield::server::{run_server_with_config, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Start) => run_server().await,

        Some(Command::Config(sub)) => {
            match sub {
                ConfigCommand::Show => cli::handle_config_show()?,
                ConfigCommand::Path => cli::handle_config_path(),
            }
            Ok(())
        }

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let raw = config::load_config()?;
    let app_config = AppConfig::from_value(&raw)?;
    logging::init_logging(LogConfig::from_section(&app_config.logging))?;

    for issue in config::validate_config(&raw) {
        warn!(target: "config", "config warning at {}: {}", issue.path, issue.message);
    }

    info!("gadget-shield v{}", env!("CARGO_PKG_VERSION"));
    info!(target: "config", "config path: {}", config::get_config_path().display());
    if app_config.proxy.allow_private_networks {
        warn!(target: "proxy", "private network targets are allowed");
    }

    let handle = run_server_with_config(ServerConfig::from_app_config(&app_config)?).await?;

    let reason = await_shutdown_trigger().await;
    info!("shutdown signal received ({reason})");
    handle.shutdown().await;
    info!("shut down");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!("failed to install SIGTERM handler: {e}; waiting for Ctrl+C only");
            wait_for_ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            warn!("failed to listen for Ctrl+C: {e}; shutting down");
            "signal-error"
        }
    }
}
