//! `labsim` binary: serve the devices listed in a config file.
//!
//! ```text
//! labsim [--log-level LEVEL] [-c CONFIG]   serve until Ctrl-C
//! labsim list-plugins                      print registered device classes
//! ```
//!
//! Exit code is 0 after a graceful shutdown and non-zero if the config
//! cannot be loaded or a transport fails to stop.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use labsim_server::infrastructure::storage::config_file::load_config;
use labsim_server::{Registry, Server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Instrument simulator.
///
/// Exposes simulated lab devices over TCP, UDP and pseudo-terminal serial
/// lines.
#[derive(Debug, Parser)]
#[command(name = "labsim", version)]
struct Cli {
    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, value_enum, default_value_t = LogLevel::Warn, env = "LABSIM_LOG_LEVEL")]
    log_level: LogLevel,

    /// Device list (.yml, .yaml, .toml or .json).
    #[arg(
        short = 'c',
        long,
        default_value = "./sinstruments.yml",
        env = "LABSIM_CONFIG"
    )]
    config_file: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every registered device class as `module.Class`.
    ListPlugins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `RUST_LOG` wins over `--log-level` when set.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.directive())),
        )
        .init();

    let registry = Registry::with_builtin_devices();

    if let Some(Command::ListPlugins) = cli.command {
        for plugin in registry.plugins() {
            println!("{}", plugin.qualified_name());
        }
        return Ok(());
    }

    let config = load_config(&cli.config_file)
        .with_context(|| format!("loading {}", cli.config_file.display()))?;
    info!(
        "loaded {} device(s) from {}",
        config.devices.len(),
        cli.config_file.display()
    );

    let server = Server::from_config(&config, &registry);
    server
        .serve_forever(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received Ctrl-C, shutting down"),
                Err(e) => {
                    error!("failed to listen for Ctrl-C: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .context("stopping the server")?;

    info!("labsim stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
