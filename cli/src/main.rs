// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # QNMS Hub CLI
//!
//! The `qnms` binary runs the repair hub and talks to a running one.
//!
//! ## Modes
//!
//! - **Daemon mode**: `qnms --daemon` runs the hub in the foreground
//! - **Client mode**: every subcommand checks `/health` and then calls the HTTP API
//!
//! ## Commands
//!
//! - `qnms daemon status` - Hub health and twin link state
//! - `qnms ingest FILE` - Submit sensor readings
//! - `qnms agent list|show|register` - Swarm agents
//! - `qnms defect list|show|cancel` - Tracked defects
//! - `qnms queue stats` - Command queue statistics
//! - `qnms config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use qnms_core::domain::hub_config::{HubConfig, DEFAULT_API_PORT};
use qnms_hub::commands::{
    self, AgentCommand, ConfigCommand, DaemonCommand, DefectCommand, IngestArgs, QueueCommand,
};
use qnms_hub::daemon;

/// QNMS Hub - coordinate a nanometre defect-repair swarm
#[derive(Parser)]
#[command(name = "qnms")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run the hub in the foreground
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "QNMS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port (default: from config in daemon mode, 8088 otherwise)
    #[arg(long, global = true, env = "QNMS_PORT")]
    port: Option<u16>,

    /// HTTP API host for client commands
    #[arg(long, global = true, env = "QNMS_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "QNMS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text or json)
    #[arg(long, global = true, env = "QNMS_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Hub status
    #[command(name = "daemon")]
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Submit sensor readings
    #[command(name = "ingest")]
    Ingest(IngestArgs),

    /// Swarm agent management
    #[command(name = "agent")]
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Tracked defects
    #[command(name = "defect")]
    Defect {
        #[command(subcommand)]
        command: DefectCommand,
    },

    /// Command queue
    #[command(name = "queue")]
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.daemon {
        let mut config =
            HubConfig::load_or_default(cli.config).context("Failed to load configuration")?;
        if let Some(port) = cli.port {
            config.spec.network.port = port;
        }
        let logging = &mut config.spec.observability.logging;
        if let Some(level) = cli.log_level {
            logging.level = level;
        }
        if let Some(format) = cli.log_format {
            logging.format = format;
        }

        init_logging(&logging.level, &logging.format)?;
        info!("Starting QNMS hub in daemon mode");
        return daemon::start_daemon(config).await;
    }

    init_logging(
        cli.log_level.as_deref().unwrap_or("warn"),
        cli.log_format.as_deref().unwrap_or("text"),
    )?;
    let port = cli.port.unwrap_or(DEFAULT_API_PORT);

    match cli.command {
        Some(Commands::Daemon { command }) => {
            commands::daemon::handle_command(command, &cli.host, port).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Ingest(args)) => commands::ingest::handle_command(args, &cli.host, port).await,
        Some(Commands::Agent { command }) => {
            commands::agent::handle_command(command, &cli.host, port).await
        }
        Some(Commands::Defect { command }) => {
            commands::defect::handle_command(command, &cli.host, port).await
        }
        Some(Commands::Queue { command }) => {
            commands::queue::handle_command(command, &cli.host, port).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
