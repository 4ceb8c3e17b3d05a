// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use qnms_core::domain::hub_config::HubConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file populated with defaults
    Generate {
        /// Output path (default: ./qnms-config.yaml)
        #[arg(short, long, default_value = "./qnms-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = HubConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. QNMS_CONFIG_PATH: {}",
            std::env::var("QNMS_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./qnms-config.yaml");
        println!("  4. ~/.qnms/config.yaml");
        println!("  5. /etc/qnms/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();
    println!("{}", "Hub:".bold());
    println!("  Name:    {}", config.metadata.name);
    println!(
        "  API:     {}:{}",
        spec.network.bind_address, spec.network.port
    );
    println!();

    println!("{}", "Safety:".bold());
    println!("  Thermal limit:    {} °C", spec.safety.thermal_limit_c);
    println!("  Collision radius: {} nm", spec.safety.collision_radius_nm);
    if spec.safety.no_go_zones.is_empty() {
        println!("  No-go zones:      {}", "(none)".dimmed());
    } else {
        println!("  No-go zones:      {}", spec.safety.no_go_zones.len());
    }
    println!();

    println!("{}", "Coordinator:".bold());
    println!("  Tick interval:     {} ms", spec.coordinator.tick_interval_ms);
    println!(
        "  Agent heartbeat:   {}s (limit {} missed)",
        spec.coordinator.heartbeat_interval_secs, spec.coordinator.missed_heartbeat_limit
    );
    println!("  Command attempts:  {}", spec.coordinator.max_command_attempts);
    println!();

    println!("{}", "Digital twin:".bold());
    println!("  URL:         {}", spec.twin.url);
    println!(
        "  Ack timeout: {} ms x {} retries",
        spec.twin.ack_timeout_ms, spec.twin.ack_retries
    );
    println!();

    println!("{}", "Path planner:".bold());
    println!("  Endpoint: {}", spec.planner.endpoint);
    println!("  Timeout:  {} ms", spec.planner.timeout_ms);
    println!();

    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        spec.observability.logging.level, spec.observability.logging.format
    );
    if spec.observability.metrics.enabled {
        println!("  Metrics: port {}", spec.observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }

    Ok(())
}

fn validate(file: Option<PathBuf>) -> Result<()> {
    let path = match file.or_else(HubConfig::discover_config) {
        Some(path) => path,
        None => {
            println!("{}", "No configuration file found; defaults apply.".yellow());
            return Ok(());
        }
    };

    println!("Validating: {}", path.display());

    let config = HubConfig::from_yaml_file(&path)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config.validate()?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    HubConfig::default().to_yaml_file(&output)?;

    println!(
        "{}",
        format!("✓ Generated configuration: {}", output.display()).green()
    );
    Ok(())
}
