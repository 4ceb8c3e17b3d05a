// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hub status command

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::daemon::{check_daemon_running, DaemonStatus};
use qnms_core::infrastructure::twin::LinkState;

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Check hub status
    Status,
}

pub async fn handle_command(command: DaemonCommand, host: &str, port: u16) -> Result<()> {
    match command {
        DaemonCommand::Status => status(host, port).await,
    }
}

async fn status(host: &str, port: u16) -> Result<()> {
    match check_daemon_running(host, port).await? {
        DaemonStatus::Running(report) => {
            let headline = format!("✓ Hub {} on {}:{}", report.status, host, port);
            if report.status == "healthy" {
                println!("{}", headline.green());
            } else {
                println!("{}", headline.yellow());
            }
            println!("  Uptime:      {}s", report.uptime_seconds);
            println!("  Agents:      {}", report.agents);
            println!("  Queue depth: {}", report.queue_depth);
            match report.twin {
                Some(link) => {
                    let state = match link.state {
                        LinkState::Connected => link.state.to_string().green(),
                        _ => link.state.to_string().red(),
                    };
                    println!("  Twin link:   {} (buffered: {})", state, link.buffered);
                }
                None => println!("  Twin link:   {}", "(not configured)".dimmed()),
            }
        }
        DaemonStatus::Stopped => {
            println!("{}", "✗ Hub not running".red());
        }
        DaemonStatus::Unhealthy { error } => {
            println!("{}", format!("⚠ Hub unhealthy: {}", error).yellow());
        }
    }

    Ok(())
}
