// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the QNMS CLI

pub mod agent;
pub mod config;
pub mod daemon;
pub mod defect;
pub mod ingest;
pub mod queue;

pub use self::agent::AgentCommand;
pub use self::config::ConfigCommand;
pub use self::daemon::DaemonCommand;
pub use self::defect::DefectCommand;
pub use self::ingest::IngestArgs;
pub use self::queue::QueueCommand;

use anyhow::Result;
use colored::Colorize;

use crate::daemon::{check_daemon_running, DaemonClient, DaemonStatus};

/// Every command except `config` talks to a running hub.
pub(crate) async fn require_daemon(host: &str, port: u16) -> Result<Option<DaemonClient>> {
    match check_daemon_running(host, port).await? {
        DaemonStatus::Running(_) => Ok(Some(DaemonClient::new(host, port)?)),
        DaemonStatus::Unhealthy { error } => {
            println!(
                "{}",
                format!("⚠ Hub at {}:{} is unhealthy: {}", host, port, error).yellow()
            );
            println!("Run 'qnms daemon status' for more info.");
            Ok(None)
        }
        DaemonStatus::Stopped => {
            println!(
                "{}",
                format!("No hub is listening on {}:{}.", host, port).red()
            );
            println!("Start one with 'qnms --daemon'.");
            Ok(None)
        }
    }
}
