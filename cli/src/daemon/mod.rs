// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Running the hub in the foreground (`qnms --daemon`)
//! - HTTP health checks against a running hub
//! - The HTTP client used by the CLI commands

use anyhow::Result;
use std::time::Duration;

use crate::hub::HealthReport;

pub mod client;
pub mod server;

pub use client::DaemonClient;
pub use server::{router, start_daemon};

#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running(HealthReport),
    Stopped,
    Unhealthy { error: String },
}

pub fn base_url(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Check whether a hub answers on `host:port`.
pub async fn check_daemon_running(host: &str, port: u16) -> Result<DaemonStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500)) // Fast timeout for local checks
        .build()?;

    let health_url = format!("{}/health", base_url(host, port));

    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<HealthReport>().await {
            Ok(report) => Ok(DaemonStatus::Running(report)),
            Err(e) => Ok(DaemonStatus::Unhealthy {
                error: format!("unreadable health report: {}", e),
            }),
        },
        Ok(resp) => Ok(DaemonStatus::Unhealthy {
            error: format!("HTTP {}", resp.status()),
        }),
        Err(e) if e.is_connect() || e.is_timeout() => Ok(DaemonStatus::Stopped),
        Err(e) => Ok(DaemonStatus::Unhealthy {
            error: e.to_string(),
        }),
    }
}
