// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use uuid::Uuid;

use qnms_core::domain::defect::{DefectId, DefectStatus};

use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum DefectCommand {
    /// List tracked defects
    List,

    /// Show one defect as JSON
    Show {
        #[arg(value_name = "DEFECT_ID")]
        defect_id: Uuid,
    },

    /// Withdraw a defect and drop its outstanding commands
    Cancel {
        #[arg(value_name = "DEFECT_ID")]
        defect_id: Uuid,

        #[arg(long)]
        reason: Option<String>,
    },
}

pub async fn handle_command(command: DefectCommand, host: &str, port: u16) -> Result<()> {
    let Some(client) = super::require_daemon(host, port).await? else {
        return Ok(());
    };

    match command {
        DefectCommand::List => list_defects(client).await,
        DefectCommand::Show { defect_id } => {
            let defect = client.get_defect(DefectId(defect_id)).await?;
            println!("{}", serde_json::to_string_pretty(&defect)?);
            Ok(())
        }
        DefectCommand::Cancel { defect_id, reason } => {
            let withdrawal = client.cancel_defect(DefectId(defect_id), reason).await?;
            println!(
                "{}",
                format!("✓ Defect {} cancelled", withdrawal.defect.defect_id).green()
            );
            println!("  Commands dropped: {}", withdrawal.dropped_commands);
            if !withdrawal.released_agents.is_empty() {
                let agents: Vec<String> = withdrawal
                    .released_agents
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                println!("  Agents released:  {}", agents.join(", "));
            }
            Ok(())
        }
    }
}

async fn list_defects(client: DaemonClient) -> Result<()> {
    let defects = client.list_defects().await?;

    if defects.is_empty() {
        println!("{}", "No defects tracked".yellow());
        return Ok(());
    }

    println!("{} defects:", defects.len());
    println!(
        "{:<38} {:<14} {:<10} {:<4} {}",
        "ID", "STATUS", "TYPE", "SEV", "DETECTED"
    );
    for defect in defects {
        let status = format!("{:<14}", defect.status.to_string());
        let status = match defect.status {
            DefectStatus::Completed => status.green(),
            DefectStatus::Unrepairable => status.red(),
            _ => status.normal(),
        };
        println!(
            "{:<38} {} {:<10} {:<4} {}",
            defect.defect_id,
            status,
            defect.coordinates.defect_type.to_string(),
            defect.coordinates.severity,
            defect.detection_time.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}
