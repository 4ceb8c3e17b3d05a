// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

#[derive(Subcommand)]
pub enum QueueCommand {
    /// Show command queue statistics
    Stats,
}

pub async fn handle_command(command: QueueCommand, host: &str, port: u16) -> Result<()> {
    let Some(client) = super::require_daemon(host, port).await? else {
        return Ok(());
    };

    match command {
        QueueCommand::Stats => {
            let stats = client.queue_stats().await?;
            println!("{}", "Command queue:".bold());
            println!("  Pending:     {}", stats.size);
            println!("  In progress: {}", stats.in_progress);
            println!("  Enqueued:    {}", stats.enqueued_total);
            println!("  Dispatched:  {}", stats.dispatched_total);
            println!("  Completed:   {}", stats.completed_total.to_string().green());
            println!("  Failed:      {}", stats.failed_total.to_string().red());
            println!("  Duplicates:  {}", stats.duplicates_rejected);
            println!("  Throughput:  {:.2}/s", stats.throughput);
            Ok(())
        }
    }
}
