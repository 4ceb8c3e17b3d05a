// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use qnms_core::domain::agent::{AgentCapabilities, AgentId, AgentStatus, SwarmAgentState};
use qnms_core::domain::command::ActionType;
use qnms_core::domain::coordinate::Position;

use crate::daemon::server::RegisterAgentRequest;
use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum AgentCommand {
    /// List registered agents
    List,

    /// Show one agent as JSON
    Show {
        #[arg(value_name = "AGENT_ID")]
        agent_id: String,
    },

    /// Register an agent, or reset one that is in error
    Register {
        #[arg(value_name = "AGENT_ID")]
        agent_id: String,

        #[arg(long)]
        x: f64,

        #[arg(long)]
        y: f64,

        #[arg(long)]
        z: f64,

        /// Restrict the agent to these actions (repeatable; default: all)
        #[arg(long = "capability", value_name = "ACTION", value_parser = parse_action)]
        capabilities: Vec<ActionType>,
    },
}

pub async fn handle_command(command: AgentCommand, host: &str, port: u16) -> Result<()> {
    let Some(client) = super::require_daemon(host, port).await? else {
        return Ok(());
    };

    match command {
        AgentCommand::List => list_agents(client).await,
        AgentCommand::Show { agent_id } => show_agent(agent_id, client).await,
        AgentCommand::Register {
            agent_id,
            x,
            y,
            z,
            capabilities,
        } => register_agent(agent_id, Position::new(x, y, z), capabilities, client).await,
    }
}

fn parse_action(value: &str) -> Result<ActionType, String> {
    ActionType::ALL
        .into_iter()
        .find(|action| action.as_str().eq_ignore_ascii_case(value))
        .ok_or_else(|| format!("unknown action '{}' (expected move, repair or scan)", value))
}

async fn list_agents(client: DaemonClient) -> Result<()> {
    let agents = client.list_agents().await?;

    if agents.is_empty() {
        println!("{}", "No agents registered".yellow());
        return Ok(());
    }

    println!("{} agents registered:", agents.len());
    println!(
        "{:<16} {:<10} {:<28} {:<8} {}",
        "ID", "STATUS", "POSITION", "TEMP", "LAST UPDATE"
    );

    for agent in agents {
        println!(
            "{:<16} {:<10} {:<28} {:<8.1} {}",
            agent.agent_id.to_string().bold(),
            colored_status(agent.status),
            agent.current_position.to_string(),
            agent.thermal_state,
            agent.last_update.format("%H:%M:%S")
        );
    }

    Ok(())
}

async fn show_agent(agent_id: String, client: DaemonClient) -> Result<()> {
    let agent = client.get_agent(&agent_id).await?;
    println!("{}", serde_json::to_string_pretty(&agent)?);
    Ok(())
}

async fn register_agent(
    agent_id: String,
    position: Position,
    capabilities: Vec<ActionType>,
    client: DaemonClient,
) -> Result<()> {
    let capabilities = if capabilities.is_empty() {
        AgentCapabilities::all()
    } else {
        AgentCapabilities::only(capabilities)
    };
    let request = RegisterAgentRequest {
        agent_id: AgentId::new(agent_id),
        position,
        capabilities,
    };

    let agent: SwarmAgentState = client.register_agent(&request).await?;
    println!(
        "{}",
        format!(
            "✓ Agent {} registered at {} ({})",
            agent.agent_id, agent.current_position, agent.status
        )
        .green()
    );
    Ok(())
}

fn colored_status(status: AgentStatus) -> colored::ColoredString {
    let text = format!("{:<10}", status.to_string());
    match status {
        AgentStatus::Idle => text.green(),
        AgentStatus::Moving | AgentStatus::Repairing => text.cyan(),
        AgentStatus::Error => text.red(),
    }
}
