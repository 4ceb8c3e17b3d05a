// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Agents
//!
//! Agent identity and state as seen by the hub. The records themselves are
//! owned by the swarm coordinator; other subsystems only see snapshots through
//! [`FleetView`].

use crate::domain::command::{ActionType, CoordinateCommand};
use crate::domain::coordinate::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Agent name as announced by the twin (e.g. `"nano-07"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Moving,
    Repairing,
    Error,
}

impl AgentStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, AgentStatus::Moving | AgentStatus::Repairing)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Moving => "moving",
            AgentStatus::Repairing => "repairing",
            AgentStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Actions an agent is able to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub actions: BTreeSet<ActionType>,
}

impl AgentCapabilities {
    pub fn all() -> Self {
        Self {
            actions: ActionType::ALL.into_iter().collect(),
        }
    }

    pub fn only(actions: impl IntoIterator<Item = ActionType>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
        }
    }

    pub fn supports(&self, action: ActionType) -> bool {
        self.actions.contains(&action)
    }
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

/// Per-agent record, exclusively owned by the swarm coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmAgentState {
    pub agent_id: AgentId,
    pub current_position: Position,
    pub status: AgentStatus,
    pub current_command: Option<CoordinateCommand>,
    /// Last reported die temperature near the agent (°C).
    pub thermal_state: f64,
    pub last_update: DateTime<Utc>,
    pub capabilities: AgentCapabilities,
}

impl SwarmAgentState {
    pub fn new(agent_id: AgentId, position: Position, capabilities: AgentCapabilities) -> Self {
        Self {
            agent_id,
            current_position: position,
            status: AgentStatus::Idle,
            current_command: None,
            thermal_state: 0.0,
            last_update: Utc::now(),
            capabilities,
        }
    }

    /// Target of the command the agent is executing, if any.
    pub fn current_target(&self) -> Option<Position> {
        self.current_command.as_ref().map(|c| c.target)
    }
}

/// Where a live agent is and where it is headed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAgent {
    pub agent_id: AgentId,
    pub position: Position,
    pub target: Option<Position>,
}

impl ActiveAgent {
    /// Every position the agent occupies or is about to occupy.
    pub fn claimed_positions(&self) -> impl Iterator<Item = Position> + '_ {
        std::iter::once(self.position).chain(self.target)
    }
}

/// Read-only snapshot of the fleet for planning and validation.
pub trait FleetView: Send + Sync {
    /// Agents not in the `error` state.
    fn active_agents(&self) -> Vec<ActiveAgent>;
}
