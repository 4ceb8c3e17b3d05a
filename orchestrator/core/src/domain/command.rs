// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordinate Commands
//!
//! A [`CoordinateCommand`] is one motion/action step for one agent. It is owned
//! by the command queue until assigned, then by the swarm coordinator.
//!
//! ## Status state machine
//!
//! ```text
//! pending ──▶ in_progress ──▶ completed
//!    ▲             │
//!    └── release ──┤
//!                  └────────▶ failed
//! ```
//!
//! A failed command is never revived; the coordinator re-issues it as a new
//! instance (new [`CommandId`], same [`CorrelationId`]) via
//! [`CoordinateCommand::reissue`].

use crate::domain::agent::AgentId;
use crate::domain::coordinate::{CorrelationId, Position};
use crate::domain::defect::DefectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default execution estimate for a step when the planner gives none.
pub const DEFAULT_STEP_DURATION_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Move,
    Repair,
    Scan,
}

impl ActionType {
    pub const ALL: [ActionType; 3] = [ActionType::Move, ActionType::Repair, ActionType::Scan];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Move => "move",
            ActionType::Repair => "repair",
            ActionType::Scan => "scan",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl CommandStatus {
    /// Pending or in progress: still occupies its target for deduplication.
    pub fn is_active(&self) -> bool {
        matches!(self, CommandStatus::Pending | CommandStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::Pending, CommandStatus::InProgress)
                | (CommandStatus::InProgress, CommandStatus::Pending)
                | (CommandStatus::InProgress, CommandStatus::Completed)
                | (CommandStatus::InProgress, CommandStatus::Failed)
                | (CommandStatus::Pending, CommandStatus::Failed)
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::InProgress => "in_progress",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("command {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: CommandId,
        from: CommandStatus,
        to: CommandStatus,
    },
}

/// One step of a repair path, addressed to a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateCommand {
    pub id: CommandId,
    pub defect_id: DefectId,
    /// Set when the coordinator hands the command to an agent.
    pub agent_id: Option<AgentId>,
    pub target: Position,
    pub action_type: ActionType,
    /// Degrees Celsius the step may add to the die.
    pub thermal_budget: f64,
    pub estimated_duration_ms: u64,
    /// Severity of the originating defect; primary queue ordering key.
    pub severity: u8,
    /// Index of this step inside its repair path.
    pub step: usize,
    /// 1 for the first instance, incremented on every re-issue.
    pub attempt: u32,
    pub correlation_id: CorrelationId,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
}

impl CoordinateCommand {
    pub fn new(
        defect_id: DefectId,
        target: Position,
        action_type: ActionType,
        thermal_budget: f64,
        severity: u8,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            id: CommandId::new(),
            defect_id,
            agent_id: None,
            target,
            action_type,
            thermal_budget,
            estimated_duration_ms: DEFAULT_STEP_DURATION_MS,
            severity,
            step: 0,
            attempt: 1,
            correlation_id,
            status: CommandStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.estimated_duration_ms = duration_ms;
        self
    }

    pub fn transition(&mut self, next: CommandStatus) -> Result<(), CommandError> {
        if !self.status.can_transition_to(next) {
            return Err(CommandError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// A fresh pending instance of this command for reassignment.
    pub fn reissue(&self) -> Self {
        Self {
            id: CommandId::new(),
            agent_id: None,
            attempt: self.attempt.saturating_add(1),
            status: CommandStatus::Pending,
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Acknowledgment states reported by the twin for a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Received,
    Processing,
    Completed,
    Failed,
}

/// An acknowledgment addressed to a specific command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAck {
    pub command_id: CommandId,
    pub status: AckStatus,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("command channel closed")]
    Closed,

    #[error("failed to encode command {0}: {1}")]
    Encode(CommandId, String),
}

/// Hand-off point between the coordinator and the transport.
///
/// Implementations must not block on network I/O: the coordinator calls this
/// from its assignment pass.
pub trait CommandDispatcher: Send + Sync {
    fn dispatch(&self, command: &CoordinateCommand) -> Result<(), DispatchError>;

    /// Stop delivering a command that was dispatched but is no longer wanted
    /// (failed, re-issued or withdrawn). Nothing happens if it already went out
    /// and was acknowledged.
    fn retract(&self, _command_id: CommandId) {}
}
