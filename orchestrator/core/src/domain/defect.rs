// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Defect Aggregate
//!
//! A [`DefectRecord`] tracks one detected defect from its first valid sensor
//! report to a terminal state. `completed` and `unrepairable` are final: every
//! mutating method refuses to touch a terminal record.
//!
//! ```text
//! detected ─▶ queued ─▶ planning ─▶ repairing ─▶ completed
//!               ▲          │
//!               └─ replan ─┘     (any non-terminal) ─▶ unrepairable
//! ```

use crate::domain::agent::AgentId;
use crate::domain::command::CoordinateCommand;
use crate::domain::coordinate::{CorrelationId, SensorCoordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefectId(pub Uuid);

impl DefectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DefectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DefectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefectStatus {
    Detected,
    Queued,
    Planning,
    Repairing,
    Completed,
    Unrepairable,
}

impl DefectStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DefectStatus::Completed | DefectStatus::Unrepairable)
    }

    fn can_transition_to(&self, next: DefectStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (DefectStatus::Detected, DefectStatus::Queued)
                | (DefectStatus::Queued, DefectStatus::Planning)
                | (DefectStatus::Planning, DefectStatus::Queued)
                | (DefectStatus::Planning, DefectStatus::Repairing)
                | (DefectStatus::Repairing, DefectStatus::Completed)
                | (_, DefectStatus::Unrepairable)
        )
    }
}

impl fmt::Display for DefectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DefectStatus::Detected => "detected",
            DefectStatus::Queued => "queued",
            DefectStatus::Planning => "planning",
            DefectStatus::Repairing => "repairing",
            DefectStatus::Completed => "completed",
            DefectStatus::Unrepairable => "unrepairable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefectError {
    #[error("defect {id} is {status} and can no longer change")]
    Terminal { id: DefectId, status: DefectStatus },

    #[error("defect {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: DefectId,
        from: DefectStatus,
        to: DefectStatus,
    },

    #[error("repair path for defect {0} has no commands")]
    EmptyPath(DefectId),
}

/// Ordered commands repairing one defect.
///
/// # Invariants
///
/// - `safety_validated` is only ever `true` for a non-empty command sequence.
/// - Every command carries the path's `correlation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairPath {
    pub defect_id: DefectId,
    pub commands: Vec<CoordinateCommand>,
    /// Sum of the hops between consecutive targets (nm).
    pub total_distance: f64,
    pub estimated_time_ms: u64,
    pub priority: u8,
    pub safety_validated: bool,
    pub correlation_id: CorrelationId,
}

impl RepairPath {
    pub fn new(
        defect_id: DefectId,
        commands: Vec<CoordinateCommand>,
        priority: u8,
        correlation_id: CorrelationId,
    ) -> Self {
        let total_distance = commands
            .windows(2)
            .map(|pair| pair[0].target.distance_to(&pair[1].target))
            .sum();
        let estimated_time_ms = commands.iter().map(|c| c.estimated_duration_ms).sum();
        Self {
            defect_id,
            commands,
            total_distance,
            estimated_time_ms,
            priority,
            safety_validated: false,
            correlation_id,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn mark_validated(&mut self) -> Result<(), DefectError> {
        if self.commands.is_empty() {
            return Err(DefectError::EmptyPath(self.defect_id));
        }
        self.safety_validated = true;
        Ok(())
    }
}

/// Lifecycle record of one defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectRecord {
    pub defect_id: DefectId,
    pub coordinates: SensorCoordinate,
    pub detection_time: DateTime<Utc>,
    pub status: DefectStatus,
    pub assigned_agents: BTreeSet<AgentId>,
    pub repair_path: Option<RepairPath>,
    pub completion_time: Option<DateTime<Utc>>,
    pub correlation_id: CorrelationId,
    /// Path steps handed to the command queue so far.
    pub released_steps: usize,
    pub planning_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl DefectRecord {
    /// Create the record for a freshly validated sensor coordinate.
    pub fn detect(coordinates: SensorCoordinate) -> Self {
        let correlation_id = coordinates.correlation_id.clone();
        Self {
            defect_id: DefectId::new(),
            coordinates,
            detection_time: Utc::now(),
            status: DefectStatus::Detected,
            assigned_agents: BTreeSet::new(),
            repair_path: None,
            completion_time: None,
            correlation_id,
            released_steps: 0,
            planning_attempts: 0,
            failure_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_mutable(&self) -> Result<(), DefectError> {
        if self.is_terminal() {
            return Err(DefectError::Terminal {
                id: self.defect_id,
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn transition(&mut self, next: DefectStatus) -> Result<(), DefectError> {
        self.ensure_mutable()?;
        if !self.status.can_transition_to(next) {
            return Err(DefectError::InvalidTransition {
                id: self.defect_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == DefectStatus::Completed {
            self.completion_time = Some(Utc::now());
        }
        Ok(())
    }

    pub fn mark_unrepairable(&mut self, reason: impl Into<String>) -> Result<(), DefectError> {
        self.transition(DefectStatus::Unrepairable)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn assign_agent(&mut self, agent_id: AgentId) -> Result<(), DefectError> {
        self.ensure_mutable()?;
        self.assigned_agents.insert(agent_id);
        Ok(())
    }

    /// Store a validated path. Only legal while planning.
    pub fn attach_path(&mut self, path: RepairPath) -> Result<(), DefectError> {
        self.ensure_mutable()?;
        if !path.safety_validated || path.is_empty() {
            return Err(DefectError::EmptyPath(self.defect_id));
        }
        self.transition(DefectStatus::Repairing)?;
        self.repair_path = Some(path);
        self.released_steps = 0;
        Ok(())
    }
}
