// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Registry
//!
//! In-memory table of [`SwarmAgentState`] records plus the round-robin cursor
//! used by the assignment pass. Pure data: the coordinator wraps it in a lock
//! and never calls out while holding it.
//!
//! ## Agent state machine
//!
//! ```text
//! idle ──assign──▶ moving ──processing──▶ repairing
//!  ▲                  │                       │
//!  └── completed / failed ◀───────────────────┘
//!
//! (any) ──heartbeat timeout──▶ error ──re-register──▶ idle
//! ```

use chrono::{DateTime, Duration, Utc};
use qnms_core::domain::agent::{ActiveAgent, AgentCapabilities, AgentId, AgentStatus, SwarmAgentState};
use qnms_core::domain::command::{CommandId, CoordinateCommand};
use qnms_core::domain::coordinate::Position;
use qnms_core::domain::defect::DefectId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("agent '{0}' is not registered")]
    UnknownAgent(AgentId),

    #[error("agent '{0}' is in the error state; re-register it first")]
    AgentInError(AgentId),

    #[error("agent '{agent_id}' is not executing command {command_id}")]
    NotAssigned {
        agent_id: AgentId,
        command_id: CommandId,
    },

    #[error("agent '{0}' is not idle")]
    NotIdle(AgentId),
}

/// Result of [`AgentRegistry::register`].
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub state: SwarmAgentState,
    /// The agent was in the `error` state and is back in service.
    pub recovered: bool,
    /// Command the agent was executing when it re-registered.
    pub displaced: Option<CoordinateCommand>,
}

/// Telemetry carried by a twin status message; doubles as a heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermal_state: Option<f64>,
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, SwarmAgentState>,
    /// Registration order; the round-robin ring.
    ring: Vec<AgentId>,
    cursor: usize,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, id: &AgentId) -> Option<&SwarmAgentState> {
        self.agents.get(id)
    }

    /// All agents in registration order.
    pub fn all(&self) -> Vec<SwarmAgentState> {
        self.ring
            .iter()
            .filter_map(|id| self.agents.get(id))
            .cloned()
            .collect()
    }

    /// Add an agent, or bring a known one back to `idle` at `position`.
    pub fn register(
        &mut self,
        agent_id: AgentId,
        position: Position,
        capabilities: AgentCapabilities,
        now: DateTime<Utc>,
    ) -> Registration {
        match self.agents.get_mut(&agent_id) {
            Some(state) => {
                let recovered = state.status == AgentStatus::Error;
                let displaced = state.current_command.take();
                state.status = AgentStatus::Idle;
                state.current_position = position;
                state.capabilities = capabilities;
                state.last_update = now;
                Registration {
                    state: state.clone(),
                    recovered,
                    displaced,
                }
            }
            None => {
                let mut state = SwarmAgentState::new(agent_id.clone(), position, capabilities);
                state.last_update = now;
                self.agents.insert(agent_id.clone(), state.clone());
                self.ring.push(agent_id);
                Registration {
                    state,
                    recovered: false,
                    displaced: None,
                }
            }
        }
    }

    /// Idle agents in round-robin order starting at the cursor, which then
    /// moves one place so the next pass starts with a different agent.
    pub fn idle_round_robin(&mut self) -> Vec<(AgentId, AgentCapabilities)> {
        let n = self.ring.len();
        if n == 0 {
            return Vec::new();
        }
        let start = self.cursor % n;
        self.cursor = (start + 1) % n;
        (0..n)
            .map(|i| &self.ring[(start + i) % n])
            .filter_map(|id| self.agents.get(id))
            .filter(|a| a.status == AgentStatus::Idle)
            .map(|a| (a.agent_id.clone(), a.capabilities.clone()))
            .collect()
    }

    /// Targets of every command currently being executed.
    pub fn active_targets(&self) -> Vec<Position> {
        self.agents
            .values()
            .filter_map(SwarmAgentState::current_target)
            .collect()
    }

    /// Where every registered agent currently is, busy or not. An agent in
    /// `error` is taken to be where it last reported.
    pub fn occupied_positions(&self) -> Vec<(AgentId, Position)> {
        self.ring
            .iter()
            .filter_map(|id| self.agents.get(id))
            .map(|a| (a.agent_id.clone(), a.current_position))
            .collect()
    }

    /// Agents not in the `error` state.
    pub fn active_agents(&self) -> Vec<ActiveAgent> {
        self.all()
            .into_iter()
            .filter(|a| a.status != AgentStatus::Error)
            .map(|a| ActiveAgent {
                target: a.current_target(),
                agent_id: a.agent_id,
                position: a.current_position,
            })
            .collect()
    }

    /// Agent executing `command_id`, if any.
    pub fn agent_for_command(&self, command_id: CommandId) -> Option<AgentId> {
        self.agents
            .values()
            .find(|a| a.current_command.as_ref().is_some_and(|c| c.id == command_id))
            .map(|a| a.agent_id.clone())
    }

    /// `idle → moving` with `command`.
    pub fn assign(&mut self, agent_id: &AgentId, command: CoordinateCommand, now: DateTime<Utc>) -> Result<(), RegistryError> {
        let state = self.live_mut(agent_id)?;
        if state.status != AgentStatus::Idle {
            return Err(RegistryError::NotIdle(agent_id.clone()));
        }
        state.status = AgentStatus::Moving;
        state.current_command = Some(command);
        state.last_update = now;
        Ok(())
    }

    /// Refresh liveness without changing state.
    pub fn touch(&mut self, agent_id: &AgentId, now: DateTime<Utc>) -> Result<(), RegistryError> {
        self.live_mut(agent_id)?.last_update = now;
        Ok(())
    }

    pub fn report(&mut self, agent_id: &AgentId, report: &AgentReport, now: DateTime<Utc>) -> Result<(), RegistryError> {
        let state = self.live_mut(agent_id)?;
        if let Some(position) = report.position {
            state.current_position = position;
        }
        if let Some(thermal) = report.thermal_state {
            state.thermal_state = thermal;
        }
        state.last_update = now;
        Ok(())
    }

    /// `moving → repairing` once the agent starts executing.
    pub fn start_processing(
        &mut self,
        agent_id: &AgentId,
        command_id: CommandId,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let state = self.executing_mut(agent_id, command_id)?;
        state.status = AgentStatus::Repairing;
        state.last_update = now;
        Ok(())
    }

    /// The command finished: the agent is at the target and idle again.
    pub fn complete(
        &mut self,
        agent_id: &AgentId,
        command_id: CommandId,
        now: DateTime<Utc>,
    ) -> Result<CoordinateCommand, RegistryError> {
        let state = self.executing_mut(agent_id, command_id)?;
        let command = state
            .current_command
            .take()
            .ok_or_else(|| RegistryError::NotAssigned {
                agent_id: agent_id.clone(),
                command_id,
            })?;
        state.current_position = command.target;
        state.status = AgentStatus::Idle;
        state.last_update = now;
        Ok(command)
    }

    /// The command failed: the agent is idle again and gives it up.
    pub fn release(
        &mut self,
        agent_id: &AgentId,
        command_id: CommandId,
        now: DateTime<Utc>,
    ) -> Result<CoordinateCommand, RegistryError> {
        let state = self.executing_mut(agent_id, command_id)?;
        let command = state
            .current_command
            .take()
            .ok_or_else(|| RegistryError::NotAssigned {
                agent_id: agent_id.clone(),
                command_id,
            })?;
        state.status = AgentStatus::Idle;
        state.last_update = now;
        Ok(command)
    }

    /// Put an agent in `error`, returning whatever it was executing.
    pub fn mark_error(&mut self, agent_id: &AgentId) -> Result<Option<CoordinateCommand>, RegistryError> {
        let state = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.clone()))?;
        state.status = AgentStatus::Error;
        Ok(state.current_command.take())
    }

    /// Live agents whose last sign of life is older than `limit`.
    pub fn stale(&self, now: DateTime<Utc>, limit: Duration) -> Vec<AgentId> {
        self.ring
            .iter()
            .filter_map(|id| self.agents.get(id))
            .filter(|a| a.status != AgentStatus::Error && now - a.last_update > limit)
            .map(|a| a.agent_id.clone())
            .collect()
    }

    /// Drop assignments belonging to `defect_id`; those agents go idle.
    /// Returns each freed agent with the command it gave up.
    pub fn release_defect(&mut self, defect_id: DefectId) -> Vec<(AgentId, CommandId)> {
        let mut released = Vec::new();
        for state in self.agents.values_mut() {
            let Some(command) = state
                .current_command
                .take_if(|c| c.defect_id == defect_id)
            else {
                continue;
            };
            if state.status.is_busy() {
                state.status = AgentStatus::Idle;
            }
            released.push((state.agent_id.clone(), command.id));
        }
        released
    }

    /// Counts per status, for gauges.
    pub fn status_counts(&self) -> HashMap<AgentStatus, usize> {
        let mut counts = HashMap::new();
        for state in self.agents.values() {
            *counts.entry(state.status).or_insert(0) += 1;
        }
        counts
    }

    fn live_mut(&mut self, agent_id: &AgentId) -> Result<&mut SwarmAgentState, RegistryError> {
        let state = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.clone()))?;
        if state.status == AgentStatus::Error {
            return Err(RegistryError::AgentInError(agent_id.clone()));
        }
        Ok(state)
    }

    fn executing_mut(
        &mut self,
        agent_id: &AgentId,
        command_id: CommandId,
    ) -> Result<&mut SwarmAgentState, RegistryError> {
        let state = self.live_mut(agent_id)?;
        if !state
            .current_command
            .as_ref()
            .is_some_and(|c| c.id == command_id)
        {
            return Err(RegistryError::NotAssigned {
                agent_id: agent_id.clone(),
                command_id,
            });
        }
        Ok(state)
    }
}
