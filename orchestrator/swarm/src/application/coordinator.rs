// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Coordinator
//!
//! Hands queued commands to idle agents and turns agent acknowledgments and
//! silences back into queue operations.
//!
//! - **Assignment:** round robin over idle agents, one command per agent per
//!   pass. Severity order comes from the queue.
//! - **Conflicts:** a command whose target is structurally forbidden, within
//!   the collision radius of an active target, or within that radius of where
//!   another agent currently sits is deferred and keeps its place at the head
//!   of the queue.
//! - **Failures:** failed commands are re-issued as new instances with the
//!   same correlation id until the attempt limit; an agent silent for two
//!   heartbeat intervals goes to `error` and its command is re-issued.
//!
//! The registry lock and the queue lock are never held together.

use crate::domain::registry::{AgentRegistry, AgentReport, Registration, RegistryError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use qnms_core::application::command_queue::{CommandQueue, QueueError, Requeue};
use qnms_core::application::metrics::{Counter, HubMetrics};
use qnms_core::application::repair_pipeline::SharedValidator;
use qnms_core::domain::agent::{ActiveAgent, AgentCapabilities, AgentId, AgentStatus, FleetView, SwarmAgentState};
use qnms_core::domain::command::{AckStatus, AgentAck, CommandDispatcher, CommandId, CommandStatus, CoordinateCommand};
use qnms_core::domain::coordinate::Position;
use qnms_core::domain::defect::DefectId;
use qnms_core::domain::errors::HubError;
use qnms_core::domain::events::{AgentEvent, CommandEvent};
use qnms_core::domain::hub_config::CoordinatorConfig;
use qnms_core::domain::safety::ViolationList;
use qnms_core::infrastructure::event_bus::EventBus;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("no agent is executing command {0}")]
    UnknownCommand(CommandId),

    #[error("invalid agent position: {0}")]
    InvalidPosition(ViolationList),
}

impl From<CoordinatorError> for HubError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::Registry(RegistryError::UnknownAgent(id)) => HubError::not_found("agent", id),
            CoordinatorError::UnknownCommand(id) => HubError::not_found("command", id),
            CoordinatorError::InvalidPosition(violations) => HubError::Validation {
                violations,
                correlation_id: None,
            },
            other => HubError::Execution(other.to_string()),
        }
    }
}

/// What one assignment pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub assigned: Vec<CoordinateCommand>,
    /// Commands held back by a conflict this pass.
    pub deferred: Vec<CommandId>,
    /// Commands whose hand-off to the transport failed and went back to the queue.
    pub undelivered: Vec<CommandId>,
    /// Another pass was already running.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// What an acknowledgment (or its absence) led to.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// Liveness or progress only.
    Noted,
    Completed(CoordinateCommand),
    /// A new instance took the failed command's place in the queue.
    Requeued {
        failed: CoordinateCommand,
        fresh: CoordinateCommand,
    },
    /// The attempt limit was reached; the defect cannot be finished.
    Exhausted(CoordinateCommand),
}

pub struct SwarmCoordinator {
    registry: Mutex<AgentRegistry>,
    queue: Arc<CommandQueue>,
    validator: SharedValidator,
    dispatcher: Arc<dyn CommandDispatcher>,
    config: CoordinatorConfig,
    event_bus: EventBus,
    metrics: Arc<HubMetrics>,
    ticking: AtomicBool,
}

/// Clears the single-pass flag when a tick ends.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SwarmCoordinator {
    pub fn new(
        queue: Arc<CommandQueue>,
        validator: SharedValidator,
        dispatcher: Arc<dyn CommandDispatcher>,
        config: CoordinatorConfig,
        event_bus: EventBus,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            registry: Mutex::new(AgentRegistry::new()),
            queue,
            validator,
            dispatcher,
            config,
            event_bus,
            metrics,
            ticking: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ── Registry ───────────────────────────────────────────────────────────

    pub fn register_agent(
        &self,
        agent_id: AgentId,
        position: Position,
        capabilities: AgentCapabilities,
    ) -> Result<SwarmAgentState, CoordinatorError> {
        let violations: Vec<_> = {
            let validator = self.validator.read();
            validator.check_precision(&position, "position.")
        };
        if !violations.is_empty() {
            return Err(CoordinatorError::InvalidPosition(ViolationList(violations)));
        }

        let Registration {
            state,
            recovered,
            displaced,
        } = self
            .registry
            .lock()
            .register(agent_id.clone(), position, capabilities, Utc::now());

        if let Some(command) = displaced {
            info!(%agent_id, command_id = %command.id, "Re-registered agent gave up its command");
            self.requeue(command, None, "agent re-registered")?;
        }

        info!(%agent_id, %position, recovered, "Agent registered");
        self.event_bus.publish_agent_event(AgentEvent::AgentRegistered {
            agent_id,
            recovered,
            timestamp: Utc::now(),
        });
        self.publish_gauges();
        Ok(state)
    }

    pub fn agent_state(&self, agent_id: &AgentId) -> Result<SwarmAgentState, CoordinatorError> {
        self.registry
            .lock()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.clone()).into())
    }

    pub fn agents(&self) -> Vec<SwarmAgentState> {
        self.registry.lock().all()
    }

    /// Agent executing `command_id`, if any.
    pub fn agent_for_command(&self, command_id: CommandId) -> Option<AgentId> {
        self.registry.lock().agent_for_command(command_id)
    }

    // ── Assignment ─────────────────────────────────────────────────────────

    /// One assignment pass. Concurrent calls do not overlap: a pass that
    /// finds another one running returns at once with `skipped` set.
    pub fn tick(&self) -> TickReport {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TickReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = TickGuard(&self.ticking);

        let validator = self.validator.read().clone();
        let (idle, mut targets, occupied) = {
            let mut registry = self.registry.lock();
            (
                registry.idle_round_robin(),
                registry.active_targets(),
                registry.occupied_positions(),
            )
        };

        let mut report = TickReport::default();
        let mut deferred: HashSet<CommandId> = HashSet::new();

        for (agent_id, capabilities) in idle {
            // the receiving agent is not an obstacle to itself
            let claimed: Vec<Position> = occupied
                .iter()
                .filter(|(id, _)| *id != agent_id)
                .map(|(_, position)| *position)
                .chain(targets.iter().copied())
                .collect();
            let mut conflicts = Vec::new();
            let next = self.queue.dequeue_where(Some(&agent_id), &capabilities, |cmd| {
                match validator.validate_assignment(cmd, &claimed) {
                    Ok(()) => true,
                    Err(violations) => {
                        conflicts.push((cmd.clone(), violations));
                        false
                    }
                }
            });

            for (cmd, violations) in conflicts {
                if deferred.insert(cmd.id) {
                    debug!(command_id = %cmd.id, correlation_id = %cmd.correlation_id, %violations, "Assignment deferred");
                    self.event_bus.publish_command_event(CommandEvent::CommandDeferred {
                        command_id: cmd.id,
                        correlation_id: cmd.correlation_id.clone(),
                        reason: violations.to_string(),
                        timestamp: Utc::now(),
                    });
                    report.deferred.push(cmd.id);
                }
            }

            let Some(command) = next else {
                continue;
            };

            let assigned = self.registry.lock().assign(&agent_id, command.clone(), Utc::now());
            if let Err(e) = assigned {
                // agent changed state since the snapshot
                debug!(%agent_id, error = %e, "Agent no longer idle; returning command");
                if let Err(e) = self.queue.release(command.id) {
                    warn!(command_id = %command.id, error = %e, "Failed to return command to queue");
                }
                continue;
            }

            if let Err(e) = self.dispatcher.dispatch(&command) {
                warn!(%agent_id, command_id = %command.id, error = %e, "Dispatch failed; returning command");
                let returned = self.registry.lock().release(&agent_id, command.id, Utc::now());
                if returned.is_ok() {
                    if let Err(e) = self.queue.release(command.id) {
                        warn!(command_id = %command.id, error = %e, "Failed to return command to queue");
                    }
                }
                report.undelivered.push(command.id);
                continue;
            }

            targets.push(command.target);
            self.metrics.incr(Counter::CommandsDispatched);
            info!(
                %agent_id,
                command_id = %command.id,
                correlation_id = %command.correlation_id,
                severity = command.severity,
                "Command assigned"
            );
            self.event_bus.publish_command_event(CommandEvent::CommandAssigned {
                command_id: command.id,
                agent_id: agent_id.clone(),
                correlation_id: command.correlation_id.clone(),
                timestamp: Utc::now(),
            });
            report.assigned.push(command);
        }

        self.publish_gauges();
        report
    }

    // ── Acknowledgments ────────────────────────────────────────────────────

    pub fn on_ack(&self, agent_id: &AgentId, ack: AgentAck) -> Result<AckOutcome, CoordinatorError> {
        let now = Utc::now();
        match ack.status {
            AckStatus::Received => {
                self.registry.lock().touch(agent_id, now)?;
                Ok(AckOutcome::Noted)
            }
            AckStatus::Processing => {
                self.registry.lock().start_processing(agent_id, ack.command_id, now)?;
                debug!(%agent_id, command_id = %ack.command_id, "Agent repairing");
                Ok(AckOutcome::Noted)
            }
            AckStatus::Completed => {
                self.registry.lock().complete(agent_id, ack.command_id, now)?;
                let command = self.queue.mark(ack.command_id, CommandStatus::Completed)?;
                self.metrics.incr(Counter::CommandsCompleted);
                info!(
                    %agent_id,
                    command_id = %command.id,
                    correlation_id = %command.correlation_id,
                    "Command completed"
                );
                self.event_bus.publish_command_event(CommandEvent::CommandCompleted {
                    command_id: command.id,
                    agent_id: agent_id.clone(),
                    correlation_id: command.correlation_id.clone(),
                    timestamp: Utc::now(),
                });
                self.publish_gauges();
                Ok(AckOutcome::Completed(command))
            }
            AckStatus::Failed => {
                let command = self.registry.lock().release(agent_id, ack.command_id, now)?;
                self.requeue(command, Some(self.config.max_command_attempts), "agent reported failure")
            }
        }
    }

    /// The transport gave up delivering a command; same as a failed ack.
    pub fn on_delivery_failed(&self, command_id: CommandId) -> Result<AckOutcome, CoordinatorError> {
        let agent_id = self
            .registry
            .lock()
            .agent_for_command(command_id)
            .ok_or(CoordinatorError::UnknownCommand(command_id))?;
        let command = self.registry.lock().release(&agent_id, command_id, Utc::now())?;
        warn!(%agent_id, %command_id, "Command undeliverable");
        self.requeue(command, Some(self.config.max_command_attempts), "delivery not acknowledged")
    }

    /// A status message from the twin: telemetry and heartbeat in one.
    /// Reports from agents in `error` are ignored until they re-register.
    pub fn on_status(
        &self,
        agent_id: &AgentId,
        report: &AgentReport,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        match self.registry.lock().report(agent_id, report, now) {
            Ok(()) => Ok(true),
            Err(RegistryError::AgentInError(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    // ── Failure detection ──────────────────────────────────────────────────

    /// Put a silent agent in `error` and re-issue what it was executing.
    pub fn on_heartbeat_timeout(&self, agent_id: &AgentId) -> Result<Option<AckOutcome>, CoordinatorError> {
        let taken = self.registry.lock().mark_error(agent_id)?;
        let reason = format!(
            "no heartbeat for {} intervals",
            self.config.missed_heartbeat_limit
        );
        warn!(%agent_id, reason, "Agent marked error");
        self.event_bus.publish_agent_event(AgentEvent::AgentErrored {
            agent_id: agent_id.clone(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        self.publish_gauges();

        match taken {
            Some(command) => self.requeue(command, None, &reason).map(Some),
            None => Ok(None),
        }
    }

    /// Sweep for agents silent longer than the heartbeat allowance.
    pub fn check_heartbeats(&self, now: DateTime<Utc>) -> Vec<(AgentId, Option<AckOutcome>)> {
        let allowance = chrono::Duration::from_std(
            self.config.heartbeat_interval() * self.config.missed_heartbeat_limit,
        )
        .unwrap_or(chrono::Duration::MAX);
        let stale = self.registry.lock().stale(now, allowance);

        stale
            .into_iter()
            .filter_map(|agent_id| match self.on_heartbeat_timeout(&agent_id) {
                Ok(outcome) => Some((agent_id, outcome)),
                Err(e) => {
                    warn!(%agent_id, error = %e, "Heartbeat timeout handling failed");
                    None
                }
            })
            .collect()
    }

    /// Free agents working on a withdrawn defect and stop delivery of its
    /// commands, both those the agents held and the `dropped` queue entries.
    pub fn withdraw_defect(&self, defect_id: DefectId, dropped: &[CoordinateCommand]) -> Vec<AgentId> {
        let released = self.registry.lock().release_defect(defect_id);

        let mut retracted: HashSet<CommandId> = HashSet::new();
        let held = released.iter().map(|(_, command_id)| *command_id);
        for command_id in held.chain(dropped.iter().map(|c| c.id)) {
            if retracted.insert(command_id) {
                self.dispatcher.retract(command_id);
            }
        }

        if !released.is_empty() {
            info!(%defect_id, agents = released.len(), "Agents released from withdrawn defect");
            self.publish_gauges();
        }
        released.into_iter().map(|(agent_id, _)| agent_id).collect()
    }

    fn requeue(
        &self,
        command: CoordinateCommand,
        max_attempts: Option<u32>,
        reason: &str,
    ) -> Result<AckOutcome, CoordinatorError> {
        self.dispatcher.retract(command.id);
        let outcome = self.queue.fail_and_requeue(command.id, max_attempts)?;
        self.metrics.incr(Counter::CommandsFailed);
        self.event_bus.publish_command_event(CommandEvent::CommandFailed {
            command_id: command.id,
            correlation_id: command.correlation_id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });

        match outcome {
            Requeue::Reissued { failed, fresh } => {
                self.metrics.incr(Counter::CommandsRequeued);
                info!(
                    previous = %failed.id,
                    command_id = %fresh.id,
                    correlation_id = %fresh.correlation_id,
                    attempt = fresh.attempt,
                    reason,
                    "Command re-queued"
                );
                self.event_bus.publish_command_event(CommandEvent::CommandRequeued {
                    previous: failed.id,
                    command_id: fresh.id,
                    correlation_id: fresh.correlation_id.clone(),
                    attempt: fresh.attempt,
                    timestamp: Utc::now(),
                });
                Ok(AckOutcome::Requeued { failed, fresh })
            }
            Requeue::Exhausted(failed) => {
                warn!(
                    command_id = %failed.id,
                    correlation_id = %failed.correlation_id,
                    attempts = failed.attempt,
                    reason,
                    "Command exhausted its attempts"
                );
                Ok(AckOutcome::Exhausted(failed))
            }
        }
    }

    fn publish_gauges(&self) {
        let counts = self.registry.lock().status_counts();
        for status in [AgentStatus::Idle, AgentStatus::Moving, AgentStatus::Repairing, AgentStatus::Error] {
            let n = counts.get(&status).copied().unwrap_or(0);
            metrics::gauge!("qnms_agents", "status" => status.to_string()).set(n as f64);
        }
    }
}

impl FleetView for SwarmCoordinator {
    fn active_agents(&self) -> Vec<ActiveAgent> {
        self.registry.lock().active_agents()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnms_core::application::repair_pipeline::shared_validator;
    use qnms_core::domain::command::{ActionType, DispatchError};
    use qnms_core::domain::coordinate::CorrelationId;
    use qnms_core::domain::safety::SafetyConstraints;

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<CommandId>>,
        fail: AtomicBool,
    }

    impl CommandDispatcher for RecordingDispatcher {
        fn dispatch(&self, command: &CoordinateCommand) -> Result<(), DispatchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Closed);
            }
            self.sent.lock().push(command.id);
            Ok(())
        }
    }

    fn coordinator() -> (SwarmCoordinator, Arc<CommandQueue>, Arc<RecordingDispatcher>) {
        let queue = Arc::new(CommandQueue::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let coordinator = SwarmCoordinator::new(
            queue.clone(),
            shared_validator(SafetyConstraints::default()),
            dispatcher.clone(),
            CoordinatorConfig::default(),
            EventBus::with_default_capacity(),
            Arc::new(HubMetrics::new()),
        );
        (coordinator, queue, dispatcher)
    }

    fn command(x: f64) -> CoordinateCommand {
        CoordinateCommand::new(
            DefectId::new(),
            Position::new(x, 1.0, 0.5),
            ActionType::Repair,
            70.0,
            5,
            CorrelationId::from("coord"),
        )
    }

    #[test]
    fn test_register_rejects_off_grid_position() {
        let (coordinator, _, _) = coordinator();
        let err = coordinator
            .register_agent(AgentId::new("a"), Position::new(0.15, 0.0, 0.0), AgentCapabilities::all())
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidPosition(_)));
    }

    #[test]
    fn test_dispatch_failure_returns_command() {
        let (coordinator, queue, dispatcher) = coordinator();
        coordinator
            .register_agent(AgentId::new("a"), Position::ORIGIN, AgentCapabilities::all())
            .unwrap();
        let cmd = command(2.0);
        queue.enqueue(cmd.clone()).unwrap();
        dispatcher.fail.store(true, Ordering::SeqCst);

        let report = coordinator.tick();
        assert!(report.assigned.is_empty());
        assert_eq!(report.undelivered, vec![cmd.id]);
        assert_eq!(queue.get(cmd.id).unwrap().status, CommandStatus::Pending);
        assert_eq!(
            coordinator.agent_state(&AgentId::new("a")).unwrap().status,
            AgentStatus::Idle
        );
    }

    #[test]
    fn test_capabilities_respected() {
        let (coordinator, queue, _) = coordinator();
        coordinator
            .register_agent(AgentId::new("scanner"), Position::ORIGIN, AgentCapabilities::only([ActionType::Scan]))
            .unwrap();
        queue.enqueue(command(2.0)).unwrap();

        assert!(coordinator.tick().assigned.is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_failed_ack_requeues_until_exhausted() {
        let (coordinator, queue, _) = coordinator();
        let a = AgentId::new("a");
        coordinator.register_agent(a.clone(), Position::ORIGIN, AgentCapabilities::all()).unwrap();
        queue.enqueue(command(2.0)).unwrap();

        let mut last = None;
        for attempt in 1..=3 {
            let assigned = coordinator.tick().assigned;
            assert_eq!(assigned.len(), 1);
            assert_eq!(assigned[0].attempt, attempt);
            let outcome = coordinator
                .on_ack(
                    &a,
                    AgentAck {
                        command_id: assigned[0].id,
                        status: AckStatus::Failed,
                    },
                )
                .unwrap();
            last = Some(outcome);
        }
        match last.unwrap() {
            AckOutcome::Exhausted(failed) => assert_eq!(failed.correlation_id.as_str(), "coord"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ack_from_wrong_agent_rejected() {
        let (coordinator, queue, _) = coordinator();
        coordinator.register_agent(AgentId::new("a"), Position::ORIGIN, AgentCapabilities::all()).unwrap();
        coordinator.register_agent(AgentId::new("b"), Position::new(5.0, 5.0, 0.0), AgentCapabilities::all()).unwrap();
        queue.enqueue(command(2.0)).unwrap();

        let assigned = coordinator.tick().assigned;
        let owner = assigned[0].agent_id.clone().unwrap();
        let other = if owner.as_str() == "a" { AgentId::new("b") } else { AgentId::new("a") };
        let err = coordinator
            .on_ack(
                &other,
                AgentAck {
                    command_id: assigned[0].id,
                    status: AckStatus::Completed,
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Registry(RegistryError::NotAssigned { .. })));
    }

    #[test]
    fn test_status_from_errored_agent_ignored() {
        let (coordinator, _, _) = coordinator();
        let a = AgentId::new("a");
        coordinator.register_agent(a.clone(), Position::ORIGIN, AgentCapabilities::all()).unwrap();
        coordinator.on_heartbeat_timeout(&a).unwrap();

        let report = AgentReport {
            position: Some(Position::new(1.0, 1.0, 0.0)),
            thermal_state: Some(40.0),
        };
        assert!(!coordinator.on_status(&a, &report, Utc::now()).unwrap());
        assert_eq!(coordinator.agent_state(&a).unwrap().current_position, Position::ORIGIN);
        assert!(coordinator.on_status(&AgentId::new("ghost"), &report, Utc::now()).is_err());
    }
}
