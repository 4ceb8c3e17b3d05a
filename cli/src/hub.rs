// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Hub runtime
//!
//! Wires the repair pipeline, the command queue and the swarm coordinator
//! into one service and routes twin traffic between them.
//!
//! The HTTP surface and the background tasks both go through [`Hub`]; nothing
//! here touches a socket, so the whole flow runs in tests with stub planners
//! and dispatchers.

use chrono::Utc;
use qnms_core::application::command_queue::{CommandQueue, QueueStats};
use qnms_core::application::metrics::{HubMetrics, SystemMetrics};
use qnms_core::application::repair_pipeline::{
    shared_validator, Cancellation, IngestOutcome, PipelineConfig, RepairPipeline, StepOutcome,
};
use qnms_core::domain::agent::{AgentCapabilities, AgentId, SwarmAgentState};
use qnms_core::domain::command::{AckStatus, AgentAck, CommandDispatcher, CommandId};
use qnms_core::domain::coordinate::{CorrelationId, Position, SensorReading};
use qnms_core::domain::defect::{DefectId, DefectRecord};
use qnms_core::domain::errors::HubError;
use qnms_core::domain::hub_config::{HubConfig, SafetyConfig};
use qnms_core::domain::planner::PathPlanner;
use qnms_core::domain::safety::SafetyConstraints;
use qnms_core::infrastructure::event_bus::EventBus;
use qnms_core::infrastructure::twin::{LinkSnapshot, LinkState, TwinEvent, TwinHandle};
use qnms_swarm::{AckOutcome, AgentReport, SwarmCoordinator, TickReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What `/health` reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub uptime_seconds: u64,
    pub agents: usize,
    pub queue_depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twin: Option<LinkSnapshot>,
}

/// A cancelled defect, the commands dropped with it and the agents freed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub defect: DefectRecord,
    pub dropped_commands: usize,
    pub released_agents: Vec<AgentId>,
}

pub struct Hub {
    config: HubConfig,
    queue: Arc<CommandQueue>,
    pipeline: Arc<RepairPipeline>,
    coordinator: Arc<SwarmCoordinator>,
    metrics: Arc<HubMetrics>,
    twin: Option<TwinHandle>,
    started_at: Instant,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        planner: Arc<dyn PathPlanner>,
        dispatcher: Arc<dyn CommandDispatcher>,
        event_bus: EventBus,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        let spec = &config.spec;
        let queue = Arc::new(CommandQueue::with_retention(spec.queue.retention));
        let validator = shared_validator(spec.safety.constraints());
        let coordinator = Arc::new(SwarmCoordinator::new(
            queue.clone(),
            validator.clone(),
            dispatcher,
            spec.coordinator.clone(),
            event_bus.clone(),
            metrics.clone(),
        ));
        let pipeline = Arc::new(RepairPipeline::new(
            queue.clone(),
            validator,
            planner,
            coordinator.clone(),
            PipelineConfig::from(&spec.planner),
            event_bus,
            metrics.clone(),
        ));

        Self {
            config,
            queue,
            pipeline,
            coordinator,
            metrics,
            twin: None,
            started_at: Instant::now(),
        }
    }

    /// Report the twin link in health and metrics.
    pub fn with_twin(mut self, twin: TwinHandle) -> Self {
        self.twin = Some(twin);
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<RepairPipeline> {
        &self.pipeline
    }

    pub fn coordinator(&self) -> &Arc<SwarmCoordinator> {
        &self.coordinator
    }

    // ── Background tasks ───────────────────────────────────────────────────

    /// Start the planning worker, the assignment loop and the twin event
    /// router. All of them stop when `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TwinEvent>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let planning = tokio::spawn(self.pipeline.clone().run(cancel.clone()));

        let hub = self.clone();
        let tick_cancel = cancel.clone();
        let ticking = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.config.spec.coordinator.tick_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        hub.dispatch();
                    }
                }
            }
            debug!("Assignment loop stopped");
        });

        let hub = self;
        let routing = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Some(event) => hub.handle_twin_event(event),
                    None => break,
                }
            }
            debug!("Twin event router stopped");
        });

        vec![planning, ticking, routing]
    }

    // ── Operations ─────────────────────────────────────────────────────────

    /// Validate and record sensor readings. `correlation_id` is used for
    /// readings that carry none of their own.
    pub fn ingest(
        &self,
        readings: Vec<SensorReading>,
        correlation_id: Option<&CorrelationId>,
    ) -> Vec<IngestOutcome> {
        let coordinates = readings
            .into_iter()
            .map(|r| r.into_coordinate(correlation_id))
            .collect();
        self.pipeline.ingest(coordinates)
    }

    /// One coordinator pass: retry held-back steps, sweep for silent agents,
    /// then assign.
    pub fn dispatch(&self) -> TickReport {
        let unblocked = self.pipeline.retry_blocked();
        if unblocked > 0 {
            debug!(unblocked, "Held-back steps queued");
        }

        for (_, outcome) in self.coordinator.check_heartbeats(Utc::now()) {
            if let Some(outcome) = outcome {
                self.apply(outcome);
            }
        }

        let report = self.coordinator.tick();
        for command in &report.assigned {
            self.pipeline.record_assignment(command);
        }
        report
    }

    pub fn register_agent(
        &self,
        agent_id: AgentId,
        position: Position,
        capabilities: AgentCapabilities,
    ) -> Result<SwarmAgentState, HubError> {
        Ok(self.coordinator.register_agent(agent_id, position, capabilities)?)
    }

    pub fn agent(&self, agent_id: &AgentId) -> Result<SwarmAgentState, HubError> {
        Ok(self.coordinator.agent_state(agent_id)?)
    }

    pub fn agents(&self) -> Vec<SwarmAgentState> {
        self.coordinator.agents()
    }

    pub fn defect(&self, defect_id: DefectId) -> Result<DefectRecord, HubError> {
        self.pipeline
            .defect(defect_id)
            .ok_or_else(|| HubError::not_found("defect", defect_id))
    }

    pub fn defects(&self) -> Vec<DefectRecord> {
        self.pipeline.defects()
    }

    /// Withdraw a defect: drop its queued commands and free its agents.
    pub fn cancel_defect(&self, defect_id: DefectId, reason: &str) -> Result<Withdrawal, HubError> {
        let cancellation = self.pipeline.cancel_defect(defect_id, reason)?;
        Ok(self.withdraw(cancellation))
    }

    pub fn constraints(&self) -> SafetyConstraints {
        self.pipeline.validator().read().constraints().clone()
    }

    /// Swap the safety limits and cancel defects whose queued work no longer
    /// passes them.
    pub fn update_constraints(&self, safety: &SafetyConfig) -> Result<Vec<Withdrawal>, HubError> {
        safety
            .validate()
            .map_err(|e| HubError::BadRequest(e.to_string()))?;
        let cancelled = self.pipeline.update_constraints(safety.constraints());
        Ok(cancelled.into_iter().map(|c| self.withdraw(c)).collect())
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn metrics(&self) -> SystemMetrics {
        let mut snapshot = self.metrics.snapshot();
        snapshot.queue_depth = self.queue.len();
        snapshot.twin_buffered = self.twin.as_ref().map(|t| t.link().buffered).unwrap_or(0);
        snapshot
    }

    pub fn health(&self) -> HealthReport {
        let twin = self.twin.as_ref().map(TwinHandle::link);
        let status = match twin {
            Some(link) if link.state != LinkState::Connected => "degraded",
            _ => "healthy",
        };
        HealthReport {
            status: status.to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            agents: self.coordinator.agents().len(),
            queue_depth: self.queue.len(),
            twin,
        }
    }

    // ── Twin traffic ───────────────────────────────────────────────────────

    pub fn handle_twin_event(&self, event: TwinEvent) {
        match event {
            TwinEvent::SensorData {
                correlation_id,
                readings,
            } => {
                let outcomes = self.ingest(readings, Some(&correlation_id));
                let rejected = outcomes.iter().filter(|o| !o.is_accepted()).count();
                if rejected > 0 {
                    warn!(%correlation_id, rejected, total = outcomes.len(), "Twin reported invalid coordinates");
                }
            }
            TwinEvent::Status {
                correlation_id,
                status,
            } => {
                let Some(agent_id) = status.agent_id else {
                    return;
                };
                let report = AgentReport {
                    position: status.position,
                    thermal_state: status.thermal_state,
                };
                match self.coordinator.on_status(&agent_id, &report, Utc::now()) {
                    Ok(true) => {}
                    Ok(false) => debug!(%agent_id, %correlation_id, "Status from errored agent ignored"),
                    Err(e) => debug!(%agent_id, %correlation_id, error = %e, "Status not applied"),
                }
            }
            TwinEvent::Ack {
                message_id,
                status,
                correlation_id,
            } => self.on_ack(&message_id, status, &correlation_id),
            TwinEvent::DeliveryFailed {
                command_id,
                correlation_id,
            } => match self.coordinator.on_delivery_failed(command_id) {
                Ok(outcome) => self.apply(outcome),
                Err(e) => debug!(%command_id, %correlation_id, error = %e, "Undelivered command no longer assigned"),
            },
            TwinEvent::LinkChanged { from, to } => {
                info!(?from, ?to, "Twin link changed");
            }
        }
    }

    fn on_ack(&self, message_id: &str, status: AckStatus, correlation_id: &CorrelationId) {
        // acks for handshakes and heartbeats are settled by the connection manager
        let Some(command_id) = CommandId::parse(message_id) else {
            return;
        };
        let Some(agent_id) = self.coordinator.agent_for_command(command_id) else {
            debug!(%command_id, %correlation_id, ?status, "Ack for a command no agent holds");
            return;
        };
        match self.coordinator.on_ack(&agent_id, AgentAck { command_id, status }) {
            Ok(outcome) => self.apply(outcome),
            Err(e) => warn!(%agent_id, %command_id, %correlation_id, error = %e, "Ack rejected"),
        }
    }

    fn apply(&self, outcome: AckOutcome) {
        match outcome {
            AckOutcome::Noted | AckOutcome::Requeued { .. } => {}
            AckOutcome::Completed(command) => match self.pipeline.on_command_completed(&command) {
                StepOutcome::NextStep(next) => {
                    debug!(defect_id = %next.defect_id, step = next.step, "Next step released");
                }
                StepOutcome::DefectCompleted(_) | StepOutcome::Ignored => {}
            },
            AckOutcome::Exhausted(command) => {
                if let Some(cancellation) = self.pipeline.abandon(&command) {
                    self.withdraw(cancellation);
                }
            }
        }
    }

    fn withdraw(&self, cancellation: Cancellation) -> Withdrawal {
        let defect_id = cancellation.record.defect_id;
        let released_agents = self
            .coordinator
            .withdraw_defect(defect_id, &cancellation.dropped);
        Withdrawal {
            dropped_commands: cancellation.dropped.len(),
            defect: cancellation.record,
            released_agents,
        }
    }
}
