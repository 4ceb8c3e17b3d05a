// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Repair Pipeline
//!
//! Application service carrying a defect from sensor report to completion:
//!
//! ```text
//! ingest ──▶ queued ──▶ planning ──▶ repairing ──▶ completed
//!               ▲           │            │
//!               └─ replan ──┤            │
//!                           ▼            ▼
//!                       unrepairable ◀── cancel / abandon
//! ```
//!
//! - Coordinates are validated synchronously; rejected ones never create a
//!   defect and never reach the planner.
//! - Every planned path is rebuilt into commands carrying the defect's
//!   correlation id and re-validated before anything is queued.
//! - The steps of one path run in order: only one step per defect is in the
//!   command queue at any time.
//!
//! Locks: the defect store, the command queue, the validator and the blocked
//! list are separate boundaries, and no method holds two of them at once.

use crate::application::command_queue::{CommandQueue, QueueError};
use crate::application::metrics::{Counter, HubMetrics};
use crate::domain::agent::FleetView;
use crate::domain::command::CoordinateCommand;
use crate::domain::coordinate::{CorrelationId, GridPoint, SensorCoordinate};
use crate::domain::defect::{DefectId, DefectRecord, DefectStatus, RepairPath};
use crate::domain::errors::HubError;
use crate::domain::events::{CommandEvent, DefectEvent};
use crate::domain::hub_config::PlannerConfig;
use crate::domain::planner::{PathPlanner, PlannedPath, PlanningError, PlanningRequest};
use crate::domain::safety::{SafetyConstraints, SafetyValidator, ViolationList};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The validator shared by the pipeline and the coordinator; swapped as a
/// whole when the constraints change.
pub type SharedValidator = Arc<RwLock<SafetyValidator>>;

pub fn shared_validator(constraints: SafetyConstraints) -> SharedValidator {
    Arc::new(RwLock::new(SafetyValidator::new(constraints)))
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Re-plans after a failed or unsafe plan before giving up on a defect.
    pub max_replans: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_replans: 1 }
    }
}

impl From<&PlannerConfig> for PipelineConfig {
    fn from(c: &PlannerConfig) -> Self {
        Self {
            max_replans: c.max_replans,
        }
    }
}

/// Per-item result of [`RepairPipeline::ingest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted {
        defect_id: DefectId,
        correlation_id: CorrelationId,
        /// The report was folded into an active defect at the same grid point.
        merged: bool,
    },
    Rejected {
        correlation_id: CorrelationId,
        violations: ViolationList,
    },
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Repairing { steps: usize },
    Unrepairable { reason: String },
    /// The defect was withdrawn or already handled elsewhere.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The next step of the path was handed to the queue.
    NextStep(CoordinateCommand),
    DefectCompleted(DefectId),
    /// Not the defect's current step, or the defect is no longer repairing.
    Ignored,
}

/// A withdrawn defect and the commands dropped with it.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub record: DefectRecord,
    pub dropped: Vec<CoordinateCommand>,
}

#[derive(Debug, Default)]
struct DefectStore {
    records: HashMap<DefectId, DefectRecord>,
    /// Non-terminal defects by location.
    by_grid: HashMap<GridPoint, DefectId>,
}

impl DefectStore {
    fn unindex(&mut self, record: &DefectRecord) {
        let grid = record.coordinates.position().grid_point();
        if self.by_grid.get(&grid) == Some(&record.defect_id) {
            self.by_grid.remove(&grid);
        }
    }
}

pub struct RepairPipeline {
    validator: SharedValidator,
    queue: Arc<CommandQueue>,
    defects: RwLock<DefectStore>,
    planner: Arc<dyn PathPlanner>,
    fleet: Arc<dyn FleetView>,
    intake_tx: mpsc::UnboundedSender<DefectId>,
    intake_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DefectId>>,
    blocked: Mutex<VecDeque<CoordinateCommand>>,
    config: PipelineConfig,
    event_bus: EventBus,
    metrics: Arc<HubMetrics>,
}

impl RepairPipeline {
    pub fn new(
        queue: Arc<CommandQueue>,
        validator: SharedValidator,
        planner: Arc<dyn PathPlanner>,
        fleet: Arc<dyn FleetView>,
        config: PipelineConfig,
        event_bus: EventBus,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        Self {
            validator,
            queue,
            defects: RwLock::new(DefectStore::default()),
            planner,
            fleet,
            intake_tx,
            intake_rx: tokio::sync::Mutex::new(intake_rx),
            blocked: Mutex::new(VecDeque::new()),
            config,
            event_bus,
            metrics,
        }
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn validator(&self) -> &SharedValidator {
        &self.validator
    }

    pub fn defect(&self, id: DefectId) -> Option<DefectRecord> {
        self.defects.read().records.get(&id).cloned()
    }

    /// All known defects, newest detection first.
    pub fn defects(&self) -> Vec<DefectRecord> {
        let mut all: Vec<DefectRecord> = self.defects.read().records.values().cloned().collect();
        all.sort_by(|a, b| b.detection_time.cmp(&a.detection_time));
        all
    }

    /// Steps held back because their target was still claimed.
    pub fn blocked_len(&self) -> usize {
        self.blocked.lock().len()
    }

    // ── Ingestion ──────────────────────────────────────────────────────────

    /// Validate and record sensor coordinates. Never waits on the planner.
    pub fn ingest(&self, coordinates: Vec<SensorCoordinate>) -> Vec<IngestOutcome> {
        let validator = self.validator.read().clone();
        coordinates
            .into_iter()
            .map(|c| self.ingest_one(&validator, c))
            .collect()
    }

    fn ingest_one(&self, validator: &SafetyValidator, coordinate: SensorCoordinate) -> IngestOutcome {
        let correlation_id = coordinate.correlation_id.clone();

        if let Err(violations) = validator.validate_coordinate(&coordinate) {
            self.metrics.incr(Counter::SensorRejected);
            warn!(%correlation_id, %violations, "Sensor coordinate rejected");
            self.event_bus.publish_defect_event(DefectEvent::SensorRejected {
                correlation_id: correlation_id.clone(),
                reasons: violations.iter().map(ToString::to_string).collect(),
                timestamp: Utc::now(),
            });
            return IngestOutcome::Rejected {
                correlation_id,
                violations,
            };
        }

        let grid = coordinate.position().grid_point();
        let (defect_id, merged) = {
            let mut store = self.defects.write();
            match store.by_grid.get(&grid).copied() {
                Some(existing) => (existing, true),
                None => {
                    let mut record = DefectRecord::detect(coordinate);
                    let id = record.defect_id;
                    if let Err(e) = record.transition(DefectStatus::Queued) {
                        warn!(defect_id = %id, error = %e, "Fresh defect could not be queued");
                    }
                    store.by_grid.insert(grid, id);
                    store.records.insert(id, record);
                    (id, false)
                }
            }
        };

        if !merged && self.intake_tx.send(defect_id).is_err() {
            warn!(%defect_id, "Planning intake closed; defect will not be planned");
        }

        self.metrics.incr(Counter::SensorAccepted);
        info!(%defect_id, %correlation_id, merged, "Sensor coordinate accepted");
        self.event_bus.publish_defect_event(DefectEvent::SensorAccepted {
            defect_id,
            correlation_id: correlation_id.clone(),
            merged,
            timestamp: Utc::now(),
        });
        IngestOutcome::Accepted {
            defect_id,
            correlation_id,
            merged,
        }
    }

    // ── Planning ───────────────────────────────────────────────────────────

    /// Wait for the next queued defect and plan it.
    pub async fn plan_next(&self) -> Option<(DefectId, PlanOutcome)> {
        let defect_id = self.intake_rx.lock().await.recv().await?;
        Some((defect_id, self.plan_defect(defect_id).await))
    }

    /// Plan every defect already waiting in the intake, one after another.
    pub async fn plan_pending(&self) -> Vec<(DefectId, PlanOutcome)> {
        let mut ids = Vec::new();
        {
            let mut rx = self.intake_rx.lock().await;
            while let Ok(id) = rx.try_recv() {
                ids.push(id);
            }
        }
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            outcomes.push((id, self.plan_defect(id).await));
        }
        outcomes
    }

    /// Planning worker: one task per defect so a slow plan never holds up
    /// the next one.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Planning worker started");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.next_intake() => next,
            };
            let Some(defect_id) = next else {
                break;
            };
            let pipeline = self.clone();
            tokio::spawn(async move {
                let outcome = pipeline.plan_defect(defect_id).await;
                debug!(%defect_id, ?outcome, "Planning finished");
            });
        }
        info!("Planning worker stopped");
    }

    async fn next_intake(&self) -> Option<DefectId> {
        self.intake_rx.lock().await.recv().await
    }

    /// Plan one defect, re-planning up to `max_replans` times.
    pub async fn plan_defect(&self, defect_id: DefectId) -> PlanOutcome {
        let attempts = self.config.max_replans.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let Some(coordinate) = self.begin_planning(defect_id, attempt) else {
                return PlanOutcome::Skipped;
            };

            let fleet = self.fleet.active_agents();
            let validator = self.validator.read().clone();
            let request = PlanningRequest::new(defect_id, &coordinate, &fleet, validator.constraints());

            let started = Instant::now();
            let planned = self.planner.plan(&request).await;
            self.metrics.record_planning_latency(started.elapsed());

            let result = planned
                .and_then(|planned| build_path(defect_id, &coordinate, planned, &validator));

            match result {
                Ok(path) => return self.accept_path(defect_id, path),
                Err(e) => {
                    self.metrics.incr(Counter::PlanningFailures);
                    warn!(
                        %defect_id,
                        correlation_id = %coordinate.correlation_id,
                        attempt,
                        error = %e,
                        "Repair planning failed"
                    );
                    self.event_bus.publish_defect_event(DefectEvent::PlanningFailed {
                        defect_id,
                        correlation_id: coordinate.correlation_id.clone(),
                        attempt,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    last_error = Some(e);
                    if attempt < attempts && !self.return_to_queue(defect_id) {
                        return PlanOutcome::Skipped;
                    }
                }
            }
        }

        let reason = match last_error {
            Some(e) => format!("no safe repair path after {} attempt(s): {}", attempts, e),
            None => format!("no safe repair path after {} attempt(s)", attempts),
        };
        match self.retire(defect_id, &reason) {
            Ok(_) => PlanOutcome::Unrepairable { reason },
            Err(_) => PlanOutcome::Skipped,
        }
    }

    /// `queued → planning`; returns the coordinate to plan for.
    fn begin_planning(&self, defect_id: DefectId, attempt: u32) -> Option<SensorCoordinate> {
        let mut store = self.defects.write();
        let record = store.records.get_mut(&defect_id)?;
        if record.status != DefectStatus::Queued {
            debug!(%defect_id, status = ?record.status, "Defect no longer awaiting planning");
            return None;
        }
        record.transition(DefectStatus::Planning).ok()?;
        record.planning_attempts = attempt;
        Some(record.coordinates.clone())
    }

    /// `planning → queued` ahead of a re-plan. False if the defect was
    /// withdrawn meanwhile.
    fn return_to_queue(&self, defect_id: DefectId) -> bool {
        let mut store = self.defects.write();
        match store.records.get_mut(&defect_id) {
            Some(record) if record.status == DefectStatus::Planning => {
                record.transition(DefectStatus::Queued).is_ok()
            }
            _ => false,
        }
    }

    fn accept_path(&self, defect_id: DefectId, path: RepairPath) -> PlanOutcome {
        let steps = path.len();
        let total_distance = path.total_distance;
        let correlation_id = path.correlation_id.clone();

        let first = {
            let mut store = self.defects.write();
            let Some(record) = store.records.get_mut(&defect_id) else {
                return PlanOutcome::Skipped;
            };
            if record.status != DefectStatus::Planning {
                return PlanOutcome::Skipped;
            }
            if let Err(e) = record.attach_path(path) {
                warn!(%defect_id, error = %e, "Validated path could not be attached");
                return PlanOutcome::Skipped;
            }
            record.released_steps = 1;
            record
                .repair_path
                .as_ref()
                .and_then(|p| p.commands.first().cloned())
        };

        info!(%defect_id, %correlation_id, steps, total_distance, "Repair path accepted");
        self.event_bus.publish_defect_event(DefectEvent::PathPlanned {
            defect_id,
            correlation_id,
            steps,
            total_distance,
            timestamp: Utc::now(),
        });

        if let Some(command) = first {
            self.release(command);
        }
        PlanOutcome::Repairing { steps }
    }

    // ── Execution ──────────────────────────────────────────────────────────

    /// Hand a path step to the command queue, holding it back if its target
    /// is still claimed by another active command.
    fn release(&self, command: CoordinateCommand) -> bool {
        match self.queue.enqueue(command.clone()) {
            Ok(()) => {
                self.metrics.incr(Counter::CommandsEnqueued);
                debug!(
                    command_id = %command.id,
                    defect_id = %command.defect_id,
                    step = command.step,
                    "Path step enqueued"
                );
                self.event_bus.publish_command_event(CommandEvent::CommandEnqueued {
                    command_id: command.id,
                    defect_id: command.defect_id,
                    correlation_id: command.correlation_id.clone(),
                    step: command.step,
                    timestamp: Utc::now(),
                });
                true
            }
            Err(QueueError::Duplicate { existing, target }) => {
                self.metrics.incr(Counter::DuplicatesRejected);
                info!(
                    command_id = %command.id,
                    %existing,
                    %target,
                    "Path step held back: target already claimed"
                );
                self.event_bus.publish_command_event(CommandEvent::CommandDuplicate {
                    command_id: command.id,
                    existing,
                    correlation_id: command.correlation_id.clone(),
                    timestamp: Utc::now(),
                });
                self.blocked.lock().push_back(command);
                false
            }
            Err(e) => {
                warn!(command_id = %command.id, error = %e, "Path step could not be enqueued");
                false
            }
        }
    }

    /// Retry held-back steps; called on every coordinator tick. Returns how
    /// many made it into the queue.
    pub fn retry_blocked(&self) -> usize {
        let blocked: Vec<CoordinateCommand> = self.blocked.lock().drain(..).collect();
        blocked
            .into_iter()
            .filter(|c| self.is_repairing(c.defect_id))
            .filter(|c| self.release(c.clone()))
            .count()
    }

    fn is_repairing(&self, defect_id: DefectId) -> bool {
        self.defects
            .read()
            .records
            .get(&defect_id)
            .is_some_and(|r| r.status == DefectStatus::Repairing)
    }

    /// Note which agent is executing a defect's step.
    pub fn record_assignment(&self, command: &CoordinateCommand) {
        let Some(agent_id) = command.agent_id.clone() else {
            return;
        };
        let mut store = self.defects.write();
        if let Some(record) = store.records.get_mut(&command.defect_id) {
            if let Err(e) = record.assign_agent(agent_id) {
                debug!(defect_id = %command.defect_id, error = %e, "Assignment not recorded");
            }
        }
    }

    /// A step finished: release the next one or complete the defect.
    pub fn on_command_completed(&self, command: &CoordinateCommand) -> StepOutcome {
        let defect_id = command.defect_id;
        let next = {
            let mut guard = self.defects.write();
            let store = &mut *guard;
            let Some(record) = store.records.get_mut(&defect_id) else {
                return StepOutcome::Ignored;
            };
            if record.status != DefectStatus::Repairing || command.step + 1 != record.released_steps {
                debug!(%defect_id, step = command.step, "Completion for a stale step ignored");
                return StepOutcome::Ignored;
            }
            if let Some(agent_id) = &command.agent_id {
                record.assigned_agents.insert(agent_id.clone());
            }

            let next = record
                .repair_path
                .as_ref()
                .and_then(|p| p.commands.get(record.released_steps).cloned());
            match next {
                Some(next) => {
                    record.released_steps += 1;
                    Some(next)
                }
                None => {
                    if let Err(e) = record.transition(DefectStatus::Completed) {
                        warn!(%defect_id, error = %e, "Defect could not be completed");
                        return StepOutcome::Ignored;
                    }
                    let record = record.clone();
                    store.unindex(&record);
                    None
                }
            }
        };

        match next {
            Some(next) => {
                self.release(next.clone());
                StepOutcome::NextStep(next)
            }
            None => {
                self.metrics.incr(Counter::DefectsCompleted);
                info!(%defect_id, correlation_id = %command.correlation_id, "Defect repaired");
                self.event_bus.publish_defect_event(DefectEvent::DefectCompleted {
                    defect_id,
                    correlation_id: command.correlation_id.clone(),
                    timestamp: Utc::now(),
                });
                StepOutcome::DefectCompleted(defect_id)
            }
        }
    }

    // ── Withdrawal ─────────────────────────────────────────────────────────

    /// Withdraw a non-terminal defect and drop its queued commands.
    pub fn cancel_defect(&self, defect_id: DefectId, reason: &str) -> Result<Cancellation, HubError> {
        self.retire(defect_id, reason)
    }

    /// A command ran out of execution attempts; its defect cannot be finished.
    pub fn abandon(&self, command: &CoordinateCommand) -> Option<Cancellation> {
        let reason = format!(
            "command {} (step {}) failed {} time(s)",
            command.id, command.step, command.attempt
        );
        self.retire(command.defect_id, &reason).ok()
    }

    /// Swap the safety constraints and re-check every queued, unassigned
    /// command. Defects with a command that no longer passes are cancelled.
    pub fn update_constraints(&self, constraints: SafetyConstraints) -> Vec<Cancellation> {
        let validator = SafetyValidator::new(constraints);
        *self.validator.write() = validator.clone();

        let mut invalid: BTreeSet<DefectId> = self
            .queue
            .retain_pending(|c| validator.validate_static(c).is_ok())
            .into_iter()
            .map(|c| c.defect_id)
            .collect();
        invalid.extend(
            self.blocked
                .lock()
                .iter()
                .filter(|c| validator.validate_static(c).is_err())
                .map(|c| c.defect_id),
        );

        info!(invalidated = invalid.len(), "Safety constraints updated");
        invalid
            .into_iter()
            .filter_map(|id| {
                self.retire(id, "queued command violates updated safety constraints")
                    .ok()
            })
            .collect()
    }

    fn retire(&self, defect_id: DefectId, reason: &str) -> Result<Cancellation, HubError> {
        let record = {
            let mut guard = self.defects.write();
            let store = &mut *guard;
            let record = store
                .records
                .get_mut(&defect_id)
                .ok_or_else(|| HubError::not_found("defect", defect_id))?;
            record.mark_unrepairable(reason)?;
            let record = record.clone();
            store.unindex(&record);
            record
        };

        let mut dropped = self.queue.remove_defect(defect_id);
        {
            let mut blocked = self.blocked.lock();
            let (gone, keep): (Vec<_>, Vec<_>) = blocked.drain(..).partition(|c| c.defect_id == defect_id);
            *blocked = keep.into();
            dropped.extend(gone);
        }

        self.metrics.incr(Counter::DefectsUnrepairable);
        warn!(
            %defect_id,
            correlation_id = %record.correlation_id,
            reason,
            dropped = dropped.len(),
            "Defect marked unrepairable; needs human review"
        );
        self.event_bus.publish_defect_event(DefectEvent::DefectUnrepairable {
            defect_id,
            correlation_id: record.correlation_id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        Ok(Cancellation { record, dropped })
    }
}

/// Turn planner output into a validated repair path for `defect_id`.
/// Collisions are left to the coordinator at assignment time.
fn build_path(
    defect_id: DefectId,
    coordinate: &SensorCoordinate,
    planned: PlannedPath,
    validator: &SafetyValidator,
) -> Result<RepairPath, PlanningError> {
    let severity = coordinate.priority();
    let commands = planned
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let command = CoordinateCommand::new(
                defect_id,
                step.target(),
                step.action_type()?,
                step.thermal_budget,
                severity,
                coordinate.correlation_id.clone(),
            )
            .with_step(i);
            Ok(match step.estimated_duration_ms {
                Some(ms) => command.with_duration_ms(ms),
                None => command,
            })
        })
        .collect::<Result<Vec<_>, PlanningError>>()?;

    let mut path = RepairPath::new(defect_id, commands, severity, coordinate.correlation_id.clone());

    validator
        .validate_path_static(&path)
        .map_err(PlanningError::UnsafePath)?;
    path.mark_validated()
        .map_err(|e| PlanningError::Malformed(e.to_string()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::coordinate::DefectType;
    use crate::domain::planner::PlannedStep;

    fn coordinate(x: f64, severity: i32) -> SensorCoordinate {
        SensorCoordinate {
            x,
            y: 1.0,
            z: 0.5,
            defect_type: DefectType("void".into()),
            severity,
            timestamp: Utc::now(),
            correlation_id: CorrelationId::from("trace-7"),
        }
    }

    fn step(x: f64, action: &str, thermal: f64) -> PlannedStep {
        PlannedStep {
            target_x: x,
            target_y: 1.0,
            target_z: 0.5,
            action: action.into(),
            thermal_budget: thermal,
            estimated_duration_ms: Some(250),
        }
    }

    #[test]
    fn test_build_path_inherits_correlation() {
        let defect_id = DefectId::new();
        let planned = PlannedPath {
            steps: vec![step(1.0, "move", 0.0), step(1.0, "repair", 80.0)],
        };
        let path = build_path(defect_id, &coordinate(1.0, 7), planned, &SafetyValidator::default()).unwrap();

        assert!(path.safety_validated);
        assert_eq!(path.priority, 7);
        assert_eq!(path.estimated_time_ms, 500);
        for (i, cmd) in path.commands.iter().enumerate() {
            assert_eq!(cmd.correlation_id.as_str(), "trace-7");
            assert_eq!(cmd.step, i);
            assert_eq!(cmd.severity, 7);
        }
    }

    #[test]
    fn test_build_path_rejects_hot_step() {
        let planned = PlannedPath {
            steps: vec![step(1.0, "repair", 130.0)],
        };
        let err = build_path(DefectId::new(), &coordinate(1.0, 5), planned, &SafetyValidator::default())
            .unwrap_err();
        match err {
            PlanningError::UnsafePath(violations) => {
                assert_eq!(violations.first().unwrap().field, "steps[0].thermal_budget");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_build_path_checks_each_step_statically() {
        let planned = PlannedPath {
            steps: vec![step(1.0, "move", 0.0), step(1.05, "repair", 50.0)],
        };
        let err = build_path(DefectId::new(), &coordinate(1.0, 5), planned, &SafetyValidator::default())
            .unwrap_err();
        match err {
            PlanningError::UnsafePath(violations) => {
                assert_eq!(violations.first().unwrap().field, "steps[1].target.x");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_build_path_rejects_empty_plan() {
        let planned = PlannedPath { steps: vec![] };
        let err = build_path(DefectId::new(), &coordinate(1.0, 5), planned, &SafetyValidator::default())
            .unwrap_err();
        match err {
            PlanningError::UnsafePath(violations) => {
                assert_eq!(violations.first().unwrap().field, "commands");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
