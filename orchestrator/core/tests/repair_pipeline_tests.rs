// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use qnms_core::application::command_queue::CommandQueue;
use qnms_core::application::metrics::{Counter, HubMetrics};
use qnms_core::application::repair_pipeline::{
    shared_validator, IngestOutcome, PipelineConfig, PlanOutcome, RepairPipeline, StepOutcome,
};
use qnms_core::domain::agent::{ActiveAgent, AgentCapabilities, AgentId, FleetView};
use qnms_core::domain::command::CommandStatus;
use qnms_core::domain::coordinate::{CorrelationId, DefectType, Position, SensorCoordinate};
use qnms_core::domain::defect::DefectStatus;
use qnms_core::domain::events::DefectEvent;
use qnms_core::domain::planner::{PathPlanner, PlannedPath, PlannedStep, PlanningError, PlanningRequest};
use qnms_core::domain::safety::{NoGoZone, SafetyConstraints};
use qnms_core::infrastructure::event_bus::{EventBus, HubEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Answers every request with a path at the defect's own location. Each call
/// pops the next set of thermal budgets; the last set repeats.
struct EchoPlanner {
    calls: AtomicU32,
    budgets: Mutex<VecDeque<Vec<f64>>>,
}

impl EchoPlanner {
    fn new(budgets: Vec<Vec<f64>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            budgets: Mutex::new(budgets.into()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PathPlanner for EchoPlanner {
    async fn plan(&self, request: &PlanningRequest) -> Result<PlannedPath, PlanningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let budgets = {
            let mut queue = self.budgets.lock();
            if queue.len() > 1 {
                queue.pop_front().unwrap_or_default()
            } else {
                queue.front().cloned().unwrap_or_default()
            }
        };
        let defect = &request.defects[0];
        let steps = budgets
            .into_iter()
            .map(|thermal| PlannedStep {
                target_x: defect.x,
                target_y: defect.y,
                target_z: defect.z,
                action: if thermal > 0.0 { "repair" } else { "move" }.to_string(),
                thermal_budget: thermal,
                estimated_duration_ms: None,
            })
            .collect();
        Ok(PlannedPath { steps })
    }
}

struct FailingPlanner;

#[async_trait]
impl PathPlanner for FailingPlanner {
    async fn plan(&self, _request: &PlanningRequest) -> Result<PlannedPath, PlanningError> {
        Err(PlanningError::Unavailable("connection refused".to_string()))
    }
}

struct EmptyFleet;

impl FleetView for EmptyFleet {
    fn active_agents(&self) -> Vec<ActiveAgent> {
        Vec::new()
    }
}

/// One agent at work 0.3 nm from (4, 4, 0.5).
struct BusyNeighbour;

impl FleetView for BusyNeighbour {
    fn active_agents(&self) -> Vec<ActiveAgent> {
        let spot = Position::new(4.3, 4.0, 0.5);
        vec![ActiveAgent {
            agent_id: AgentId::new("neighbour"),
            position: spot,
            target: Some(spot),
        }]
    }
}

fn pipeline(planner: Arc<dyn PathPlanner>) -> (RepairPipeline, Arc<CommandQueue>, Arc<HubMetrics>, EventBus) {
    pipeline_with_fleet(planner, Arc::new(EmptyFleet))
}

fn pipeline_with_fleet(
    planner: Arc<dyn PathPlanner>,
    fleet: Arc<dyn FleetView>,
) -> (RepairPipeline, Arc<CommandQueue>, Arc<HubMetrics>, EventBus) {
    let queue = Arc::new(CommandQueue::new());
    let metrics = Arc::new(HubMetrics::new());
    let bus = EventBus::with_default_capacity();
    let pipeline = RepairPipeline::new(
        queue.clone(),
        shared_validator(SafetyConstraints::default()),
        planner,
        fleet,
        PipelineConfig::default(),
        bus.clone(),
        metrics.clone(),
    );
    (pipeline, queue, metrics, bus)
}

fn coordinate(x: f64, y: f64, severity: i32, trace: &str) -> SensorCoordinate {
    SensorCoordinate {
        x,
        y,
        z: 0.5,
        defect_type: DefectType("vacancy".to_string()),
        severity,
        timestamp: Utc::now(),
        correlation_id: CorrelationId::from(trace),
    }
}

fn accepted_id(outcome: &IngestOutcome) -> qnms_core::domain::defect::DefectId {
    match outcome {
        IngestOutcome::Accepted { defect_id, .. } => *defect_id,
        other => panic!("expected acceptance, got {:?}", other),
    }
}

#[tokio::test]
async fn test_commands_dequeue_by_severity() {
    let (pipeline, queue, _, _) = pipeline(EchoPlanner::new(vec![vec![60.0]]));

    let outcomes = pipeline.ingest(vec![
        coordinate(1.0, 1.0, 8, "a"),
        coordinate(3.0, 1.0, 3, "b"),
        coordinate(5.0, 1.0, 5, "c"),
    ]);
    assert!(outcomes.iter().all(IngestOutcome::is_accepted));

    let planned = pipeline.plan_pending().await;
    assert_eq!(planned.len(), 3);
    assert!(planned.iter().all(|(_, o)| *o == PlanOutcome::Repairing { steps: 1 }));

    let caps = AgentCapabilities::all();
    let order: Vec<u8> = std::iter::from_fn(|| queue.dequeue_next(&caps))
        .map(|c| c.severity)
        .collect();
    assert_eq!(order, vec![8, 5, 3]);
}

#[tokio::test]
async fn test_invalid_coordinate_never_reaches_planner() {
    let planner = EchoPlanner::new(vec![vec![60.0]]);
    let (pipeline, queue, metrics, _) = pipeline(planner.clone());

    let outcomes = pipeline.ingest(vec![coordinate(1.05, 1.0, 5, "bad"), coordinate(1.0, 1.0, 11, "worse")]);
    match &outcomes[0] {
        IngestOutcome::Rejected { violations, correlation_id } => {
            assert_eq!(correlation_id.as_str(), "bad");
            assert_eq!(violations.first().unwrap().field, "x");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(!outcomes[1].is_accepted());

    assert!(pipeline.plan_pending().await.is_empty());
    assert_eq!(planner.calls(), 0);
    assert!(pipeline.defects().is_empty());
    assert!(queue.is_empty());
    assert_eq!(metrics.get(Counter::SensorRejected), 2);
}

#[tokio::test]
async fn test_hot_plan_is_replanned_once_then_unrepairable() {
    let planner = EchoPlanner::new(vec![vec![130.0]]);
    let (pipeline, queue, metrics, bus) = pipeline(planner.clone());
    let mut events = bus.subscribe();

    let id = accepted_id(&pipeline.ingest(vec![coordinate(2.0, 2.0, 6, "hot")])[0]);
    let outcome = pipeline.plan_defect(id).await;

    assert!(matches!(outcome, PlanOutcome::Unrepairable { .. }));
    assert_eq!(planner.calls(), 2);
    assert!(queue.is_empty());

    let record = pipeline.defect(id).unwrap();
    assert_eq!(record.status, DefectStatus::Unrepairable);
    assert_eq!(record.planning_attempts, 2);
    assert!(record.failure_reason.unwrap().contains("thermal"));
    assert_eq!(metrics.get(Counter::PlanningFailures), 2);
    assert_eq!(metrics.get(Counter::DefectsUnrepairable), 1);

    let mut failed = 0;
    let mut unrepairable = false;
    while let Ok(event) = events.try_recv() {
        match event {
            HubEvent::Defect(DefectEvent::PlanningFailed { .. }) => failed += 1,
            HubEvent::Defect(DefectEvent::DefectUnrepairable { correlation_id, .. }) => {
                assert_eq!(correlation_id.as_str(), "hot");
                unrepairable = true;
            }
            _ => {}
        }
    }
    assert_eq!(failed, 2);
    assert!(unrepairable);
}

#[tokio::test]
async fn test_replan_recovers_from_unsafe_plan() {
    let planner = EchoPlanner::new(vec![vec![150.0], vec![0.0, 90.0]]);
    let (pipeline, queue, _, _) = pipeline(planner.clone());

    let id = accepted_id(&pipeline.ingest(vec![coordinate(2.0, 2.0, 6, "retry")])[0]);
    assert_eq!(pipeline.plan_defect(id).await, PlanOutcome::Repairing { steps: 2 });
    assert_eq!(planner.calls(), 2);

    let record = pipeline.defect(id).unwrap();
    assert_eq!(record.status, DefectStatus::Repairing);
    let path = record.repair_path.unwrap();
    assert!(path.safety_validated);
    assert!(path.commands.iter().all(|c| c.correlation_id.as_str() == "retry"));
    // one step at a time
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_unavailable_planner_exhausts_attempts() {
    let (pipeline, queue, _, _) = pipeline(Arc::new(FailingPlanner));
    let id = accepted_id(&pipeline.ingest(vec![coordinate(2.0, 2.0, 4, "down")])[0]);

    let outcome = pipeline.plan_defect(id).await;
    match outcome {
        PlanOutcome::Unrepairable { reason } => assert!(reason.contains("connection refused")),
        other => panic!("unexpected {:?}", other),
    }
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_steps_release_in_order_until_completion() {
    let (pipeline, queue, metrics, _) = pipeline(EchoPlanner::new(vec![vec![0.0, 80.0]]));
    let id = accepted_id(&pipeline.ingest(vec![coordinate(4.0, 1.0, 7, "steps")])[0]);
    pipeline.plan_defect(id).await;

    let caps = AgentCapabilities::all();
    let first = queue.dequeue_next(&caps).unwrap();
    assert_eq!(first.step, 0);
    let first = queue.mark(first.id, CommandStatus::Completed).unwrap();

    let second = match pipeline.on_command_completed(&first) {
        StepOutcome::NextStep(cmd) => cmd,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(second.step, 1);
    assert_eq!(second.correlation_id.as_str(), "steps");

    // a late duplicate completion of step 0 changes nothing
    assert_eq!(pipeline.on_command_completed(&first), StepOutcome::Ignored);

    let second = queue.dequeue_next(&caps).unwrap();
    let second = queue.mark(second.id, CommandStatus::Completed).unwrap();
    assert_eq!(pipeline.on_command_completed(&second), StepOutcome::DefectCompleted(id));

    let record = pipeline.defect(id).unwrap();
    assert_eq!(record.status, DefectStatus::Completed);
    assert!(record.completion_time.is_some());
    assert_eq!(metrics.get(Counter::DefectsCompleted), 1);
}

#[tokio::test]
async fn test_second_report_merges_into_active_defect() {
    let planner = EchoPlanner::new(vec![vec![50.0]]);
    let (pipeline, _, _, _) = pipeline(planner.clone());

    let first = pipeline.ingest(vec![coordinate(6.0, 6.0, 5, "one")]);
    let second = pipeline.ingest(vec![coordinate(6.0, 6.0, 9, "two")]);
    assert_eq!(accepted_id(&first[0]), accepted_id(&second[0]));
    assert!(matches!(second[0], IngestOutcome::Accepted { merged: true, .. }));

    pipeline.plan_pending().await;
    assert_eq!(planner.calls(), 1);
    assert_eq!(pipeline.defects().len(), 1);
}

#[tokio::test]
async fn test_report_after_completion_opens_new_defect() {
    let (pipeline, queue, _, _) = pipeline(EchoPlanner::new(vec![vec![50.0]]));
    let id = accepted_id(&pipeline.ingest(vec![coordinate(6.0, 6.0, 5, "one")])[0]);
    pipeline.plan_defect(id).await;

    let cmd = queue.dequeue_next(&AgentCapabilities::all()).unwrap();
    let cmd = queue.mark(cmd.id, CommandStatus::Completed).unwrap();
    pipeline.on_command_completed(&cmd);

    let again = pipeline.ingest(vec![coordinate(6.0, 6.0, 5, "two")]);
    assert_ne!(accepted_id(&again[0]), id);
}

#[tokio::test]
async fn test_cancel_drops_queued_commands() {
    let (pipeline, queue, _, _) = pipeline(EchoPlanner::new(vec![vec![40.0]]));
    let id = accepted_id(&pipeline.ingest(vec![coordinate(8.0, 8.0, 5, "cancel")])[0]);
    pipeline.plan_defect(id).await;
    assert_eq!(queue.len(), 1);

    let cancellation = pipeline.cancel_defect(id, "operator request").unwrap();
    assert_eq!(cancellation.dropped.len(), 1);
    assert_eq!(cancellation.record.status, DefectStatus::Unrepairable);
    assert!(queue.is_empty());

    // terminal records refuse further changes
    assert!(pipeline.cancel_defect(id, "again").is_err());
}

#[tokio::test]
async fn test_constraint_update_revalidates_pending() {
    let (pipeline, queue, _, _) = pipeline(EchoPlanner::new(vec![vec![40.0]]));
    let inside = accepted_id(&pipeline.ingest(vec![coordinate(4.5, 4.5, 5, "zone")])[0]);
    let outside = accepted_id(&pipeline.ingest(vec![coordinate(9.0, 9.0, 5, "free")])[0]);
    pipeline.plan_pending().await;
    assert_eq!(queue.len(), 2);

    let cancelled = pipeline.update_constraints(SafetyConstraints {
        no_go_zones: vec![NoGoZone::new(Position::new(4.0, 4.0, 0.0), Position::new(5.0, 5.0, 2.0))],
        ..Default::default()
    });

    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].record.defect_id, inside);
    assert_eq!(pipeline.defect(outside).unwrap().status, DefectStatus::Repairing);
    assert_eq!(queue.len(), 1);
    assert_eq!(pipeline.validator().read().constraints().no_go_zones.len(), 1);
}

#[tokio::test]
async fn test_defect_next_to_active_repair_is_still_planned() {
    let (pipeline, queue, metrics, _) =
        pipeline_with_fleet(EchoPlanner::new(vec![vec![0.0, 70.0]]), Arc::new(BusyNeighbour));
    let defect_id = accepted_id(&pipeline.ingest(vec![coordinate(4.0, 4.0, 6, "near")])[0]);

    let planned = pipeline.plan_pending().await;
    assert_eq!(planned, vec![(defect_id, PlanOutcome::Repairing { steps: 2 })]);
    assert_eq!(pipeline.defect(defect_id).unwrap().status, DefectStatus::Repairing);
    assert_eq!(queue.len(), 1);
    assert_eq!(metrics.get(Counter::PlanningFailures), 0);
}
