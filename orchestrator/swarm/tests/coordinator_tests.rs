// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use qnms_core::application::command_queue::CommandQueue;
use qnms_core::application::metrics::{Counter, HubMetrics};
use qnms_core::application::repair_pipeline::shared_validator;
use qnms_core::domain::agent::{AgentCapabilities, AgentId, AgentStatus, FleetView};
use qnms_core::domain::command::{
    AckStatus, ActionType, AgentAck, CommandDispatcher, CommandId, CommandStatus, CoordinateCommand,
    DispatchError,
};
use qnms_core::domain::coordinate::{CorrelationId, Position};
use qnms_core::domain::defect::DefectId;
use qnms_core::domain::hub_config::CoordinatorConfig;
use qnms_core::domain::safety::SafetyConstraints;
use qnms_core::infrastructure::event_bus::EventBus;
use qnms_swarm::{AckOutcome, AgentReport, SwarmCoordinator};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Default)]
struct RecordingDispatcher {
    sent: Mutex<Vec<CommandId>>,
    retracted: Mutex<Vec<CommandId>>,
}

impl CommandDispatcher for RecordingDispatcher {
    fn dispatch(&self, command: &CoordinateCommand) -> Result<(), DispatchError> {
        self.sent.lock().push(command.id);
        Ok(())
    }

    fn retract(&self, command_id: CommandId) {
        self.retracted.lock().push(command_id);
    }
}

struct Fixture {
    coordinator: SwarmCoordinator,
    queue: Arc<CommandQueue>,
    dispatcher: Arc<RecordingDispatcher>,
    metrics: Arc<HubMetrics>,
}

fn fixture(agents: &[(&str, Position)]) -> Fixture {
    let queue = Arc::new(CommandQueue::new());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let metrics = Arc::new(HubMetrics::new());
    let coordinator = SwarmCoordinator::new(
        queue.clone(),
        shared_validator(SafetyConstraints::default()),
        dispatcher.clone(),
        CoordinatorConfig::default(),
        EventBus::with_default_capacity(),
        metrics.clone(),
    );
    for (name, position) in agents {
        coordinator
            .register_agent(AgentId::new(*name), *position, AgentCapabilities::all())
            .unwrap();
    }
    Fixture {
        coordinator,
        queue,
        dispatcher,
        metrics,
    }
}

fn command(x: f64, y: f64, trace: &str) -> CoordinateCommand {
    CoordinateCommand::new(
        DefectId::new(),
        Position::new(x, y, 0.5),
        ActionType::Repair,
        75.0,
        5,
        CorrelationId::from(trace),
    )
}

fn ack(command: &CoordinateCommand, status: AckStatus) -> AgentAck {
    AgentAck {
        command_id: command.id,
        status,
    }
}

#[test]
fn test_round_robin_one_command_per_idle_agent() {
    let f = fixture(&[
        ("a", Position::new(0.0, 0.0, 0.0)),
        ("b", Position::new(0.0, 5.0, 0.0)),
        ("c", Position::new(0.0, 9.0, 0.0)),
    ]);
    for i in 0..5 {
        f.queue.enqueue(command(1.0 + 2.0 * i as f64, 1.0, "rr")).unwrap();
    }

    let report = f.coordinator.tick();
    assert_eq!(report.assigned.len(), 3);
    assert_eq!(f.queue.stats().size, 2);

    let owners: HashSet<AgentId> = report
        .assigned
        .iter()
        .map(|c| c.agent_id.clone().unwrap())
        .collect();
    assert_eq!(owners.len(), 3);
    for agent in f.coordinator.agents() {
        assert_eq!(agent.status, AgentStatus::Moving);
        assert!(agent.current_command.is_some());
    }
    assert_eq!(f.dispatcher.sent.lock().len(), 3);

    // every agent is busy: nothing moves until one reports back
    assert!(f.coordinator.tick().assigned.is_empty());
    assert_eq!(f.queue.stats().size, 2);
}

#[test]
fn test_cursor_rotates_when_work_is_scarce() {
    let f = fixture(&[
        ("a", Position::new(0.0, 0.0, 0.0)),
        ("b", Position::new(0.0, 5.0, 0.0)),
        ("c", Position::new(0.0, 9.0, 0.0)),
    ]);

    let mut served = Vec::new();
    for i in 0..3 {
        f.queue.enqueue(command(2.0 + 2.0 * i as f64, 2.0, "scarce")).unwrap();
        let assigned = f.coordinator.tick().assigned;
        assert_eq!(assigned.len(), 1);
        let cmd = &assigned[0];
        let owner = cmd.agent_id.clone().unwrap();
        f.coordinator.on_ack(&owner, ack(cmd, AckStatus::Completed)).unwrap();
        served.push(owner.0);
    }
    assert_eq!(served, ["a", "b", "c"]);
}

#[test]
fn test_silent_agent_work_moves_to_another_agent() {
    let f = fixture(&[("a", Position::new(0.0, 0.0, 0.0)), ("b", Position::new(0.0, 5.0, 0.0))]);
    let t0 = Utc::now();
    let original = command(3.0, 3.0, "orphan");
    f.queue.enqueue(original.clone()).unwrap();

    let first = f.coordinator.tick().assigned;
    assert_eq!(first[0].agent_id, Some(AgentId::new("a")));

    // b keeps reporting, a goes quiet
    f.coordinator
        .on_status(&AgentId::new("b"), &AgentReport::default(), t0 + Duration::seconds(15))
        .unwrap();
    let swept = f.coordinator.check_heartbeats(t0 + Duration::seconds(21));
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].0, AgentId::new("a"));
    let fresh = match &swept[0].1 {
        Some(AckOutcome::Requeued { fresh, .. }) => fresh.clone(),
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(fresh.correlation_id.as_str(), "orphan");
    assert_ne!(fresh.id, original.id);
    assert_eq!(f.queue.get(original.id).unwrap().status, CommandStatus::Failed);

    let a = f.coordinator.agent_state(&AgentId::new("a")).unwrap();
    assert_eq!(a.status, AgentStatus::Error);
    assert!(a.current_command.is_none());

    let second = f.coordinator.tick().assigned;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, fresh.id);
    assert_eq!(second[0].agent_id, Some(AgentId::new("b")));
    assert_eq!(f.metrics.get(Counter::CommandsRequeued), 1);

    // the errored agent stays out of rotation until it registers again
    f.coordinator
        .register_agent(AgentId::new("a"), Position::new(0.0, 0.0, 0.0), AgentCapabilities::all())
        .unwrap();
    assert_eq!(
        f.coordinator.agent_state(&AgentId::new("a")).unwrap().status,
        AgentStatus::Idle
    );
}

#[test]
fn test_close_targets_never_assigned_together() {
    let f = fixture(&[("a", Position::new(0.0, 0.0, 0.0)), ("b", Position::new(0.0, 9.0, 0.0))]);
    let near = command(4.0, 4.0, "near-1");
    let nearer = command(4.3, 4.0, "near-2");
    f.queue.enqueue(near.clone()).unwrap();
    f.queue.enqueue(nearer.clone()).unwrap();

    let report = f.coordinator.tick();
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].id, near.id);
    assert_eq!(report.deferred, vec![nearer.id]);
    assert_eq!(f.queue.get(nearer.id).unwrap().status, CommandStatus::Pending);

    // deferred, not dropped: it goes out once the first target is free
    let owner = report.assigned[0].agent_id.clone().unwrap();
    f.coordinator.on_ack(&owner, ack(&near, AckStatus::Completed)).unwrap();
    let report = f.coordinator.tick();
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].id, nearer.id);
}

#[test]
fn test_parked_agent_blocks_nearby_target() {
    let f = fixture(&[("b", Position::new(0.0, 9.0, 0.0))]);
    // a only scans, so it sits idle at (4, 4, 0.5) for the whole test
    let a = AgentId::new("a");
    f.coordinator
        .register_agent(a.clone(), Position::new(4.0, 4.0, 0.5), AgentCapabilities::only([ActionType::Scan]))
        .unwrap();
    let blocked = command(4.2, 4.0, "parked");
    let clear = command(8.0, 1.0, "clear");
    f.queue.enqueue(blocked.clone()).unwrap();
    f.queue.enqueue(clear.clone()).unwrap();

    let report = f.coordinator.tick();
    assert_eq!(report.deferred, vec![blocked.id]);
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].id, clear.id);
    assert_eq!(f.queue.get(blocked.id).unwrap().status, CommandStatus::Pending);

    // once the parked agent moves away the target is free
    let moved = AgentReport {
        position: Some(Position::new(9.0, 9.0, 0.5)),
        thermal_state: None,
    };
    f.coordinator.on_status(&a, &moved, Utc::now()).unwrap();
    f.coordinator
        .on_ack(&AgentId::new("b"), ack(&clear, AckStatus::Completed))
        .unwrap();
    let report = f.coordinator.tick();
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].id, blocked.id);
}

#[test]
fn test_ack_lifecycle() {
    let f = fixture(&[("a", Position::new(0.0, 0.0, 0.0))]);
    let a = AgentId::new("a");
    let cmd = command(6.0, 2.0, "life");
    f.queue.enqueue(cmd.clone()).unwrap();
    f.coordinator.tick();

    assert_eq!(f.coordinator.on_ack(&a, ack(&cmd, AckStatus::Received)).unwrap(), AckOutcome::Noted);
    assert_eq!(f.coordinator.agent_state(&a).unwrap().status, AgentStatus::Moving);

    f.coordinator.on_ack(&a, ack(&cmd, AckStatus::Processing)).unwrap();
    assert_eq!(f.coordinator.agent_state(&a).unwrap().status, AgentStatus::Repairing);

    match f.coordinator.on_ack(&a, ack(&cmd, AckStatus::Completed)).unwrap() {
        AckOutcome::Completed(done) => {
            assert_eq!(done.id, cmd.id);
            assert_eq!(done.status, CommandStatus::Completed);
            assert_eq!(done.correlation_id.as_str(), "life");
        }
        other => panic!("unexpected {:?}", other),
    }
    let state = f.coordinator.agent_state(&a).unwrap();
    assert_eq!(state.status, AgentStatus::Idle);
    assert_eq!(state.current_position, cmd.target);
    assert_eq!(f.metrics.get(Counter::CommandsCompleted), 1);

    // completed commands never come back
    assert!(f.coordinator.on_ack(&a, ack(&cmd, AckStatus::Failed)).is_err());
}

#[test]
fn test_undelivered_command_requeued() {
    let f = fixture(&[("a", Position::new(0.0, 0.0, 0.0))]);
    let cmd = command(7.0, 7.0, "lost");
    f.queue.enqueue(cmd.clone()).unwrap();
    f.coordinator.tick();

    match f.coordinator.on_delivery_failed(cmd.id).unwrap() {
        AckOutcome::Requeued { fresh, .. } => assert_eq!(fresh.attempt, 2),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        f.coordinator.agent_state(&AgentId::new("a")).unwrap().status,
        AgentStatus::Idle
    );
    assert!(f.coordinator.on_delivery_failed(cmd.id).is_err());
}

#[test]
fn test_withdrawn_defect_frees_agent() {
    let f = fixture(&[("a", Position::new(0.0, 0.0, 0.0))]);
    let cmd = command(5.0, 5.0, "withdraw");
    f.queue.enqueue(cmd.clone()).unwrap();
    f.coordinator.tick();

    let dropped = f.queue.remove_defect(cmd.defect_id);
    assert_eq!(
        f.coordinator.withdraw_defect(cmd.defect_id, &dropped),
        vec![AgentId::new("a")]
    );
    assert_eq!(
        f.coordinator.agent_state(&AgentId::new("a")).unwrap().status,
        AgentStatus::Idle
    );
    // held by the agent and dropped from the queue: retracted once
    assert_eq!(*f.dispatcher.retracted.lock(), vec![cmd.id]);
}

#[test]
fn test_withdrawal_retracts_queued_commands_of_defect() {
    let f = fixture(&[]);
    let queued = command(5.0, 5.0, "queued");
    f.queue.enqueue(queued.clone()).unwrap();

    let dropped = f.queue.remove_defect(queued.defect_id);
    assert!(f.coordinator.withdraw_defect(queued.defect_id, &dropped).is_empty());
    assert_eq!(*f.dispatcher.retracted.lock(), vec![queued.id]);
}

#[test]
fn test_requeued_command_is_retracted_from_transport() {
    let f = fixture(&[("a", Position::new(0.0, 0.0, 0.0))]);
    let a = AgentId::new("a");
    let cmd = command(6.0, 6.0, "retry");
    f.queue.enqueue(cmd.clone()).unwrap();
    f.coordinator.tick();

    let fresh = match f.coordinator.on_ack(&a, ack(&cmd, AckStatus::Failed)).unwrap() {
        AckOutcome::Requeued { fresh, .. } => fresh,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(*f.dispatcher.retracted.lock(), vec![cmd.id]);

    // the replacement goes out; the failed instance never does again
    let assigned = f.coordinator.tick().assigned;
    assert_eq!(assigned[0].id, fresh.id);
    assert_eq!(*f.dispatcher.sent.lock(), vec![cmd.id, fresh.id]);
}

#[test]
fn test_silent_agent_command_is_retracted() {
    let f = fixture(&[("a", Position::new(0.0, 0.0, 0.0))]);
    let cmd = command(6.0, 6.0, "silent");
    f.queue.enqueue(cmd.clone()).unwrap();
    f.coordinator.tick();

    f.coordinator.on_heartbeat_timeout(&AgentId::new("a")).unwrap();
    assert_eq!(*f.dispatcher.retracted.lock(), vec![cmd.id]);
}

#[test]
fn test_fleet_view_reports_targets() {
    let f = fixture(&[("a", Position::new(1.0, 1.0, 0.0)), ("b", Position::new(2.0, 2.0, 0.0))]);
    let cmd = command(8.0, 8.0, "fleet");
    f.queue.enqueue(cmd.clone()).unwrap();
    f.coordinator.tick();

    let fleet = f.coordinator.active_agents();
    assert_eq!(fleet.len(), 2);
    let a = fleet.iter().find(|x| x.agent_id.as_str() == "a").unwrap();
    assert_eq!(a.position, Position::new(1.0, 1.0, 0.0));
    assert_eq!(a.target, Some(cmd.target));
    let b = fleet.iter().find(|x| x.agent_id.as_str() == "b").unwrap();
    assert_eq!(b.target, None);
}
