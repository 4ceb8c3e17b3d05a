// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Command Queue
//!
//! Priority-ordered, deduplicated holding area for validated commands.
//!
//! - **Ordering**: severity of the originating defect (descending), then
//!   insertion order. Equal-severity work is strictly FIFO.
//! - **Deduplication**: at most one *active* (pending or in-progress) command
//!   per 0.1 nm neighbourhood. A duplicate is refused with
//!   [`QueueError::Duplicate`] so the caller sees it.
//! - **Delivery**: a dequeued command leaves the pending set under the same
//!   lock that selected it, so it is handed to exactly one consumer.
//!
//! All state lives behind one `parking_lot::Mutex`; no method calls out of the
//! queue while holding it.

use crate::domain::agent::{AgentCapabilities, AgentId};
use crate::domain::command::{CommandError, CommandId, CommandStatus, CoordinateCommand};
use crate::domain::coordinate::{GridPoint, Position};
use crate::domain::defect::DefectId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Finished commands kept for status lookups.
pub const DEFAULT_RETENTION: usize = 10_000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("target {target} is already claimed by active command {existing}")]
    Duplicate { existing: CommandId, target: Position },

    #[error("command {0} is already in the queue")]
    AlreadyQueued(CommandId),

    #[error("only pending commands can be enqueued; {0} is {1}")]
    NotPending(CommandId, CommandStatus),

    #[error("command {0} is not active")]
    NotFound(CommandId),

    #[error(transparent)]
    Transition(#[from] CommandError),
}

/// Outcome of failing a command that may be retried.
#[derive(Debug, Clone, PartialEq)]
pub enum Requeue {
    /// A fresh pending instance (same correlation id) took its place.
    Reissued {
        failed: CoordinateCommand,
        fresh: CoordinateCommand,
    },
    /// The attempt limit was reached; nothing was re-enqueued.
    Exhausted(CoordinateCommand),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Pending commands awaiting assignment.
    pub size: usize,
    pub in_progress: usize,
    pub enqueued_total: u64,
    pub dispatched_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub duplicates_rejected: u64,
    /// Completions per second over the last minute.
    pub throughput: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    severity: Reverse<u8>,
    seq: u64,
}

#[derive(Debug)]
struct Entry {
    command: CoordinateCommand,
    key: QueueKey,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: u64,
    dispatched: u64,
    completed: u64,
    failed: u64,
    duplicates: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: BTreeMap<QueueKey, CommandId>,
    active: HashMap<CommandId, Entry>,
    targets: HashMap<GridPoint, CommandId>,
    finished: HashMap<CommandId, CoordinateCommand>,
    finished_order: VecDeque<CommandId>,
    completions: VecDeque<Instant>,
    next_seq: u64,
    counters: Counters,
}

impl QueueState {
    fn claimant(&self, target: &Position) -> Option<CommandId> {
        target
            .grid_point()
            .neighbourhood()
            .iter()
            .find_map(|p| self.targets.get(p).copied())
    }

    fn insert(&mut self, command: CoordinateCommand) -> Result<(), QueueError> {
        if command.status != CommandStatus::Pending {
            return Err(QueueError::NotPending(command.id, command.status));
        }
        if self.active.contains_key(&command.id) {
            return Err(QueueError::AlreadyQueued(command.id));
        }
        if let Some(existing) = self.claimant(&command.target) {
            self.counters.duplicates += 1;
            return Err(QueueError::Duplicate {
                existing,
                target: command.target,
            });
        }
        let key = QueueKey {
            severity: Reverse(command.severity),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.targets.insert(command.target.grid_point(), command.id);
        self.pending.insert(key, command.id);
        self.active.insert(command.id, Entry { command, key });
        self.counters.enqueued += 1;
        Ok(())
    }

    /// Move an active command to a terminal status and out of the active set.
    fn finish(
        &mut self,
        id: CommandId,
        status: CommandStatus,
        retention: usize,
    ) -> Result<CoordinateCommand, QueueError> {
        let entry = self.active.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        entry.command.transition(status)?;
        let Entry { command, key } = self
            .active
            .remove(&id)
            .ok_or(QueueError::NotFound(id))?;

        self.pending.remove(&key);
        let grid = command.target.grid_point();
        if self.targets.get(&grid) == Some(&id) {
            self.targets.remove(&grid);
        }
        match status {
            CommandStatus::Completed => {
                self.counters.completed += 1;
                self.completions.push_back(Instant::now());
            }
            _ => self.counters.failed += 1,
        }

        self.finished.insert(id, command.clone());
        self.finished_order.push_back(id);
        while self.finished_order.len() > retention {
            if let Some(old) = self.finished_order.pop_front() {
                self.finished.remove(&old);
            }
        }
        Ok(command)
    }

    fn publish_depth(&self) {
        metrics::gauge!("qnms_queue_depth").set(self.pending.len() as f64);
    }
}

pub struct CommandQueue {
    state: Mutex<QueueState>,
    retention: usize,
    created_at: Instant,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            retention,
            created_at: Instant::now(),
        }
    }

    /// Add a pending command. Duplicates of an active target are refused.
    pub fn enqueue(&self, command: CoordinateCommand) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let id = command.id;
        state.insert(command)?;
        state.publish_depth();
        debug!(command_id = %id, depth = state.pending.len(), "Command enqueued");
        Ok(())
    }

    /// Highest-priority pending command the capabilities allow, marked in progress.
    pub fn dequeue_next(&self, capabilities: &AgentCapabilities) -> Option<CoordinateCommand> {
        self.dequeue_where(None, capabilities, |_| true)
    }

    /// Like [`dequeue_next`](Self::dequeue_next), but skips commands rejected
    /// by `accept` and stamps the chosen one with `agent`.
    ///
    /// Skipped commands keep their position, so a deferred head item is still
    /// the head on the next call.
    pub fn dequeue_where<F>(
        &self,
        agent: Option<&AgentId>,
        capabilities: &AgentCapabilities,
        mut accept: F,
    ) -> Option<CoordinateCommand>
    where
        F: FnMut(&CoordinateCommand) -> bool,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let (key, id) = state
            .pending
            .iter()
            .find(|(_, id)| {
                state.active.get(id).is_some_and(|entry| {
                    capabilities.supports(entry.command.action_type) && accept(&entry.command)
                })
            })
            .map(|(key, id)| (*key, *id))?;

        let entry = state.active.get_mut(&id)?;
        entry.command.transition(CommandStatus::InProgress).ok()?;
        entry.command.agent_id = agent.cloned();
        let command = entry.command.clone();

        state.pending.remove(&key);
        state.counters.dispatched += 1;
        state.publish_depth();
        Some(command)
    }

    /// Return an in-progress command to its original place in the queue.
    pub fn release(&self, id: CommandId) -> Result<(), QueueError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let entry = state.active.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        entry.command.transition(CommandStatus::Pending)?;
        entry.command.agent_id = None;
        state.pending.insert(entry.key, id);
        state.publish_depth();
        Ok(())
    }

    /// Apply a status transition and return the updated command.
    pub fn mark(&self, id: CommandId, status: CommandStatus) -> Result<CoordinateCommand, QueueError> {
        match status {
            CommandStatus::Pending => {
                self.release(id)?;
                self.get(id).ok_or(QueueError::NotFound(id))
            }
            CommandStatus::InProgress => {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                let entry = state.active.get_mut(&id).ok_or(QueueError::NotFound(id))?;
                entry.command.transition(CommandStatus::InProgress)?;
                let key = entry.key;
                let command = entry.command.clone();
                state.pending.remove(&key);
                state.counters.dispatched += 1;
                state.publish_depth();
                Ok(command)
            }
            CommandStatus::Completed | CommandStatus::Failed => {
                let mut state = self.state.lock();
                let command = state.finish(id, status, self.retention)?;
                state.publish_depth();
                Ok(command)
            }
        }
    }

    /// Fail a command and, unless `max_attempts` is reached, enqueue a fresh
    /// instance of it in the same critical section.
    pub fn fail_and_requeue(
        &self,
        id: CommandId,
        max_attempts: Option<u32>,
    ) -> Result<Requeue, QueueError> {
        let mut state = self.state.lock();
        let failed = state.finish(id, CommandStatus::Failed, self.retention)?;
        if max_attempts.is_some_and(|max| failed.attempt >= max) {
            state.publish_depth();
            return Ok(Requeue::Exhausted(failed));
        }
        let fresh = failed.reissue();
        state.insert(fresh.clone())?;
        state.publish_depth();
        Ok(Requeue::Reissued { failed, fresh })
    }

    /// Drop every active command of a defect.
    pub fn remove_defect(&self, defect_id: DefectId) -> Vec<CoordinateCommand> {
        self.remove_matching(|cmd| cmd.defect_id == defect_id, false)
    }

    /// Drop pending commands that no longer satisfy `keep`.
    pub fn retain_pending<F>(&self, keep: F) -> Vec<CoordinateCommand>
    where
        F: Fn(&CoordinateCommand) -> bool,
    {
        self.remove_matching(|cmd| !keep(cmd), true)
    }

    fn remove_matching<F>(&self, matches: F, pending_only: bool) -> Vec<CoordinateCommand>
    where
        F: Fn(&CoordinateCommand) -> bool,
    {
        let mut state = self.state.lock();
        let ids: Vec<CommandId> = state
            .active
            .values()
            .filter(|e| !pending_only || e.command.status == CommandStatus::Pending)
            .filter(|e| matches(&e.command))
            .map(|e| e.command.id)
            .collect();
        let removed = ids
            .into_iter()
            .filter_map(|id| state.finish(id, CommandStatus::Failed, self.retention).ok())
            .collect();
        state.publish_depth();
        removed
    }

    /// Active or recently finished command by id.
    pub fn get(&self, id: CommandId) -> Option<CoordinateCommand> {
        let state = self.state.lock();
        state
            .active
            .get(&id)
            .map(|e| e.command.clone())
            .or_else(|| state.finished.get(&id).cloned())
    }

    /// Pending commands in dequeue order.
    pub fn pending(&self) -> Vec<CoordinateCommand> {
        let state = self.state.lock();
        state
            .pending
            .values()
            .filter_map(|id| state.active.get(id).map(|e| e.command.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let mut state = self.state.lock();
        let now = Instant::now();
        while state
            .completions
            .front()
            .is_some_and(|t| now.duration_since(*t) > THROUGHPUT_WINDOW)
        {
            state.completions.pop_front();
        }
        let span = now
            .duration_since(self.created_at)
            .min(THROUGHPUT_WINDOW)
            .as_secs_f64()
            .max(1.0);
        QueueStats {
            size: state.pending.len(),
            in_progress: state.active.len() - state.pending.len(),
            enqueued_total: state.counters.enqueued,
            dispatched_total: state.counters.dispatched,
            completed_total: state.counters.completed,
            failed_total: state.counters.failed,
            duplicates_rejected: state.counters.duplicates,
            throughput: state.completions.len() as f64 / span,
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::ActionType;
    use crate::domain::coordinate::CorrelationId;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn command(x: f64, severity: u8) -> CoordinateCommand {
        CoordinateCommand::new(
            DefectId::new(),
            Position::new(x, 1.0, 1.0),
            ActionType::Repair,
            50.0,
            severity,
            CorrelationId::new(),
        )
    }

    fn all() -> AgentCapabilities {
        AgentCapabilities::all()
    }

    #[test]
    fn test_severity_then_fifo() {
        let queue = CommandQueue::new();
        let a = command(1.0, 8);
        let b = command(2.0, 3);
        let c = command(3.0, 5);
        let d = command(4.0, 5);
        for cmd in [&a, &b, &c, &d] {
            queue.enqueue(cmd.clone()).unwrap();
        }

        let order: Vec<CommandId> = std::iter::from_fn(|| queue.dequeue_next(&all()))
            .map(|c| c.id)
            .collect();
        assert_eq!(order, vec![a.id, c.id, d.id, b.id]);
    }

    #[test]
    fn test_duplicate_within_tolerance_rejected() {
        let queue = CommandQueue::new();
        let first = command(1.0, 5);
        queue.enqueue(first.clone()).unwrap();

        let err = queue.enqueue(command(1.1, 9)).unwrap_err();
        assert!(matches!(err, QueueError::Duplicate { existing, .. } if existing == first.id));

        // two grid steps away is a different target
        queue.enqueue(command(1.2, 5)).unwrap();
        assert_eq!(queue.stats().duplicates_rejected, 1);
    }

    #[test]
    fn test_in_progress_still_blocks_duplicates() {
        let queue = CommandQueue::new();
        queue.enqueue(command(1.0, 5)).unwrap();
        let taken = queue.dequeue_next(&all()).unwrap();
        assert_eq!(taken.status, CommandStatus::InProgress);
        assert!(queue.enqueue(command(1.0, 5)).is_err());

        queue.mark(taken.id, CommandStatus::Completed).unwrap();
        assert!(queue.enqueue(command(1.0, 5)).is_ok());
    }

    #[test]
    fn test_completed_is_final() {
        let queue = CommandQueue::new();
        let cmd = command(1.0, 5);
        queue.enqueue(cmd.clone()).unwrap();
        queue.dequeue_next(&all()).unwrap();
        queue.mark(cmd.id, CommandStatus::Completed).unwrap();

        assert!(matches!(queue.mark(cmd.id, CommandStatus::Failed), Err(QueueError::NotFound(_))));
        assert_eq!(queue.get(cmd.id).unwrap().status, CommandStatus::Completed);
    }

    #[test]
    fn test_capabilities_filter() {
        let queue = CommandQueue::new();
        let repair = command(1.0, 9);
        let mut scan = command(3.0, 2);
        scan.action_type = ActionType::Scan;
        queue.enqueue(repair.clone()).unwrap();
        queue.enqueue(scan.clone()).unwrap();

        let scanner = AgentCapabilities::only([ActionType::Scan]);
        assert_eq!(queue.dequeue_next(&scanner).unwrap().id, scan.id);
        assert!(queue.dequeue_next(&scanner).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_rejected_head_keeps_its_place() {
        let queue = CommandQueue::new();
        let head = command(1.0, 9);
        let next = command(5.0, 1);
        queue.enqueue(head.clone()).unwrap();
        queue.enqueue(next.clone()).unwrap();

        let got = queue.dequeue_where(None, &all(), |c| c.id != head.id).unwrap();
        assert_eq!(got.id, next.id);
        assert_eq!(queue.pending()[0].id, head.id);
    }

    #[test]
    fn test_release_restores_order() {
        let queue = CommandQueue::new();
        let high = command(1.0, 9);
        let low = command(2.0, 1);
        queue.enqueue(high.clone()).unwrap();
        queue.enqueue(low.clone()).unwrap();

        let agent = AgentId::new("a1");
        let taken = queue.dequeue_where(Some(&agent), &all(), |_| true).unwrap();
        assert_eq!(taken.agent_id, Some(agent));
        queue.release(taken.id).unwrap();

        let again = queue.dequeue_next(&all()).unwrap();
        assert_eq!(again.id, high.id);
        assert!(again.agent_id.is_none());
    }

    #[test]
    fn test_fail_and_requeue_respects_attempt_limit() {
        let queue = CommandQueue::new();
        let cmd = command(1.0, 5);
        queue.enqueue(cmd.clone()).unwrap();
        queue.dequeue_next(&all()).unwrap();

        let fresh = match queue.fail_and_requeue(cmd.id, Some(2)).unwrap() {
            Requeue::Reissued { fresh, .. } => fresh,
            other => panic!("expected reissue, got {:?}", other),
        };
        assert_eq!(fresh.correlation_id, cmd.correlation_id);
        assert_eq!(fresh.attempt, 2);
        assert_eq!(queue.get(cmd.id).unwrap().status, CommandStatus::Failed);

        queue.dequeue_next(&all()).unwrap();
        assert!(matches!(
            queue.fail_and_requeue(fresh.id, Some(2)).unwrap(),
            Requeue::Exhausted(_)
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_defect_drops_pending_and_in_progress() {
        let queue = CommandQueue::new();
        let defect = DefectId::new();
        let mut a = command(1.0, 5);
        a.defect_id = defect;
        let mut b = command(3.0, 5);
        b.defect_id = defect;
        let other = command(6.0, 5);
        for cmd in [&a, &b, &other] {
            queue.enqueue(cmd.clone()).unwrap();
        }
        queue.dequeue_next(&all()).unwrap();

        let removed = queue.remove_defect(defect);
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.pending().len(), 1);
        assert_eq!(queue.stats().in_progress, 0);
    }

    #[test]
    fn test_concurrent_consumers_get_each_command_once() {
        let queue = Arc::new(CommandQueue::new());
        for i in 0..100 {
            queue.enqueue(command(f64::from(i) / 10.0 * 2.0 % 10.0, (i % 10 + 1) as u8)).ok();
        }
        let total = queue.len();

        let taken: Vec<CommandId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    scope.spawn(move || {
                        std::iter::from_fn(|| queue.dequeue_next(&AgentCapabilities::all()))
                            .map(|c| c.id)
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<CommandId> = taken.iter().copied().collect();
        assert_eq!(taken.len(), total);
        assert_eq!(unique.len(), total);
    }
}
