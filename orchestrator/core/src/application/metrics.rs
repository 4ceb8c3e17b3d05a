// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hub-wide counters.
//!
//! Every update goes to two places: an in-process atomic snapshot served by
//! the API, and the `metrics` facade for whatever recorder the binary
//! installs. Counters only ever increase.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counter names, in snapshot field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    SensorAccepted,
    SensorRejected,
    CommandsEnqueued,
    CommandsDispatched,
    CommandsCompleted,
    CommandsFailed,
    CommandsRequeued,
    DuplicatesRejected,
    DefectsCompleted,
    DefectsUnrepairable,
    PlanningFailures,
    TwinReconnects,
}

impl Counter {
    const COUNT: usize = 12;

    fn index(self) -> usize {
        self as usize
    }

    fn metric_name(self) -> &'static str {
        match self {
            Counter::SensorAccepted => "qnms_sensor_accepted_total",
            Counter::SensorRejected => "qnms_sensor_rejected_total",
            Counter::CommandsEnqueued => "qnms_commands_enqueued_total",
            Counter::CommandsDispatched => "qnms_commands_dispatched_total",
            Counter::CommandsCompleted => "qnms_commands_completed_total",
            Counter::CommandsFailed => "qnms_commands_failed_total",
            Counter::CommandsRequeued => "qnms_commands_requeued_total",
            Counter::DuplicatesRejected => "qnms_duplicates_rejected_total",
            Counter::DefectsCompleted => "qnms_defects_completed_total",
            Counter::DefectsUnrepairable => "qnms_defects_unrepairable_total",
            Counter::PlanningFailures => "qnms_planning_failures_total",
            Counter::TwinReconnects => "qnms_twin_reconnects_total",
        }
    }
}

/// Point-in-time copy of the hub metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub sensor_accepted: u64,
    pub sensor_rejected: u64,
    pub commands_enqueued: u64,
    pub commands_dispatched: u64,
    pub commands_completed: u64,
    pub commands_failed: u64,
    pub commands_requeued: u64,
    pub duplicates_rejected: u64,
    pub defects_completed: u64,
    pub defects_unrepairable: u64,
    pub planning_failures: u64,
    pub twin_reconnects: u64,
    pub planning_latency_ms_avg: f64,
    /// Gauges owned by other components; filled in by whoever assembles the
    /// snapshot for a caller.
    pub queue_depth: usize,
    pub twin_buffered: usize,
}

#[derive(Debug, Default)]
pub struct HubMetrics {
    counters: [AtomicU64; Counter::COUNT],
    planning_samples: AtomicU64,
    planning_total_us: AtomicU64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
        metrics::counter!(counter.metric_name()).increment(n);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn record_planning_latency(&self, elapsed: Duration) {
        self.planning_samples.fetch_add(1, Ordering::Relaxed);
        self.planning_total_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        metrics::histogram!("qnms_planning_latency_seconds").record(elapsed.as_secs_f64());
    }

    pub fn snapshot(&self) -> SystemMetrics {
        let samples = self.planning_samples.load(Ordering::Relaxed);
        let total_us = self.planning_total_us.load(Ordering::Relaxed);
        SystemMetrics {
            sensor_accepted: self.get(Counter::SensorAccepted),
            sensor_rejected: self.get(Counter::SensorRejected),
            commands_enqueued: self.get(Counter::CommandsEnqueued),
            commands_dispatched: self.get(Counter::CommandsDispatched),
            commands_completed: self.get(Counter::CommandsCompleted),
            commands_failed: self.get(Counter::CommandsFailed),
            commands_requeued: self.get(Counter::CommandsRequeued),
            duplicates_rejected: self.get(Counter::DuplicatesRejected),
            defects_completed: self.get(Counter::DefectsCompleted),
            defects_unrepairable: self.get(Counter::DefectsUnrepairable),
            planning_failures: self.get(Counter::PlanningFailures),
            twin_reconnects: self.get(Counter::TwinReconnects),
            planning_latency_ms_avg: if samples == 0 {
                0.0
            } else {
                total_us as f64 / samples as f64 / 1000.0
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let metrics = HubMetrics::new();
        metrics.incr(Counter::SensorAccepted);
        metrics.add(Counter::CommandsEnqueued, 3);
        metrics.record_planning_latency(Duration::from_millis(20));
        metrics.record_planning_latency(Duration::from_millis(40));

        let snap = metrics.snapshot();
        assert_eq!(snap.sensor_accepted, 1);
        assert_eq!(snap.commands_enqueued, 3);
        assert_eq!(snap.twin_reconnects, 0);
        assert!((snap.planning_latency_ms_avg - 30.0).abs() < 1e-6);
    }
}
