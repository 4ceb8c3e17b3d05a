// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod command_queue;
pub mod metrics;
pub mod repair_pipeline;

// Re-export services for convenience
pub use command_queue::{CommandQueue, QueueError, QueueStats, Requeue};
pub use metrics::{Counter, HubMetrics, SystemMetrics};
pub use repair_pipeline::{
    shared_validator, Cancellation, IngestOutcome, PipelineConfig, PlanOutcome, RepairPipeline,
    SharedValidator, StepOutcome,
};
