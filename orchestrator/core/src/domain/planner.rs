// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Path Planner Port
//!
//! The AI path planner is an external black box. The hub talks to it through
//! the [`PathPlanner`] capability trait and never trusts its output: anything
//! that does not parse into a [`PlannedPath`] is a [`PlanningError`], and every
//! parsed path is re-validated before a single command is generated.
//!
//! ## Wire shapes
//!
//! Request: [`PlanningRequest`] (defects, agent positions, constraint set).
//!
//! Response, success:
//! ```json
//! {"steps": [{"target_x": 1.2, "target_y": 3.4, "target_z": 0.5,
//!             "action": "repair", "thermal_budget": 85.0}]}
//! ```
//! The planner's older `thermal_limit` field name is accepted as an alias.
//!
//! Response, structured failure:
//! ```json
//! {"error": {"code": "NO_FEASIBLE_PATH", "message": "..."}}
//! ```

use crate::domain::agent::ActiveAgent;
use crate::domain::command::ActionType;
use crate::domain::coordinate::{CorrelationId, Position, SensorCoordinate};
use crate::domain::defect::DefectId;
use crate::domain::safety::{NoGoZone, SafetyConstraints, ViolationList};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// One defect as presented to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedDefect {
    pub defect_id: DefectId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub defect_type: String,
    pub severity: i32,
}

impl PlannedDefect {
    pub fn from_coordinate(defect_id: DefectId, c: &SensorCoordinate) -> Self {
        Self {
            defect_id,
            x: c.x,
            y: c.y,
            z: c.z,
            defect_type: c.defect_type.0.clone(),
            severity: c.severity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPosition {
    pub agent_id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// The static constraint set shipped with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    pub grid_size: f64,
    pub thermal_limit: f64,
    pub collision_radius: f64,
    pub no_go_zones: Vec<NoGoZone>,
}

impl From<&SafetyConstraints> for ConstraintSet {
    fn from(c: &SafetyConstraints) -> Self {
        Self {
            grid_size: c.grid_step_nm,
            thermal_limit: c.thermal_limit_c,
            collision_radius: c.collision_radius_nm,
            no_go_zones: c.no_go_zones.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningRequest {
    /// The defect this request plans for; the planner session allows one
    /// outstanding request per id.
    pub defect_id: DefectId,
    pub correlation_id: CorrelationId,
    pub defects: Vec<PlannedDefect>,
    pub agents: Vec<AgentPosition>,
    pub constraints: ConstraintSet,
}

impl PlanningRequest {
    pub fn new(
        defect_id: DefectId,
        coordinate: &SensorCoordinate,
        agents: &[ActiveAgent],
        constraints: &SafetyConstraints,
    ) -> Self {
        Self {
            defect_id,
            correlation_id: coordinate.correlation_id.clone(),
            defects: vec![PlannedDefect::from_coordinate(defect_id, coordinate)],
            agents: agents
                .iter()
                .map(|a| AgentPosition {
                    agent_id: a.agent_id.0.clone(),
                    x: a.position.x,
                    y: a.position.y,
                    z: a.position.z,
                })
                .collect(),
            constraints: ConstraintSet::from(constraints),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub target_x: f64,
    pub target_y: f64,
    pub target_z: f64,
    pub action: String,
    #[serde(alias = "thermal_limit")]
    pub thermal_budget: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
}

impl PlannedStep {
    pub fn target(&self) -> Position {
        Position::new(self.target_x, self.target_y, self.target_z)
    }

    /// Map the planner's action vocabulary onto hub actions.
    ///
    /// Exact `move`/`scan`/`repair` map directly. Free-text process steps are
    /// classified: inspection and metrology steps become scans, anything else
    /// becomes a repair. An `emergency_stop` is the planner's own failure
    /// signal and is refused.
    pub fn action_type(&self) -> Result<ActionType, PlanningError> {
        let action = self.action.trim().to_ascii_lowercase();
        match action.as_str() {
            "move" => Ok(ActionType::Move),
            "scan" => Ok(ActionType::Scan),
            "repair" => Ok(ActionType::Repair),
            "" | "emergency_stop" => Err(PlanningError::Malformed(format!(
                "unusable planner action '{}'",
                self.action
            ))),
            other if ["scan", "metrology", "verif", "inspect"].iter().any(|k| other.contains(k)) => {
                Ok(ActionType::Scan)
            }
            _ => Ok(ActionType::Repair),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPath {
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct PlannerFailure {
    error: PlannerFailureBody,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct PlannerFailureBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// Interpret a planner response body.
pub fn parse_planner_response(body: Value) -> Result<PlannedPath, PlanningError> {
    if body.get("error").is_some() {
        return match serde_json::from_value::<PlannerFailure>(body) {
            Ok(f) => Err(PlanningError::Rejected {
                code: f.error.code.unwrap_or_else(|| "PLANNING_FAILED".to_string()),
                message: f.error.message,
            }),
            Err(e) => Err(PlanningError::Malformed(format!("unreadable planner error: {}", e))),
        };
    }
    let path: PlannedPath = serde_json::from_value(body)
        .map_err(|e| PlanningError::Malformed(format!("response is not a repair path: {}", e)))?;
    if path.steps.is_empty() {
        return Err(PlanningError::Malformed("repair path has no steps".to_string()));
    }
    Ok(path)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanningError {
    #[error("planner unavailable: {0}")]
    Unavailable(String),

    #[error("planner circuit open, retry in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("planner timed out after {0:?}")]
    Timeout(Duration),

    #[error("a planning request for defect {0} is already outstanding")]
    InFlight(DefectId),

    #[error("planner found no path ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("malformed planner output: {0}")]
    Malformed(String),

    #[error("planned path violates safety constraints: {0}")]
    UnsafePath(ViolationList),
}

impl PlanningError {
    /// The failure came from the transport rather than from the planner's
    /// judgement, and maps to `CONNECTION_ERROR` for callers.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            PlanningError::Unavailable(_) | PlanningError::CircuitOpen { .. } | PlanningError::Timeout(_)
        )
    }

    /// Whether the failure should count against the planner circuit breaker.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            PlanningError::Unavailable(_) | PlanningError::Timeout(_) | PlanningError::Malformed(_)
        )
    }
}

#[async_trait]
pub trait PathPlanner: Send + Sync {
    async fn plan(&self, request: &PlanningRequest) -> Result<PlannedPath, PlanningError>;
}
