// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Safety Validation Engine
//!
//! Pure accept/reject checks applied to sensor coordinates, commands and whole
//! repair paths. No I/O and no shared state: a [`SafetyValidator`] is a value
//! built from [`SafetyConstraints`] and cloned wherever it is needed.
//!
//! ## Checks
//!
//! | Check | Rule |
//! |-------|------|
//! | Atomic precision | every axis is an exact 0.1 nm multiple inside the device box |
//! | Thermal | `0 ≤ thermal_budget ≤ thermal_limit` (120 °C) |
//! | Structural | target is outside every no-go box (closed on each axis) |
//! | Collision | target is more than `collision_radius` (0.5 nm) from every other claimed position |
//!
//! Every applicable check runs on every call. A rejected command carries all
//! of its violations, not only the first one found.

use crate::domain::agent::ActiveAgent;
use crate::domain::command::CoordinateCommand;
use crate::domain::coordinate::{
    is_grid_aligned, Position, SensorCoordinate, GRID_STEP_NM, MAX_XY_NM, MAX_Z_NM,
};
use crate::domain::defect::RepairPath;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

pub const DEFAULT_THERMAL_LIMIT_C: f64 = 120.0;
pub const DEFAULT_COLLISION_RADIUS_NM: f64 = 0.5;

/// Axis-aligned protected region. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoGoZone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub min: Position,
    pub max: Position,
}

impl NoGoZone {
    pub fn new(min: Position, max: Position) -> Self {
        Self {
            name: None,
            min,
            max,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn contains(&self, p: &Position) -> bool {
        (self.min.x..=self.max.x).contains(&p.x)
            && (self.min.y..=self.max.y).contains(&p.y)
            && (self.min.z..=self.max.z).contains(&p.z)
    }

    /// `min` is not above `max` on any axis.
    pub fn is_well_formed(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("no-go zone '{}'", name),
            None => format!("no-go zone {}..{}", self.min, self.max),
        }
    }
}

/// Static limits every command must respect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConstraints {
    pub grid_step_nm: f64,
    pub max_xy_nm: f64,
    pub max_z_nm: f64,
    pub thermal_limit_c: f64,
    pub collision_radius_nm: f64,
    pub no_go_zones: Vec<NoGoZone>,
}

impl Default for SafetyConstraints {
    fn default() -> Self {
        Self {
            grid_step_nm: GRID_STEP_NM,
            max_xy_nm: MAX_XY_NM,
            max_z_nm: MAX_Z_NM,
            thermal_limit_c: DEFAULT_THERMAL_LIMIT_C,
            collision_radius_nm: DEFAULT_COLLISION_RADIUS_NM,
            no_go_zones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Precision,
    Bounds,
    Severity,
    Thermal,
    Structural,
    Collision,
    EmptyPath,
}

/// One failed check, shaped like the `details` of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub field: String,
    pub value: Value,
    pub constraint: String,
}

impl Violation {
    fn new(kind: ViolationKind, field: impl Into<String>, value: Value, constraint: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            value,
            constraint: constraint.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {} violates {}", self.field, self.value, self.constraint)
    }
}

/// Non-empty set of violations returned by a failed validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViolationList(pub Vec<Violation>);

impl ViolationList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> Option<&Violation> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    pub fn has(&self, kind: ViolationKind) -> bool {
        self.0.iter().any(|v| v.kind == kind)
    }

    fn into_result(self) -> Result<(), ViolationList> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ViolationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ViolationList {}

impl Extend<Violation> for ViolationList {
    fn extend<T: IntoIterator<Item = Violation>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SafetyValidator {
    constraints: SafetyConstraints,
}

impl SafetyValidator {
    pub fn new(constraints: SafetyConstraints) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> &SafetyConstraints {
        &self.constraints
    }

    /// Precision, bounds and severity of an incoming sensor report.
    pub fn validate_coordinate(&self, c: &SensorCoordinate) -> Result<(), ViolationList> {
        let mut violations = ViolationList::default();
        violations.extend(self.check_precision(&c.position(), ""));
        if !(1..=10).contains(&c.severity) {
            violations.0.push(Violation::new(
                ViolationKind::Severity,
                "severity",
                json!(c.severity),
                "1 <= severity <= 10",
            ));
        }
        violations.into_result()
    }

    /// Checks 1–4 for one command against the live fleet.
    ///
    /// The command's own agent, if assigned, is not counted as a collision.
    pub fn validate_command(
        &self,
        cmd: &CoordinateCommand,
        active_agents: &[ActiveAgent],
    ) -> Result<(), ViolationList> {
        let mut violations = self.static_violations(cmd);
        let others = active_agents
            .iter()
            .filter(|a| cmd.agent_id.as_ref() != Some(&a.agent_id))
            .flat_map(|a| a.claimed_positions());
        violations.extend(self.check_collision(&cmd.target, others));
        violations.into_result()
    }

    /// Checks 1–3 only: what can be judged without knowing the fleet.
    pub fn validate_static(&self, cmd: &CoordinateCommand) -> Result<(), ViolationList> {
        self.static_violations(cmd).into_result()
    }

    /// Every step of a path, each against the live fleet.
    ///
    /// Steps of one path run sequentially on one agent, so they are not
    /// checked against each other.
    pub fn validate_path(
        &self,
        path: &RepairPath,
        active_agents: &[ActiveAgent],
    ) -> Result<(), ViolationList> {
        self.check_path(path, |cmd| self.validate_command(cmd, active_agents))
    }

    /// Every step of a path, checks 1–3 only. Used when a path is planned;
    /// collisions are checked against the fleet at assignment.
    pub fn validate_path_static(&self, path: &RepairPath) -> Result<(), ViolationList> {
        self.check_path(path, |cmd| self.validate_static(cmd))
    }

    fn check_path<F>(&self, path: &RepairPath, check: F) -> Result<(), ViolationList>
    where
        F: Fn(&CoordinateCommand) -> Result<(), ViolationList>,
    {
        let mut violations = ViolationList::default();
        if path.commands.is_empty() {
            violations.0.push(Violation::new(
                ViolationKind::EmptyPath,
                "commands",
                json!([]),
                "repair path must contain at least one command",
            ));
        }
        for (i, cmd) in path.commands.iter().enumerate() {
            if let Err(step) = check(cmd) {
                violations.extend(step.0.into_iter().map(|mut v| {
                    v.field = format!("steps[{}].{}", i, v.field);
                    v
                }));
            }
        }
        violations.into_result()
    }

    /// Structural and collision checks used at assignment time, against the
    /// positions already claimed by other agents.
    pub fn validate_assignment(
        &self,
        cmd: &CoordinateCommand,
        claimed: &[Position],
    ) -> Result<(), ViolationList> {
        let mut violations = ViolationList::default();
        violations.extend(self.check_structural(&cmd.target));
        violations.extend(self.check_collision(&cmd.target, claimed.iter().copied()));
        violations.into_result()
    }

    fn static_violations(&self, cmd: &CoordinateCommand) -> ViolationList {
        let mut violations = ViolationList::default();
        violations.extend(self.check_precision(&cmd.target, "target."));
        violations.extend(self.check_thermal(cmd.thermal_budget));
        violations.extend(self.check_structural(&cmd.target));
        violations
    }

    pub fn check_precision(&self, p: &Position, prefix: &str) -> Vec<Violation> {
        let mut out = Vec::new();
        for (axis, value) in p.axes() {
            let field = format!("{}{}", prefix, axis);
            if !is_grid_aligned(value) {
                out.push(Violation::new(
                    ViolationKind::Precision,
                    field.clone(),
                    json!(value),
                    format!("multiple of {} nm", self.constraints.grid_step_nm),
                ));
            }
            let max = if axis == "z" {
                self.constraints.max_z_nm
            } else {
                self.constraints.max_xy_nm
            };
            if !(0.0..=max).contains(&value) {
                out.push(Violation::new(
                    ViolationKind::Bounds,
                    field,
                    json!(value),
                    format!("0 <= {} <= {} nm", axis, max),
                ));
            }
        }
        out
    }

    pub fn check_thermal(&self, thermal_budget: f64) -> Option<Violation> {
        let limit = self.constraints.thermal_limit_c;
        if (0.0..=limit).contains(&thermal_budget) {
            return None;
        }
        Some(Violation::new(
            ViolationKind::Thermal,
            "thermal_budget",
            json!(thermal_budget),
            format!("0 <= thermal_budget <= {} C", limit),
        ))
    }

    pub fn check_structural(&self, target: &Position) -> Vec<Violation> {
        self.constraints
            .no_go_zones
            .iter()
            .filter(|zone| zone.contains(target))
            .map(|zone| {
                Violation::new(
                    ViolationKind::Structural,
                    "target",
                    json!(target),
                    format!("outside {}", zone.label()),
                )
            })
            .collect()
    }

    pub fn check_collision(
        &self,
        target: &Position,
        others: impl IntoIterator<Item = Position>,
    ) -> Vec<Violation> {
        let radius = self.constraints.collision_radius_nm;
        others
            .into_iter()
            .filter(|other| target.distance_to(other) <= radius)
            .map(|other| {
                Violation::new(
                    ViolationKind::Collision,
                    "target",
                    json!(target),
                    format!("more than {} nm from claimed position {}", radius, other),
                )
            })
            .collect()
    }
}
