// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordinates and Sensor Readings
//!
//! Spatial value types shared by every subsystem of the hub.
//!
//! - [`Position`]: a point in the device-bound box, in nanometres.
//! - [`GridPoint`]: the same point as integer 0.1 nm grid indices, used for
//!   tolerance comparisons so float noise never decides equality.
//! - [`SensorCoordinate`]: an immutable defect report ingested from the twin.
//! - [`CorrelationId`]: the opaque trace token carried end-to-end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Minimum addressable step of the repair grid, in nanometres.
pub const GRID_STEP_NM: f64 = 0.1;

/// Grid cells per nanometre.
pub const GRID_SCALE: f64 = 10.0;

/// Upper bound of the x and y axes of the device box (nm).
pub const MAX_XY_NM: f64 = 10.0;

/// Upper bound of the z axis of the device box (nm).
pub const MAX_Z_NM: f64 = 2.0;

/// Returns `true` when `value` is an exact multiple of [`GRID_STEP_NM`].
///
/// Exactness is judged by rounding to one decimal digit: any value the
/// rounding changes is off-grid. Non-finite values are never aligned.
pub fn is_grid_aligned(value: f64) -> bool {
    value.is_finite() && (value * GRID_SCALE).round() / GRID_SCALE == value
}

/// A point in nanometre space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in nanometres.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Nearest grid cell.
    pub fn grid_point(&self) -> GridPoint {
        GridPoint {
            x: (self.x * GRID_SCALE).round() as i64,
            y: (self.y * GRID_SCALE).round() as i64,
            z: (self.z * GRID_SCALE).round() as i64,
        }
    }

    /// Axis values with their field names, in x, y, z order.
    pub fn axes(&self) -> [(&'static str, f64); 3] {
        [("x", self.x), ("y", self.y), ("z", self.z)]
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// Integer grid index of a [`Position`] (one unit = 0.1 nm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl GridPoint {
    /// Squared distance in grid units.
    pub fn distance_sq(&self, other: &GridPoint) -> i64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Two points are the same target when they are at most one grid step apart.
    pub fn within_tolerance(&self, other: &GridPoint) -> bool {
        self.distance_sq(other) <= 1
    }

    /// This cell and its six face neighbours: every cell within one step.
    pub fn neighbourhood(&self) -> [GridPoint; 7] {
        let GridPoint { x, y, z } = *self;
        [
            *self,
            GridPoint { x: x + 1, y, z },
            GridPoint { x: x - 1, y, z },
            GridPoint { x, y: y + 1, z },
            GridPoint { x, y: y - 1, z },
            GridPoint { x, y, z: z + 1 },
            GridPoint { x, y, z: z - 1 },
        ]
    }
}

/// Opaque trace token propagated unchanged from a sensor report through
/// every entity derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Generate a fresh random correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Defect classification reported by the twin (free-form, e.g. `"void"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefectType(pub String);

impl fmt::Display for DefectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A defect report as it arrives on the wire.
///
/// `timestamp` and `correlation_id` are optional on input; the hub stamps
/// them during ingestion when they are missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub defect_type: DefectType,
    pub severity: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl SensorReading {
    /// Stamp the reading. An explicit correlation id on the reading wins over
    /// `fallback`, and a missing one is generated.
    pub fn into_coordinate(self, fallback: Option<&CorrelationId>) -> SensorCoordinate {
        let correlation_id = self
            .correlation_id
            .or_else(|| fallback.cloned())
            .unwrap_or_default();
        SensorCoordinate {
            x: self.x,
            y: self.y,
            z: self.z,
            defect_type: self.defect_type,
            severity: self.severity,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            correlation_id,
        }
    }
}

/// An ingested defect report. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCoordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub defect_type: DefectType,
    /// 1 (cosmetic) to 10 (critical).
    pub severity: i32,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
}

impl SensorCoordinate {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }

    /// Severity clamped to the valid 1..=10 range for use as a queue key.
    pub fn priority(&self) -> u8 {
        self.severity.clamp(1, 10) as u8
    }
}
