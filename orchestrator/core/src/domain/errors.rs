// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Caller-facing Errors
//!
//! Every rejected or failed operation reaches callers in one shape:
//!
//! ```json
//! {"error": {"code": "VALIDATION_ERROR", "message": "...",
//!            "details": {"field": "x", "value": 0.15, "constraint": "multiple of 0.1 nm"},
//!            "correlation_id": "...", "timestamp": "..."}}
//! ```
//!
//! [`HubError`] is the single error type the presentation layer renders; the
//! subsystem errors convert into it.

use crate::domain::command::DispatchError;
use crate::domain::coordinate::CorrelationId;
use crate::domain::defect::DefectError;
use crate::domain::planner::PlanningError;
use crate::domain::safety::{Violation, ViolationList};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    ConnectionError,
    PlanningError,
    ExecutionError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// Every violation when more than one check failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

impl ErrorDetails {
    fn from_violations(list: &ViolationList) -> Self {
        let first = list.first();
        Self {
            field: first.map(|v| v.field.clone()),
            value: first.map(|v| v.value.clone()),
            constraint: first.map(|v| v.constraint.clone()),
            violations: list.0.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub details: ErrorDetails,
    pub correlation_id: Option<CorrelationId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum HubError {
    #[error("validation failed: {violations}")]
    Validation {
        violations: ViolationList,
        correlation_id: Option<CorrelationId>,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("planning error: {0}")]
    Planning(String),

    #[error("execution error: {0}")]
    Execution(String),
}

impl HubError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        HubError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            HubError::Validation { .. } | HubError::NotFound { .. } | HubError::BadRequest(_) => {
                ErrorCode::ValidationError
            }
            HubError::Connection(_) => ErrorCode::ConnectionError,
            HubError::Planning(_) => ErrorCode::PlanningError,
            HubError::Execution(_) => ErrorCode::ExecutionError,
        }
    }

    pub fn to_response(&self, correlation_id: Option<CorrelationId>) -> ErrorResponse {
        let (details, correlation_id) = match self {
            HubError::Validation {
                violations,
                correlation_id: own,
            } => (
                ErrorDetails::from_violations(violations),
                own.clone().or(correlation_id),
            ),
            HubError::NotFound { kind, id } => (
                ErrorDetails {
                    field: Some(format!("{}_id", kind)),
                    value: Some(Value::String(id.clone())),
                    constraint: Some("must reference an existing entity".to_string()),
                    violations: Vec::new(),
                },
                correlation_id,
            ),
            _ => (ErrorDetails::default(), correlation_id),
        };
        ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
                details,
                correlation_id,
                timestamp: Utc::now(),
            },
        }
    }
}

impl From<PlanningError> for HubError {
    fn from(e: PlanningError) -> Self {
        match e {
            PlanningError::UnsafePath(violations) => HubError::Validation {
                violations,
                correlation_id: None,
            },
            e if e.is_connection() => HubError::Connection(e.to_string()),
            e => HubError::Planning(e.to_string()),
        }
    }
}

impl From<DefectError> for HubError {
    fn from(e: DefectError) -> Self {
        HubError::Execution(e.to_string())
    }
}

impl From<DispatchError> for HubError {
    fn from(e: DispatchError) -> Self {
        HubError::Connection(e.to_string())
    }
}
