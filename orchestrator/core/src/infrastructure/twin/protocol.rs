// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Twin wire protocol.
//!
//! Every frame is one JSON envelope:
//!
//! ```json
//! {"type": "command", "payload": {...}, "timestamp": "2026-01-01T00:00:00Z",
//!  "correlation_id": "...", "message_id": "..."}
//! ```
//!
//! `message_id` identifies the frame for acknowledgment; command frames use the
//! command id. Frames from the twin without one are acknowledged by their
//! correlation id.

use crate::domain::agent::AgentId;
use crate::domain::command::{AckStatus, ActionType, CoordinateCommand};
use crate::domain::coordinate::{CorrelationId, Position, SensorReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SensorData,
    Command,
    Status,
    Ack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDataPayload {
    pub coordinates: Vec<SensorReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub agent_id: AgentId,
    pub target: Position,
    pub action: ActionType,
    pub thermal_budget: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub message_id: String,
    pub status: AckStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub protocol_version: String,
    pub capabilities: Vec<String>,
}

/// Agent telemetry, link heartbeat or handshake; which fields are present
/// decides the meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermal_state: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub heartbeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake: Option<Handshake>,
}

/// A decoded frame from the twin.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SensorData {
        correlation_id: CorrelationId,
        ack_id: String,
        readings: Vec<SensorReading>,
    },
    Status {
        correlation_id: CorrelationId,
        ack_id: String,
        status: StatusPayload,
    },
    Ack {
        correlation_id: CorrelationId,
        ack: AckPayload,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("malformed {kind:?} payload: {source}")]
    Payload {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected {0:?} frame from twin")]
    Unexpected(MessageType),
}

impl Envelope {
    fn new(kind: MessageType, payload: Value, correlation_id: CorrelationId, message_id: String) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
            correlation_id,
            message_id: Some(message_id),
        }
    }

    /// Command frame for an assigned command. Fails if it has no agent.
    pub fn command(cmd: &CoordinateCommand) -> Result<Self, serde_json::Error> {
        let agent_id = cmd.agent_id.clone().ok_or_else(|| {
            <serde_json::Error as serde::ser::Error>::custom("command has no assigned agent")
        })?;
        let payload = serde_json::to_value(CommandPayload {
            agent_id,
            target: cmd.target,
            action: cmd.action_type,
            thermal_budget: cmd.thermal_budget,
        })?;
        Ok(Self::new(
            MessageType::Command,
            payload,
            cmd.correlation_id.clone(),
            cmd.id.to_string(),
        ))
    }

    pub fn ack(message_id: &str, correlation_id: &CorrelationId, status: AckStatus) -> Self {
        let payload = serde_json::json!({ "message_id": message_id, "status": status });
        Self::new(
            MessageType::Ack,
            payload,
            correlation_id.clone(),
            Uuid::new_v4().to_string(),
        )
    }

    pub fn heartbeat() -> Self {
        let payload = serde_json::json!({ "heartbeat": true });
        Self::new(
            MessageType::Status,
            payload,
            CorrelationId::new(),
            Uuid::new_v4().to_string(),
        )
    }

    pub fn handshake() -> Self {
        let payload = serde_json::json!({
            "handshake": Handshake {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: ["sensor_data", "command", "status", "ack"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }
        });
        Self::new(
            MessageType::Status,
            payload,
            CorrelationId::new(),
            Uuid::new_v4().to_string(),
        )
    }

    pub fn id(&self) -> &str {
        self.message_id
            .as_deref()
            .unwrap_or_else(|| self.correlation_id.as_str())
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Envelope)?;
        envelope.into_inbound()
    }

    pub fn into_inbound(self) -> Result<Inbound, ProtocolError> {
        let kind = self.kind;
        let ack_id = self.id().to_string();
        let payload_err = |source| ProtocolError::Payload { kind, source };
        match kind {
            MessageType::SensorData => {
                let payload: SensorDataPayload =
                    serde_json::from_value(self.payload).map_err(payload_err)?;
                Ok(Inbound::SensorData {
                    correlation_id: self.correlation_id,
                    ack_id,
                    readings: payload.coordinates,
                })
            }
            MessageType::Status => {
                let status: StatusPayload =
                    serde_json::from_value(self.payload).map_err(payload_err)?;
                Ok(Inbound::Status {
                    correlation_id: self.correlation_id,
                    ack_id,
                    status,
                })
            }
            MessageType::Ack => {
                let ack: AckPayload = serde_json::from_value(self.payload).map_err(payload_err)?;
                Ok(Inbound::Ack {
                    correlation_id: self.correlation_id,
                    ack,
                })
            }
            MessageType::Command => Err(ProtocolError::Unexpected(MessageType::Command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::defect::DefectId;

    #[test]
    fn test_command_envelope_shape() {
        let mut cmd = CoordinateCommand::new(
            DefectId::new(),
            Position::new(1.0, 2.0, 0.5),
            ActionType::Repair,
            85.0,
            7,
            CorrelationId::from("trace-9"),
        );
        assert!(Envelope::command(&cmd).is_err());

        cmd.agent_id = Some(AgentId::new("nano-3"));
        let envelope = Envelope::command(&cmd).unwrap();
        let json: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["correlation_id"], "trace-9");
        assert_eq!(json["message_id"], cmd.id.to_string());
        assert_eq!(json["payload"]["agent_id"], "nano-3");
        assert_eq!(json["payload"]["target"]["y"], 2.0);
        assert_eq!(json["payload"]["action"], "repair");
        assert_eq!(json["payload"]["thermal_budget"], 85.0);
    }

    #[test]
    fn test_decode_sensor_data() {
        let text = r#"{"type":"sensor_data","timestamp":"2026-03-01T10:00:00Z","correlation_id":"s-1",
            "payload":{"coordinates":[{"x":1.0,"y":2.0,"z":0.3,"defect_type":"void","severity":8}]}}"#;
        match Envelope::decode(text).unwrap() {
            Inbound::SensorData { correlation_id, ack_id, readings } => {
                assert_eq!(correlation_id.as_str(), "s-1");
                assert_eq!(ack_id, "s-1");
                assert_eq!(readings[0].severity, 8);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_ack() {
        let text = r#"{"type":"ack","timestamp":"2026-03-01T10:00:00Z","correlation_id":"c",
            "payload":{"message_id":"m-1","status":"processing"}}"#;
        let inbound = Envelope::decode(text).unwrap();
        assert!(matches!(inbound, Inbound::Ack { ack, .. } if ack.status == AckStatus::Processing && ack.message_id == "m-1"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(Envelope::decode("not json"), Err(ProtocolError::Envelope(_))));
        let bad_ack = r#"{"type":"ack","timestamp":"2026-03-01T10:00:00Z","correlation_id":"c","payload":{}}"#;
        assert!(matches!(Envelope::decode(bad_ack), Err(ProtocolError::Payload { .. })));
    }

    #[test]
    fn test_heartbeat_is_status() {
        let hb = Envelope::heartbeat();
        assert_eq!(hb.kind, MessageType::Status);
        assert_eq!(hb.payload["heartbeat"], true);
        assert!(Envelope::handshake().payload["handshake"]["protocol_version"].is_string());
    }
}
