// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use qnms_core::domain::agent::AgentId;
use qnms_core::domain::command::{ActionType, AckStatus, CommandDispatcher, CoordinateCommand};
use qnms_core::domain::coordinate::{CorrelationId, Position};
use qnms_core::domain::defect::DefectId;
use qnms_core::domain::hub_config::TwinConfig;
use qnms_core::infrastructure::twin::{
    ConnectionError, ConnectionManager, Envelope, LinkState, TwinChannel, TwinConnector, TwinEvent,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The twin's end of one connection.
struct TwinSide {
    to_hub: mpsc::Sender<Result<String, ConnectionError>>,
    from_hub: mpsc::Receiver<String>,
}

impl TwinSide {
    /// Next hub frame, skipping link heartbeats.
    async fn next_frame(&mut self) -> Value {
        loop {
            let text = tokio::time::timeout(Duration::from_secs(5), self.from_hub.recv())
                .await
                .expect("hub sent nothing")
                .expect("hub closed the connection");
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["payload"]["heartbeat"] == Value::Bool(true) {
                continue;
            }
            return frame;
        }
    }

    async fn ack(&self, frame: &Value, status: AckStatus) {
        let message_id = frame["message_id"].as_str().unwrap();
        let correlation_id = CorrelationId::from(frame["correlation_id"].as_str().unwrap());
        let text = Envelope::ack(message_id, &correlation_id, status).encode().unwrap();
        self.to_hub.send(Ok(text)).await.unwrap();
    }

    /// Read the handshake and accept it.
    async fn accept_handshake(&mut self) {
        let handshake = self.next_frame().await;
        assert_eq!(handshake["type"], "status");
        assert_eq!(handshake["payload"]["handshake"]["protocol_version"], "1.0");
        self.ack(&handshake, AckStatus::Received).await;
    }
}

/// Hands every new connection's twin side to the test.
struct MockTwin {
    sides: mpsc::UnboundedSender<TwinSide>,
}

#[async_trait]
impl TwinConnector for MockTwin {
    async fn connect(&self) -> Result<TwinChannel, ConnectionError> {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        self.sides
            .send(TwinSide {
                to_hub: inbound_tx,
                from_hub: outbound_rx,
            })
            .map_err(|_| ConnectionError::Closed)?;
        Ok(TwinChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

fn assigned_command(trace: &str) -> CoordinateCommand {
    let mut cmd = CoordinateCommand::new(
        DefectId::new(),
        Position::new(1.0, 2.0, 0.5),
        ActionType::Repair,
        80.0,
        6,
        CorrelationId::from(trace),
    );
    cmd.agent_id = Some(AgentId::new("nano-1"));
    cmd
}

struct Harness {
    sides: mpsc::UnboundedReceiver<TwinSide>,
    events: mpsc::UnboundedReceiver<TwinEvent>,
    handle: qnms_core::infrastructure::twin::TwinHandle,
    cancel: CancellationToken,
}

impl Harness {
    fn start() -> Self {
        let (sides_tx, sides) = mpsc::unbounded_channel();
        let connector = Arc::new(MockTwin { sides: sides_tx });
        let (manager, handle, events) = ConnectionManager::new(&TwinConfig::default(), connector);
        let cancel = CancellationToken::new();
        tokio::spawn(manager.run(cancel.clone()));
        Self {
            sides,
            events,
            handle,
            cancel,
        }
    }

    async fn next_side(&mut self) -> TwinSide {
        tokio::time::timeout(Duration::from_secs(30), self.sides.recv())
            .await
            .expect("hub never connected")
            .expect("connector dropped")
    }

    /// Next event other than a link state change.
    async fn next_event(&mut self) -> TwinEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("no twin event")
                .expect("event stream closed");
            if !matches!(event, TwinEvent::LinkChanged { .. }) {
                return event;
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_commands_wait_for_handshake() {
    let mut hub = Harness::start();
    let cmd = assigned_command("wait");
    hub.handle.dispatch(&cmd).unwrap();

    let mut twin = hub.next_side().await;
    let handshake = twin.next_frame().await;
    assert_eq!(handshake["type"], "status");

    // nothing else goes out before the handshake is acknowledged
    let early = tokio::time::timeout(Duration::from_millis(200), twin.from_hub.recv()).await;
    assert!(early.is_err());
    assert_eq!(hub.handle.link().buffered, 1);

    twin.ack(&handshake, AckStatus::Received).await;
    let frame = twin.next_frame().await;
    assert_eq!(frame["type"], "command");
    assert_eq!(frame["message_id"], cmd.id.to_string());
    assert_eq!(frame["correlation_id"], "wait");
    assert_eq!(frame["payload"]["agent_id"], "nano-1");
    assert_eq!(frame["payload"]["action"], "repair");

    twin.ack(&frame, AckStatus::Completed).await;
    match hub.next_event().await {
        TwinEvent::Ack {
            message_id, status, ..
        } => {
            assert_eq!(message_id, cmd.id.to_string());
            assert_eq!(status, AckStatus::Completed);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(hub.handle.link().state, LinkState::Connected);
    hub.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_unacked_command_replayed_after_reconnect() {
    let mut hub = Harness::start();
    let mut twin = hub.next_side().await;
    twin.accept_handshake().await;

    let cmd = assigned_command("replay");
    hub.handle.dispatch(&cmd).unwrap();
    let frame = twin.next_frame().await;
    assert_eq!(frame["message_id"], cmd.id.to_string());

    // the twin goes away without acknowledging
    drop(twin);

    let mut twin = hub.next_side().await;
    twin.accept_handshake().await;
    let replayed = twin.next_frame().await;
    assert_eq!(replayed["type"], "command");
    assert_eq!(replayed["message_id"], cmd.id.to_string());
    assert_eq!(replayed["correlation_id"], "replay");

    twin.ack(&replayed, AckStatus::Received).await;
    assert!(matches!(hub.next_event().await, TwinEvent::Ack { .. }));
    assert_eq!(hub.handle.link().reconnects, 1);
    hub.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_retracted_command_not_replayed_after_reconnect() {
    let mut hub = Harness::start();
    let mut twin = hub.next_side().await;
    twin.accept_handshake().await;

    let stale = assigned_command("stale");
    hub.handle.dispatch(&stale).unwrap();
    let frame = twin.next_frame().await;
    assert_eq!(frame["message_id"], stale.id.to_string());
    drop(twin);

    // the coordinator re-issued it while the link was down
    hub.handle.retract(stale.id);
    let fresh = assigned_command("fresh");
    hub.handle.dispatch(&fresh).unwrap();

    let mut twin = hub.next_side().await;
    twin.accept_handshake().await;
    let replayed = twin.next_frame().await;
    assert_eq!(replayed["message_id"], fresh.id.to_string());
    twin.ack(&replayed, AckStatus::Received).await;
    assert!(matches!(hub.next_event().await, TwinEvent::Ack { .. }));

    let extra = tokio::time::timeout(Duration::from_millis(500), twin.from_hub.recv()).await;
    assert!(extra.is_err());
    assert_eq!(hub.handle.link().buffered, 0);
    assert_eq!(hub.handle.link().in_flight, 0);
    hub.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_sensor_data_is_acknowledged_and_forwarded() {
    let mut hub = Harness::start();
    let mut twin = hub.next_side().await;
    twin.accept_handshake().await;

    let frame = serde_json::json!({
        "type": "sensor_data",
        "payload": {"coordinates": [
            {"x": 1.0, "y": 2.0, "z": 0.5, "defect_type": "vacancy", "severity": 7}
        ]},
        "timestamp": "2026-01-01T00:00:00Z",
        "correlation_id": "scan-9",
        "message_id": "m-1"
    });
    twin.to_hub.send(Ok(frame.to_string())).await.unwrap();

    let ack = twin.next_frame().await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["payload"]["message_id"], "m-1");
    assert_eq!(ack["payload"]["status"], "received");
    assert_eq!(ack["correlation_id"], "scan-9");

    match hub.next_event().await {
        TwinEvent::SensorData {
            correlation_id,
            readings,
        } => {
            assert_eq!(correlation_id.as_str(), "scan-9");
            assert_eq!(readings.len(), 1);
            assert_eq!(readings[0].severity, 7);
        }
        other => panic!("unexpected {:?}", other),
    }
    hub.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_is_dropped() {
    let mut hub = Harness::start();
    let mut twin = hub.next_side().await;
    twin.accept_handshake().await;

    twin.to_hub.send(Ok("{not json".to_string())).await.unwrap();

    let cmd = assigned_command("after-garbage");
    hub.handle.dispatch(&cmd).unwrap();
    let frame = twin.next_frame().await;
    assert_eq!(frame["message_id"], cmd.id.to_string());
    assert_eq!(hub.handle.link().reconnects, 0);
    hub.cancel.cancel();
}
