// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Twin Connection Manager
//
// Drives a TwinSession against a real transport. One task owns the session
// and the socket; the rest of the hub talks to it through a TwinHandle
// (outbound) and a TwinEvent stream (inbound). The transport is abstracted
// behind TwinConnector so tests can stand in for the twin.

use super::protocol::{Envelope, Inbound, StatusPayload};
use super::session::{AckKind, LinkSnapshot, LinkState, Outbound, SessionAction, SessionConfig, TwinSession};
use crate::application::metrics::{Counter, HubMetrics};
use crate::domain::command::{AckStatus, CommandDispatcher, CommandId, CoordinateCommand, DispatchError};
use crate::domain::coordinate::{CorrelationId, SensorReading};
use crate::domain::events::LinkEvent;
use crate::domain::hub_config::TwinConfig;
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SESSION_NAME: &str = "twin";
const DEFAULT_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed by peer")]
    Closed,
}

/// Text-frame pipes of one established connection.
pub struct TwinChannel {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<Result<String, ConnectionError>>,
}

#[async_trait]
pub trait TwinConnector: Send + Sync {
    async fn connect(&self) -> Result<TwinChannel, ConnectionError>;
}

/// What the twin told the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum TwinEvent {
    SensorData {
        correlation_id: CorrelationId,
        readings: Vec<SensorReading>,
    },
    Status {
        correlation_id: CorrelationId,
        status: StatusPayload,
    },
    Ack {
        message_id: String,
        status: AckStatus,
        correlation_id: CorrelationId,
    },
    DeliveryFailed {
        command_id: CommandId,
        correlation_id: CorrelationId,
    },
    LinkChanged {
        from: LinkState,
        to: LinkState,
    },
}

/// Requests from the rest of the hub, handled in order by the manager task.
#[derive(Debug)]
enum Control {
    Send(Outbound),
    Retract(CommandId),
}

/// Cloneable sender side of the manager.
#[derive(Clone)]
pub struct TwinHandle {
    control: mpsc::UnboundedSender<Control>,
    link: watch::Receiver<LinkSnapshot>,
}

impl TwinHandle {
    pub fn link(&self) -> LinkSnapshot {
        *self.link.borrow()
    }

    pub fn send(&self, outbound: Outbound) -> Result<(), DispatchError> {
        self.control
            .send(Control::Send(outbound))
            .map_err(|_| DispatchError::Closed)
    }
}

impl CommandDispatcher for TwinHandle {
    fn dispatch(&self, command: &CoordinateCommand) -> Result<(), DispatchError> {
        let envelope = Envelope::command(command)
            .map_err(|e| DispatchError::Encode(command.id, e.to_string()))?;
        self.send(Outbound {
            envelope,
            command: Some(command.id),
        })
    }

    fn retract(&self, command_id: CommandId) {
        if self.control.send(Control::Retract(command_id)).is_err() {
            debug!(%command_id, "Twin manager gone; nothing to retract");
        }
    }
}

pub struct ConnectionManager {
    session: TwinSession,
    connector: Arc<dyn TwinConnector>,
    control: mpsc::UnboundedReceiver<Control>,
    events: mpsc::UnboundedSender<TwinEvent>,
    link: watch::Sender<LinkSnapshot>,
    connect_timeout: Duration,
    tick: Duration,
    event_bus: Option<EventBus>,
    metrics: Option<Arc<HubMetrics>>,
    reported_reconnects: u64,
}

impl ConnectionManager {
    pub fn new(
        config: &TwinConfig,
        connector: Arc<dyn TwinConnector>,
    ) -> (Self, TwinHandle, mpsc::UnboundedReceiver<TwinEvent>) {
        let session_config = SessionConfig::from(config);
        let connect_timeout = session_config.handshake_timeout;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = watch::channel(LinkSnapshot::default());

        let manager = Self {
            session: TwinSession::new(session_config, now()),
            connector,
            control: control_rx,
            events: events_tx,
            link: link_tx,
            connect_timeout,
            tick: DEFAULT_TICK,
            event_bus: None,
            metrics: None,
            reported_reconnects: 0,
        };
        let handle = TwinHandle {
            control: control_tx,
            link: link_rx,
        };
        (manager, handle, events_rx)
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<HubMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut channel: Option<TwinChannel> = None;
        let mut connecting: Option<JoinHandle<Result<TwinChannel, ConnectionError>>> = None;

        info!("Twin connection manager started");
        loop {
            let actions = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.session.poll(now()),
                Some(control) = self.control.recv() => match control {
                    Control::Send(outbound) => self.session.enqueue(outbound, now()),
                    Control::Retract(command_id) => {
                        self.session.retract(command_id);
                        Vec::new()
                    }
                },
                joined = join_connect(&mut connecting) => {
                    connecting = None;
                    match joined {
                        Ok(Ok(ch)) => {
                            channel = Some(ch);
                            self.session.on_connected(now())
                        }
                        Ok(Err(e)) => self.session.on_connect_failed(now(), &e.to_string()),
                        Err(e) => self.session.on_connect_failed(now(), &e.to_string()),
                    }
                }
                frame = recv_frame(&mut channel) => match frame {
                    Some(Ok(text)) => self.on_text(&text),
                    Some(Err(e)) => self.session.on_transport_error(now(), &e.to_string()),
                    None => self.session.on_transport_error(now(), "connection closed"),
                },
            };
            self.apply(actions, &mut channel, &mut connecting).await;
            self.publish_snapshot();
        }

        if let Some(handle) = connecting {
            handle.abort();
        }
        info!("Twin connection manager stopped");
    }

    fn on_text(&mut self, text: &str) -> Vec<SessionAction> {
        let inbound = match Envelope::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Dropping malformed twin frame");
                return Vec::new();
            }
        };

        match inbound {
            Inbound::Ack { correlation_id, ack } => {
                let (kind, actions) = self.session.on_ack(&ack.message_id, now());
                if kind == AckKind::Message {
                    self.emit(TwinEvent::Ack {
                        message_id: ack.message_id,
                        status: ack.status,
                        correlation_id,
                    });
                }
                actions
            }
            Inbound::SensorData {
                correlation_id,
                ack_id,
                readings,
            } => {
                let mut actions = self.session.on_frame();
                actions.extend(self.session.reply(Envelope::ack(
                    &ack_id,
                    &correlation_id,
                    AckStatus::Received,
                )));
                debug!(%correlation_id, count = readings.len(), "Sensor data from twin");
                self.emit(TwinEvent::SensorData {
                    correlation_id,
                    readings,
                });
                actions
            }
            Inbound::Status {
                correlation_id,
                ack_id,
                status,
            } => {
                let mut actions = self.session.on_frame();
                actions.extend(self.session.reply(Envelope::ack(
                    &ack_id,
                    &correlation_id,
                    AckStatus::Received,
                )));
                // link-level heartbeats carry no agent
                if status.agent_id.is_some() {
                    self.emit(TwinEvent::Status {
                        correlation_id,
                        status,
                    });
                }
                actions
            }
        }
    }

    async fn apply(
        &mut self,
        actions: Vec<SessionAction>,
        channel: &mut Option<TwinChannel>,
        connecting: &mut Option<JoinHandle<Result<TwinChannel, ConnectionError>>>,
    ) {
        let mut work: VecDeque<SessionAction> = actions.into();
        while let Some(action) = work.pop_front() {
            match action {
                SessionAction::Connect => {
                    debug!("Connecting to twin");
                    let connector = self.connector.clone();
                    let limit = self.connect_timeout;
                    *connecting = Some(tokio::spawn(async move {
                        match tokio::time::timeout(limit, connector.connect()).await {
                            Ok(result) => result,
                            Err(_) => Err(ConnectionError::Transport(format!(
                                "connect timed out after {:?}",
                                limit
                            ))),
                        }
                    }));
                }
                SessionAction::Send(envelope) => {
                    let text = match envelope.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode twin frame");
                            continue;
                        }
                    };
                    let result = match channel.as_ref() {
                        Some(ch) => ch.outbound.send(text).await.map_err(|_| "writer closed"),
                        None => Err("not connected"),
                    };
                    if let Err(reason) = result {
                        work.extend(self.session.on_transport_error(now(), reason));
                    }
                }
                SessionAction::Disconnect => {
                    *channel = None;
                }
                SessionAction::DeliveryFailed(outbound) => {
                    if let Some(command_id) = outbound.command {
                        self.emit(TwinEvent::DeliveryFailed {
                            command_id,
                            correlation_id: outbound.envelope.correlation_id,
                        });
                    }
                }
                SessionAction::StateChanged { from, to } => {
                    info!(%from, %to, "Twin link state changed");
                    if let Some(bus) = &self.event_bus {
                        bus.publish_link_event(LinkEvent::LinkStateChanged {
                            session: SESSION_NAME.to_string(),
                            from: from.to_string(),
                            to: to.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    self.emit(TwinEvent::LinkChanged { from, to });
                }
                SessionAction::CircuitChanged(state) => {
                    warn!(%state, "Twin circuit breaker changed state");
                    if let Some(bus) = &self.event_bus {
                        bus.publish_link_event(LinkEvent::CircuitStateChanged {
                            session: SESSION_NAME.to_string(),
                            state: state.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        }
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self.session.snapshot();
        if snapshot.reconnects > self.reported_reconnects {
            if let Some(metrics) = &self.metrics {
                metrics.add(
                    Counter::TwinReconnects,
                    snapshot.reconnects - self.reported_reconnects,
                );
            }
            self.reported_reconnects = snapshot.reconnects;
        }
        metrics::gauge!("qnms_twin_buffered").set(snapshot.buffered as f64);
        self.link.send_if_modified(|current| {
            let changed = *current != snapshot;
            *current = snapshot;
            changed
        });
    }

    fn emit(&self, event: TwinEvent) {
        if self.events.send(event).is_err() {
            debug!("No consumer for twin events");
        }
    }
}

/// Current time on the tokio clock, so paused-time tests drive the session.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn join_connect(
    connecting: &mut Option<JoinHandle<Result<TwinChannel, ConnectionError>>>,
) -> Result<Result<TwinChannel, ConnectionError>, tokio::task::JoinError> {
    match connecting {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn recv_frame(channel: &mut Option<TwinChannel>) -> Option<Result<String, ConnectionError>> {
    match channel {
        Some(ch) => ch.inbound.recv().await,
        None => std::future::pending().await,
    }
}
