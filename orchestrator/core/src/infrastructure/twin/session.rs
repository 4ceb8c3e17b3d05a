// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Twin link session state.
//!
//! [`TwinSession`] owns everything about the twin link except the socket:
//! link state, the outbound buffer, unacknowledged messages, heartbeats, the
//! circuit breaker and reconnect backoff. Every input takes the current
//! [`Instant`] and returns the [`SessionAction`]s the transport must perform,
//! so the whole lifecycle is testable without I/O.
//!
//! ```text
//! disconnected ──connect──▶ connecting ──handshake ack──▶ connected
//!      ▲                        │                           │  ▲
//!      └──────── failure ───────┴──────── failure ──────────┤  │ frame
//!                                                            ▼  │
//!                                                          degraded
//! ```
//!
//! Messages enqueued while the link is not ready are buffered and flushed in
//! order after the next handshake. Messages in flight when the link drops go
//! back to the head of the buffer.

use super::protocol::Envelope;
use crate::domain::command::CommandId;
use crate::domain::hub_config::TwinConfig;
use crate::infrastructure::backoff::ReconnectBackoff;
use crate::infrastructure::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected but heartbeats are going unanswered.
    Degraded,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub missed_heartbeat_limit: u32,
    pub ack_timeout: Duration,
    pub ack_retries: u32,
    pub handshake_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub buffer_high_water: usize,
}

impl From<&TwinConfig> for SessionConfig {
    fn from(c: &TwinConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(c.heartbeat_interval_secs),
            missed_heartbeat_limit: c.missed_heartbeat_limit.max(1),
            ack_timeout: Duration::from_millis(c.ack_timeout_ms),
            ack_retries: c.ack_retries,
            handshake_timeout: Duration::from_millis(c.handshake_timeout_ms),
            breaker: CircuitBreakerConfig::from(&c.breaker),
            backoff_initial: Duration::from_secs(c.backoff.initial_secs),
            backoff_max: Duration::from_secs(c.backoff.max_secs),
            buffer_high_water: c.buffer_high_water,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&TwinConfig::default())
    }
}

/// A message waiting for delivery to the twin.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub envelope: Envelope,
    /// Set for command frames so a delivery failure can be traced back.
    pub command: Option<CommandId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Open a new transport connection.
    Connect,
    /// Write a frame on the current connection.
    Send(Envelope),
    /// Drop the current connection.
    Disconnect,
    /// The message exhausted its retries without an acknowledgment.
    DeliveryFailed(Outbound),
    StateChanged { from: LinkState, to: LinkState },
    CircuitChanged(CircuitState),
}

/// What an inbound acknowledgment referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Handshake,
    Heartbeat,
    Message,
}

/// Observable link figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub circuit: CircuitState,
    pub buffered: usize,
    pub in_flight: usize,
    pub reconnects: u64,
}

impl Default for LinkSnapshot {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            circuit: CircuitState::Closed,
            buffered: 0,
            in_flight: 0,
            reconnects: 0,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    outbound: Outbound,
    deadline: Instant,
    sends: u32,
}

#[derive(Debug)]
pub struct TwinSession {
    config: SessionConfig,
    state: LinkState,
    buffer: VecDeque<Outbound>,
    in_flight: Vec<InFlight>,
    handshake: Option<(String, Instant)>,
    heartbeat_pending: Option<String>,
    next_heartbeat_at: Option<Instant>,
    missed_heartbeats: u32,
    breaker: CircuitBreaker,
    backoff: ReconnectBackoff,
    next_connect_at: Option<Instant>,
    established: u64,
    high_water_warned: bool,
}

impl TwinSession {
    /// A disconnected session that will try to connect on the first poll.
    pub fn new(config: SessionConfig, now: Instant) -> Self {
        Self {
            breaker: CircuitBreaker::new(config.breaker),
            backoff: ReconnectBackoff::new(config.backoff_initial, config.backoff_max),
            config,
            state: LinkState::Disconnected,
            buffer: VecDeque::new(),
            in_flight: Vec::new(),
            handshake: None,
            heartbeat_pending: None,
            next_heartbeat_at: None,
            missed_heartbeats: 0,
            next_connect_at: Some(now),
            established: 0,
            high_water_warned: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn next_connect_at(&self) -> Option<Instant> {
        self.next_connect_at
    }

    /// Handshake completed and link not dropped since.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, LinkState::Connected | LinkState::Degraded)
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state,
            circuit: self.breaker.state(),
            buffered: self.buffer.len(),
            in_flight: self.in_flight.len(),
            reconnects: self.established.saturating_sub(1),
        }
    }

    /// Send now if the link is ready, otherwise buffer.
    pub fn enqueue(&mut self, outbound: Outbound, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.is_ready() {
            self.transmit(outbound, now, &mut actions);
        } else {
            self.buffer.push_back(outbound);
            self.check_high_water();
        }
        actions
    }

    /// Forget a command frame that is buffered or awaiting its ack, so it is
    /// neither replayed after a reconnect nor reported as a delivery failure.
    pub fn retract(&mut self, command_id: CommandId) -> bool {
        let before = self.buffer.len() + self.in_flight.len();
        self.buffer.retain(|o| o.command != Some(command_id));
        self.in_flight.retain(|entry| entry.outbound.command != Some(command_id));
        let removed = before - self.buffer.len() - self.in_flight.len();
        if removed > 0 {
            debug!(%command_id, removed, "Retracted twin command frame");
            self.check_high_water();
        }
        removed > 0
    }

    /// Fire-and-forget frame (acks to the twin). Dropped when not ready.
    pub fn reply(&self, envelope: Envelope) -> Vec<SessionAction> {
        if self.is_ready() {
            vec![SessionAction::Send(envelope)]
        } else {
            Vec::new()
        }
    }

    /// Drive timers: reconnects, handshake timeout, heartbeats, ack retries.
    pub fn poll(&mut self, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match self.state {
            LinkState::Disconnected => self.poll_reconnect(now, &mut actions),
            LinkState::Connecting => {
                let expired = matches!(&self.handshake, Some((_, deadline)) if now >= *deadline);
                if expired {
                    self.fail(now, "handshake timed out", &mut actions);
                }
            }
            LinkState::Connected | LinkState::Degraded => {
                self.poll_heartbeat(now, &mut actions);
                if self.is_ready() {
                    self.poll_acks(now, &mut actions);
                }
            }
        }
        actions
    }

    /// Transport is open; start the handshake.
    pub fn on_connected(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.state != LinkState::Connecting {
            return Vec::new();
        }
        let handshake = Envelope::handshake();
        self.handshake = Some((handshake.id().to_string(), now + self.config.handshake_timeout));
        vec![SessionAction::Send(handshake)]
    }

    pub fn on_connect_failed(&mut self, now: Instant, reason: &str) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.fail(now, reason, &mut actions);
        actions
    }

    pub fn on_transport_error(&mut self, now: Instant, reason: &str) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.fail(now, reason, &mut actions);
        actions
    }

    /// Any inbound frame proves the link is alive.
    pub fn on_frame(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.mark_alive(&mut actions);
        actions
    }

    pub fn on_ack(&mut self, message_id: &str, now: Instant) -> (AckKind, Vec<SessionAction>) {
        let mut actions = Vec::new();

        if matches!(&self.handshake, Some((id, _)) if id == message_id) {
            self.handshake = None;
            self.complete_handshake(now, &mut actions);
            return (AckKind::Handshake, actions);
        }

        let heartbeat = self.heartbeat_pending.as_deref() == Some(message_id);
        self.mark_alive(&mut actions);
        if heartbeat {
            return (AckKind::Heartbeat, actions);
        }

        if let Some(i) = self
            .in_flight
            .iter()
            .position(|entry| entry.outbound.envelope.id() == message_id)
        {
            let entry = self.in_flight.remove(i);
            debug!(message_id, sends = entry.sends, "Twin message acknowledged");
        }
        (AckKind::Message, actions)
    }

    fn set_state(&mut self, to: LinkState, actions: &mut Vec<SessionAction>) {
        if self.state != to {
            let from = self.state;
            self.state = to;
            actions.push(SessionAction::StateChanged { from, to });
        }
    }

    fn push_circuit_change(&self, before: CircuitState, actions: &mut Vec<SessionAction>) {
        let after = self.breaker.state();
        if after != before {
            actions.push(SessionAction::CircuitChanged(after));
        }
    }

    fn transmit(&mut self, outbound: Outbound, now: Instant, actions: &mut Vec<SessionAction>) {
        actions.push(SessionAction::Send(outbound.envelope.clone()));
        self.in_flight.push(InFlight {
            outbound,
            deadline: now + self.config.ack_timeout,
            sends: 1,
        });
    }

    fn check_high_water(&mut self) {
        let len = self.buffer.len();
        let high_water = self.config.buffer_high_water;
        if len > high_water && !self.high_water_warned {
            warn!(buffered = len, high_water, "Twin outbound buffer above high-water mark");
            self.high_water_warned = true;
        } else if len <= high_water {
            self.high_water_warned = false;
        }
    }

    fn poll_reconnect(&mut self, now: Instant, actions: &mut Vec<SessionAction>) {
        let Some(at) = self.next_connect_at else {
            return;
        };
        if now < at {
            return;
        }
        let before = self.breaker.state();
        match self.breaker.try_acquire(now) {
            Ok(()) => {
                self.next_connect_at = None;
                self.push_circuit_change(before, actions);
                self.set_state(LinkState::Connecting, actions);
                actions.push(SessionAction::Connect);
            }
            Err(open) => {
                // a blocked attempt still consumes its backoff step
                let delay = self.backoff.next_delay();
                self.next_connect_at = Some(now + delay);
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    open_ms = open.retry_after.as_millis() as u64,
                    "Twin reconnect skipped, circuit open"
                );
            }
        }
    }

    fn poll_heartbeat(&mut self, now: Instant, actions: &mut Vec<SessionAction>) {
        let Some(due) = self.next_heartbeat_at else {
            return;
        };
        if now < due {
            return;
        }

        if self.heartbeat_pending.take().is_some() {
            self.missed_heartbeats += 1;
            warn!(missed = self.missed_heartbeats, "Twin heartbeat not acknowledged");
            if self.missed_heartbeats >= self.config.missed_heartbeat_limit {
                self.fail(now, "heartbeat timeout", actions);
                return;
            }
            self.set_state(LinkState::Degraded, actions);
        }

        let heartbeat = Envelope::heartbeat();
        self.heartbeat_pending = heartbeat.message_id.clone();
        self.next_heartbeat_at = Some(now + self.config.heartbeat_interval);
        actions.push(SessionAction::Send(heartbeat));
    }

    fn poll_acks(&mut self, now: Instant, actions: &mut Vec<SessionAction>) {
        let mut i = 0;
        while i < self.in_flight.len() {
            if now < self.in_flight[i].deadline {
                i += 1;
                continue;
            }
            if self.in_flight[i].sends <= self.config.ack_retries {
                let entry = &mut self.in_flight[i];
                entry.sends += 1;
                entry.deadline = now + self.config.ack_timeout;
                debug!(
                    message_id = entry.outbound.envelope.id(),
                    sends = entry.sends,
                    "Re-sending unacknowledged twin message"
                );
                actions.push(SessionAction::Send(entry.outbound.envelope.clone()));
                i += 1;
            } else {
                let entry = self.in_flight.remove(i);
                warn!(
                    message_id = entry.outbound.envelope.id(),
                    sends = entry.sends,
                    "Twin message never acknowledged"
                );
                actions.push(SessionAction::DeliveryFailed(entry.outbound));
            }
        }
    }

    fn mark_alive(&mut self, actions: &mut Vec<SessionAction>) {
        if !self.is_ready() {
            return;
        }
        self.heartbeat_pending = None;
        self.missed_heartbeats = 0;
        if self.state == LinkState::Degraded {
            self.set_state(LinkState::Connected, actions);
        }
    }

    fn complete_handshake(&mut self, now: Instant, actions: &mut Vec<SessionAction>) {
        let before = self.breaker.state();
        self.breaker.record_success();
        self.push_circuit_change(before, actions);
        self.backoff.reset();

        self.missed_heartbeats = 0;
        self.heartbeat_pending = None;
        self.next_heartbeat_at = Some(now + self.config.heartbeat_interval);
        self.established += 1;
        self.set_state(LinkState::Connected, actions);
        info!(buffered = self.buffer.len(), "Twin link established");

        while let Some(outbound) = self.buffer.pop_front() {
            self.transmit(outbound, now, actions);
        }
        self.high_water_warned = false;
    }

    fn fail(&mut self, now: Instant, reason: &str, actions: &mut Vec<SessionAction>) {
        if self.state == LinkState::Disconnected {
            return;
        }
        warn!(reason, state = %self.state, "Twin link failed");

        let before = self.breaker.state();
        self.breaker.record_failure(now);
        self.push_circuit_change(before, actions);

        let in_flight = std::mem::take(&mut self.in_flight);
        for entry in in_flight.into_iter().rev() {
            self.buffer.push_front(entry.outbound);
        }

        self.handshake = None;
        self.heartbeat_pending = None;
        self.next_heartbeat_at = None;
        self.missed_heartbeats = 0;

        let delay = self.backoff.next_delay();
        self.next_connect_at = Some(now + delay);
        debug!(delay_ms = delay.as_millis() as u64, "Twin reconnect scheduled");

        actions.push(SessionAction::Disconnect);
        self.set_state(LinkState::Disconnected, actions);
        self.check_high_water();
    }
}
