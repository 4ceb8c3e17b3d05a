// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Hub Events
//
// In-memory event streaming over tokio broadcast channels. Persistence and
// export sinks subscribe here; publishing never waits on a subscriber and
// never fails when there are none.

use crate::domain::coordinate::CorrelationId;
use crate::domain::events::{AgentEvent, CommandEvent, DefectEvent, LinkEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified hub event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum HubEvent {
    Defect(DefectEvent),
    Command(CommandEvent),
    Agent(AgentEvent),
    Link(LinkEvent),
}

impl HubEvent {
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            HubEvent::Defect(e) => e.correlation_id(),
            HubEvent::Command(e) => e.correlation_id(),
            HubEvent::Agent(_) | HubEvent::Link(_) => None,
        }
    }
}

/// Event bus for publishing and subscribing to hub events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<HubEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_defect_event(&self, event: DefectEvent) {
        self.publish(HubEvent::Defect(event));
    }

    pub fn publish_command_event(&self, event: CommandEvent) {
        self.publish(HubEvent::Command(event));
    }

    pub fn publish_agent_event(&self, event: AgentEvent) {
        self.publish(HubEvent::Agent(event));
    }

    pub fn publish_link_event(&self, event: LinkEvent) {
        self.publish(HubEvent::Link(event));
    }

    fn publish(&self, event: HubEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is subscribed
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all hub events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of one correlation id (one defect's trace)
    pub fn subscribe_correlation(&self, correlation_id: CorrelationId) -> CorrelationEventReceiver {
        CorrelationEventReceiver {
            receiver: self.sender.subscribe(),
            correlation_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all hub events
pub struct EventReceiver {
    receiver: broadcast::Receiver<HubEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<HubEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<HubEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to a single correlation id
pub struct CorrelationEventReceiver {
    receiver: broadcast::Receiver<HubEvent>,
    correlation_id: CorrelationId,
}

impl CorrelationEventReceiver {
    pub async fn recv(&mut self) -> Result<HubEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.correlation_id() == Some(&self.correlation_id) {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;
    use crate::domain::defect::DefectId;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_agent_event(AgentEvent::AgentRegistered {
            agent_id: AgentId::new("nano-1"),
            recovered: false,
            timestamp: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            HubEvent::Agent(AgentEvent::AgentRegistered { agent_id, .. }) => {
                assert_eq!(agent_id.as_str(), "nano-1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_correlation_filter() {
        let event_bus = EventBus::new(10);
        let wanted = CorrelationId::from("wanted");
        let mut receiver = event_bus.subscribe_correlation(wanted.clone());

        for corr in [CorrelationId::from("other"), wanted.clone()] {
            event_bus.publish_defect_event(DefectEvent::DefectCompleted {
                defect_id: DefectId::new(),
                correlation_id: corr,
                timestamp: Utc::now(),
            });
        }

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.correlation_id(), Some(&wanted));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::default();
        assert_eq!(event_bus.subscriber_count(), 0);
        event_bus.publish_link_event(LinkEvent::CircuitStateChanged {
            session: "twin".into(),
            state: "open".into(),
            timestamp: Utc::now(),
        });
        let mut receiver = event_bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_event_serialization_carries_operation() {
        let event = HubEvent::Defect(DefectEvent::DefectUnrepairable {
            defect_id: DefectId::new(),
            correlation_id: CorrelationId::from("c"),
            reason: "thermal".into(),
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "defect");
        assert_eq!(json["operation"], "defect_unrepairable");
        assert_eq!(json["correlation_id"], "c");
    }
}
