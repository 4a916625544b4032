// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus - Pub/Sub for Engine Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels, so
// observers (UI, sync layers, debug tooling) can follow request lifecycles
// without hooking the engine itself.
//
// In-memory only: events are lost on restart. Snapshot/restore is the
// durable path; the bus is for live observation.

use crate::domain::events::EngineEvent;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,
    #[error("no event available")]
    Empty,
    #[error("receiver lagged by {0} events")]
    Lagged(u64),
}

/// Event bus for publishing and subscribing to engine events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffered capacity. Older events
    /// are dropped for lagging receivers once the buffer wraps.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers. Fire-and-forget: an event with no
    /// listeners is simply dropped.
    pub fn publish(&self, event: EngineEvent) {
        debug!(?event, "Publishing engine event");
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to engine events");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for engine events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
}

impl EventReceiver {
    /// Receive the next event without blocking.
    pub fn try_recv(&mut self) -> Result<EngineEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Drain everything currently buffered, skipping over lag gaps.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}
