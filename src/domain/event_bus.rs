//! Broadcast channel for handlespace events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. The registrar
//! core publishes a [`HandlespaceEvent`] for every registration, removal,
//! peer change and takeover; protocol tasks subscribe to mirror them.

use tokio::sync::broadcast;

use super::HandlespaceEvent;

/// Broadcast bus for [`HandlespaceEvent`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity
/// (default 10 000). When the ring buffer is full, the oldest events are
/// dropped for lagging receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HandlespaceEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    ///
    /// A capacity of 0 is raised to 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event; without
    /// receivers the event is dropped.
    pub fn publish(&self, event: HandlespaceEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new receiver for all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HandlespaceEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
