//! Change notifications.
//!
//! The cache pushes one [`CacheEvent::Patch`] per applied operation, cascades
//! included, and one [`CacheEvent::Reset`] after every reset or import.
//! Subscribers receive events over unbounded channels, in emission order.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::{Record, RecordOperation};

/// Sender half held by the cache.
pub type EventSender = mpsc::UnboundedSender<CacheEvent>;

/// Receiver half returned by `Cache::subscribe`.
pub type EventReceiver = mpsc::UnboundedReceiver<CacheEvent>;

/// An event emitted by the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CacheEvent {
    /// An operation was applied
    Patch {
        operation: RecordOperation,
        data: Option<Record>,
    },
    /// The cache was reset, forked or imported
    Reset,
}

/// Fan-out list of subscribers.
#[derive(Debug, Default)]
pub struct Listeners {
    senders: Vec<EventSender>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Check if there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Send an event to every subscriber, dropping closed ones.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn emit(&mut self, event: CacheEvent) -> usize {
        let before = self.senders.len();
        self.senders.retain(|sender| sender.send(event.clone()).is_ok());

        let pruned = before - self.senders.len();
        if pruned > 0 {
            tracing::warn!(pruned, remaining = self.senders.len(), "Dropped closed cache listeners");
        }
        self.senders.len()
    }
}
