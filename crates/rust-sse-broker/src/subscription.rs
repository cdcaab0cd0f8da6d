use std::sync::Arc;

use rust_sse_wire::{EventId, Message};
use tokio::sync::mpsc;

/// The default topic. Messages published without an explicit topic and
/// subscriptions created without topics use it.
pub const DEFAULT_TOPIC: &str = "";

/// A consumer's registration with the broker.
///
/// The channel is the subscription's identity: subscribing the same sender
/// twice is a no-op, and unsubscribing is keyed by it. After a successful
/// subscribe the broker and its cancellation watcher hold the only senders,
/// so the receiver sees `None` exactly when the broker lets go of the
/// subscription (cancellation, unsubscribe or shutdown).
#[derive(Debug)]
pub struct Subscription {
    /// Outbound channel the broker delivers messages on.
    pub sender: mpsc::Sender<Arc<Message>>,
    /// The consumer's last seen event id; unset for a fresh consumer.
    pub last_event_id: EventId,
    /// Topics to receive. An empty list means the default topic.
    pub topics: Vec<String>,
}

impl Subscription {
    /// Creates a subscription, substituting the default topic for an empty
    /// topic list.
    pub fn new(
        sender: mpsc::Sender<Arc<Message>>,
        last_event_id: EventId,
        topics: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut subscription = Self {
            sender,
            last_event_id,
            topics: topics.into_iter().map(Into::into).collect(),
        };
        subscription.normalize();
        subscription
    }

    pub(crate) fn normalize(&mut self) {
        if self.topics.is_empty() {
            self.topics.push(DEFAULT_TOPIC.to_string());
        }
    }

    pub(crate) fn wants_topic(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }
}
