mod buffer;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rust_sse_wire::Message;

use crate::error::ReplayError;
use crate::subscription::Subscription;
use buffer::{Entry, MessageBuffer};

/// Store of recently published messages that resends what a reconnecting
/// subscriber missed.
///
/// Implementations are driven exclusively from the broker's loop, one call
/// at a time, and therefore need no interior synchronization.
#[async_trait]
pub trait ReplayProvider: Send {
    /// Offers a published message to the buffer and returns the shared
    /// handle the broker delivers. Auto-id providers assign the message's
    /// id here, before the first delivery; providers that reject a message
    /// (no id in external-id mode) do so silently; the message is still
    /// published live.
    fn put(&mut self, message: Message) -> Arc<Message>;

    /// Sends every buffered message the subscription missed on its channel,
    /// in insertion order, filtered by the subscription's topics.
    ///
    /// An unset last seen id means nothing to do. A lookup failure is
    /// reported but must leave the buffer intact; the broker logs and
    /// continues without replay.
    async fn replay(&mut self, subscription: &Subscription) -> Result<(), ReplayError>;

    /// Evicts entries no longer eligible for replay. The default is a no-op.
    fn gc(&mut self) {}

    /// Whether periodic [`gc`](ReplayProvider::gc) calls do anything; lets
    /// the broker skip scheduling the timer entirely.
    fn wants_gc(&self) -> bool {
        false
    }
}

/// Replay provider that stores nothing. The broker's default.
#[derive(Debug, Default)]
pub struct NoopReplayProvider;

#[async_trait]
impl ReplayProvider for NoopReplayProvider {
    fn put(&mut self, message: Message) -> Arc<Message> {
        Arc::new(message)
    }

    async fn replay(&mut self, _subscription: &Subscription) -> Result<(), ReplayError> {
        Ok(())
    }
}

/// Count-capped replay: a bounded FIFO that evicts the oldest entry when
/// full. Garbage collection is a no-op.
#[derive(Debug)]
pub struct FiniteReplayProvider {
    buffer: MessageBuffer,
}

impl FiniteReplayProvider {
    /// A provider holding at most `count` externally-identified messages.
    /// Messages without an id are not stored. A zero count is treated as 1.
    pub fn new(count: usize) -> Self {
        Self {
            buffer: MessageBuffer::bounded(count, false),
        }
    }

    /// Like [`FiniteReplayProvider::new`], but the provider assigns
    /// monotonic integer ids to every stored message.
    pub fn with_auto_ids(count: usize) -> Self {
        Self {
            buffer: MessageBuffer::bounded(count, true),
        }
    }

    /// Number of currently buffered messages.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }
}

#[async_trait]
impl ReplayProvider for FiniteReplayProvider {
    fn put(&mut self, message: Message) -> Arc<Message> {
        self.buffer.queue(message)
    }

    async fn replay(&mut self, subscription: &Subscription) -> Result<(), ReplayError> {
        send_missed(&self.buffer, subscription, false).await
    }
}

/// Time-capped replay: an unbounded FIFO whose entries expire.
///
/// [`gc`](ReplayProvider::gc) walks the FIFO front to back, dropping
/// entries whose expiry is in the past, and stops at the first entry that
/// is still valid (entries are expected to expire roughly in insertion
/// order). Expired entries that GC has not reached yet are skipped at
/// replay time.
#[derive(Debug)]
pub struct ValidReplayProvider {
    buffer: MessageBuffer,
}

impl Default for ValidReplayProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidReplayProvider {
    /// A TTL-bounded provider for externally-identified messages.
    pub fn new() -> Self {
        Self {
            buffer: MessageBuffer::unbounded(false),
        }
    }

    /// Like [`ValidReplayProvider::new`], but the provider assigns
    /// monotonic integer ids to every stored message.
    pub fn with_auto_ids() -> Self {
        Self {
            buffer: MessageBuffer::unbounded(true),
        }
    }

    /// Number of currently buffered messages, expired ones included.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }
}

#[async_trait]
impl ReplayProvider for ValidReplayProvider {
    fn put(&mut self, message: Message) -> Arc<Message> {
        self.buffer.queue(message)
    }

    async fn replay(&mut self, subscription: &Subscription) -> Result<(), ReplayError> {
        send_missed(&self.buffer, subscription, true).await
    }

    fn gc(&mut self) {
        let now = Instant::now();
        while self.buffer.front().is_some_and(|e| expired(e, now)) {
            self.buffer.evict_front();
        }
    }

    fn wants_gc(&self) -> bool {
        true
    }
}

fn expired(entry: &Entry, now: Instant) -> bool {
    // entries without an expiry never expire; keep while strictly in the future
    entry.message.expires_at().is_some_and(|at| at <= now)
}

/// Common replay walk: resolve the cursor, then send every entry after it
/// that matches the subscription's topics (and, for TTL buffers, is still
/// valid). A receiver that goes away mid-replay just ends the walk; the
/// broker notices on the next live delivery.
async fn send_missed(
    buffer: &MessageBuffer,
    subscription: &Subscription,
    check_expiry: bool,
) -> Result<(), ReplayError> {
    let Some(id) = subscription.last_event_id.as_str() else {
        return Ok(());
    };
    let now = Instant::now();
    for entry in buffer.after(id)? {
        if check_expiry && expired(entry, now) {
            continue;
        }
        if !subscription.wants_topic(&entry.topic) {
            continue;
        }
        if subscription
            .sender
            .send(Arc::clone(&entry.message))
            .await
            .is_err()
        {
            break;
        }
    }
    Ok(())
}
