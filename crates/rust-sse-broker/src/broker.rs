use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_sse_wire::Message;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval};
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, BrokerResult};
use crate::replay::{NoopReplayProvider, ReplayProvider};
use crate::subscription::Subscription;

/// Configuration for a [`Broker`].
///
/// Out-of-range values are coerced to their defaults rather than rejected.
pub struct BrokerOptions {
    /// Capacity of the publish queue. Publishers block once this many
    /// messages wait for the broker loop. Zero is coerced to the default
    /// of 1.
    pub broadcast_buffer_size: usize,
    /// The replay policy. The default stores nothing.
    pub replay_provider: Box<dyn ReplayProvider>,
    /// Period between replay garbage collections. `None` or a zero
    /// duration disables the timer; it is also skipped when the provider's
    /// GC is a no-op.
    pub replay_gc_interval: Option<Duration>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            broadcast_buffer_size: 1,
            replay_provider: Box::new(NoopReplayProvider),
            replay_gc_interval: None,
        }
    }
}

impl BrokerOptions {
    fn gc_interval(&self) -> Option<Duration> {
        if !self.replay_provider.wants_gc() {
            return None;
        }
        self.replay_gc_interval.filter(|d| !d.is_zero())
    }
}

/// Single-loop pub/sub dispatcher.
///
/// All state (topic membership and the replay provider) lives in one
/// spawned task that multiplexes publishes, subscriptions, cancellations
/// and the GC timer, so none of it needs locking. Delivery to a subscriber
/// is a plain channel send: a slow subscriber backpressures the loop and
/// with it every publisher. That is this broker's character; it bounds
/// memory at the cost of throughput. Subscribers that need isolation pass
/// a channel with a larger capacity.
///
/// Stopping the broker closes every subscriber channel; afterwards every
/// operation returns [`BrokerError::Closed`].
pub struct Broker {
    publish_tx: mpsc::Sender<Message>,
    subscribe_tx: mpsc::Sender<SubscribeRequest>,
    done: CancellationToken,
    stopped: AtomicBool,
}

struct SubscribeRequest {
    subscription: Subscription,
    token: CancellationToken,
    ack: oneshot::Sender<()>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerOptions::default())
    }
}

impl Broker {
    /// Creates a broker and spawns its loop. Must be called from within a
    /// tokio runtime.
    pub fn new(options: BrokerOptions) -> Self {
        let gc_interval = options.gc_interval();
        let (publish_tx, publish_rx) = mpsc::channel(options.broadcast_buffer_size.max(1));
        let (subscribe_tx, subscribe_rx) = mpsc::channel(1);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::channel(1);
        let done = CancellationToken::new();

        let broker_loop = BrokerLoop {
            replay: options.replay_provider,
            subscribers: Vec::new(),
            unsubscribe_tx,
            done: done.clone(),
        };
        tokio::spawn(broker_loop.run(publish_rx, subscribe_rx, unsubscribe_rx, gc_interval));

        Self {
            publish_tx,
            subscribe_tx,
            done,
            stopped: AtomicBool::new(false),
        }
    }

    /// Publishes a message to every subscriber of its topic.
    ///
    /// Blocks until the broker accepts the message; acceptance happens
    /// before any delivery. Messages published on one topic are delivered
    /// in publish order.
    ///
    /// # Errors
    /// [`BrokerError::Closed`] if the broker was stopped, including while
    /// this call was blocked on a full publish queue.
    pub async fn publish(&self, message: Message) -> BrokerResult<()> {
        if self.done.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        tokio::select! {
            result = self.publish_tx.send(message) => result.map_err(|_| BrokerError::Closed),
            () = self.done.cancelled() => Err(BrokerError::Closed),
        }
    }

    /// Registers a subscription with the broker.
    ///
    /// If the subscription carries a last seen event id the replay provider
    /// first sends everything the subscriber missed on its channel; live
    /// delivery starts strictly afterwards. A successful return
    /// happens-before all subsequent publishes. Subscribing a sender that
    /// is already registered is a no-op.
    ///
    /// When `token` is cancelled the broker unsubscribes and closes the
    /// channel within bounded time. The broker stopping closes the channel
    /// regardless of the token.
    ///
    /// # Errors
    /// [`BrokerError::Closed`] if the broker was stopped.
    pub async fn subscribe(
        &self,
        token: CancellationToken,
        mut subscription: Subscription,
    ) -> BrokerResult<()> {
        if self.done.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        subscription.normalize();
        let (ack, accepted) = oneshot::channel();
        let request = SubscribeRequest {
            subscription,
            token,
            ack,
        };
        tokio::select! {
            result = self.subscribe_tx.send(request) => {
                result.map_err(|_| BrokerError::Closed)?;
            }
            () = self.done.cancelled() => return Err(BrokerError::Closed),
        }
        tokio::select! {
            result = accepted => result.map_err(|_| BrokerError::Closed),
            () = self.done.cancelled() => Err(BrokerError::Closed),
        }
    }

    /// Stops the broker: the loop exits and every subscriber channel
    /// closes.
    ///
    /// # Errors
    /// [`BrokerError::Closed`] on every call after the first.
    pub fn stop(&self) -> BrokerResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        tracing::debug!("broker stopping");
        self.done.cancel();
        Ok(())
    }

    /// Whether [`Broker::stop`] has been called.
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        // without this the loop task would outlive the handle
        self.done.cancel();
    }
}

struct ActiveSubscriber {
    sender: mpsc::Sender<Arc<Message>>,
    topics: Vec<String>,
}

struct BrokerLoop {
    replay: Box<dyn ReplayProvider>,
    subscribers: Vec<ActiveSubscriber>,
    unsubscribe_tx: mpsc::Sender<mpsc::Sender<Arc<Message>>>,
    done: CancellationToken,
}

impl BrokerLoop {
    async fn run(
        mut self,
        mut publish_rx: mpsc::Receiver<Message>,
        mut subscribe_rx: mpsc::Receiver<SubscribeRequest>,
        mut unsubscribe_rx: mpsc::Receiver<mpsc::Sender<Arc<Message>>>,
        gc_interval: Option<Duration>,
    ) {
        let mut gc = gc_interval.map(|d| interval_at(Instant::now() + d, d));
        let done = self.done.clone();
        loop {
            tokio::select! {
                Some(message) = publish_rx.recv() => self.handle_publish(message).await,
                Some(request) = subscribe_rx.recv() => self.handle_subscribe(request).await,
                Some(sender) = unsubscribe_rx.recv() => self.handle_unsubscribe(&sender),
                _ = tick(&mut gc) => self.replay.gc(),
                () = done.cancelled() => break,
            }
        }
        // dropping the senders is what closes the subscriber channels
        let count = self.subscribers.len();
        self.subscribers.clear();
        tracing::debug!(subscribers = count, "broker loop exited");
    }

    async fn handle_publish(&mut self, message: Message) {
        let message = self.replay.put(message);
        let mut dead = Vec::new();
        for (index, subscriber) in self.subscribers.iter().enumerate() {
            if !subscriber.topics.iter().any(|t| t == message.topic()) {
                continue;
            }
            if subscriber.sender.send(Arc::clone(&message)).await.is_err() {
                dead.push(index);
            }
        }
        for index in dead.into_iter().rev() {
            self.subscribers.remove(index);
            tracing::debug!("dropped subscriber with a gone receiver");
        }
    }

    async fn handle_subscribe(&mut self, request: SubscribeRequest) {
        let SubscribeRequest {
            subscription,
            token,
            ack,
        } = request;
        let duplicate = self
            .subscribers
            .iter()
            .any(|s| s.sender.same_channel(&subscription.sender));
        if duplicate {
            let _ = ack.send(());
            return;
        }

        // replay runs to completion here, inside the loop, so no live
        // publish can interleave with it
        if let Err(err) = self.replay.replay(&subscription).await {
            tracing::warn!(error = %err, "replay skipped");
        }

        self.spawn_watcher(subscription.sender.clone(), token);
        self.subscribers.push(ActiveSubscriber {
            sender: subscription.sender,
            topics: subscription.topics,
        });
        let _ = ack.send(());
    }

    /// Reconciles the two independent signals that can end a subscription:
    /// the caller's token and broker shutdown. The inner select keeps the
    /// watcher from leaking when both fire at once.
    fn spawn_watcher(&self, sender: mpsc::Sender<Arc<Message>>, token: CancellationToken) {
        let unsubscribe_tx = self.unsubscribe_tx.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    tokio::select! {
                        _ = unsubscribe_tx.send(sender) => {}
                        () = done.cancelled() => {}
                    }
                }
                () = done.cancelled() => {}
            }
        });
    }

    fn handle_unsubscribe(&mut self, sender: &mpsc::Sender<Arc<Message>>) {
        self.subscribers
            .retain(|s| !s.sender.same_channel(sender));
    }
}

async fn tick(gc: &mut Option<Interval>) {
    match gc {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
