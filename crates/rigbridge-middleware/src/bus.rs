//! Process-wide, topic-based publish/subscribe event bus.
//!
//! Each call to [`EventBus::subscribe`] creates an independent bounded queue
//! for that subscriber.  [`EventBus::publish`] delivers a copy of the event
//! to every queue currently subscribed to the topic.
//!
//! # Backpressure
//!
//! Publishing is **blocking**, not fire-and-forget: with the default
//! [`OverflowPolicy::Block`] a full subscriber queue suspends the publisher
//! until that subscriber catches up.  A slow subscriber therefore stalls
//! every publisher on the topic.  Non-critical topics (log lines) should be
//! subscribed with [`OverflowPolicy::DropOldest`] or
//! [`OverflowPolicy::DropNewest`] so they can never hold up the control
//! plane.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`BusTopic::ConnStatus`] | Transport connected / disconnected |
//! | [`BusTopic::PrepareShutdown`] | Operator or fatal condition asks to go offline |
//! | [`BusTopic::Shutdown`] | Every worker must stop |
//! | [`BusTopic::AppLog`] | Local diagnostics |
//! | [`BusTopic::RadioLog`] | Device log lines bound for the network |
//!
//! Subscriptions must be established before workers start publishing; a
//! subscriber never sees events published before it subscribed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rigbridge_types::{Event, EventPayload, RigError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Default per-subscriber queue capacity.
pub const DEFAULT_CAPACITY: usize = 100;

/// Routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusTopic {
    ConnStatus,
    PrepareShutdown,
    Shutdown,
    AppLog,
    RadioLog,
}

impl From<&EventPayload> for BusTopic {
    fn from(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::ConnStatus(_) => BusTopic::ConnStatus,
            EventPayload::PrepareShutdown => BusTopic::PrepareShutdown,
            EventPayload::Shutdown => BusTopic::Shutdown,
            EventPayload::AppLog(_) => BusTopic::AppLog,
            EventPayload::RadioLog(_) => BusTopic::RadioLog,
        }
    }
}

/// What happens when a subscriber's queue is full at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Suspend the publisher until there is room.
    #[default]
    Block,
    /// Discard the incoming event.
    DropNewest,
    /// Evict the oldest queued event to make room.
    DropOldest,
}

#[derive(Clone)]
enum SubscriberQueue {
    Blocking(mpsc::Sender<Event>),
    DropNewest(mpsc::Sender<Event>),
    // A single-receiver broadcast ring overwrites its oldest slot when full.
    DropOldest(broadcast::Sender<Event>),
}

enum Delivery {
    Delivered,
    Dropped,
    Closed,
}

impl SubscriberQueue {
    async fn deliver(&self, event: Event) -> Delivery {
        match self {
            Self::Blocking(tx) => match tx.send(event).await {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Closed,
            },
            Self::DropNewest(tx) => match tx.try_send(event) {
                Ok(()) => Delivery::Delivered,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
            Self::DropOldest(tx) => match tx.send(event) {
                Ok(_) => Delivery::Delivered,
                Err(_) => Delivery::Closed,
            },
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Self::Blocking(tx) | Self::DropNewest(tx) => tx.is_closed(),
            Self::DropOldest(tx) => tx.receiver_count() == 0,
        }
    }
}

struct BusInner {
    capacity: usize,
    topics: Mutex<HashMap<BusTopic, Vec<SubscriberQueue>>>,
}

/// Shared event bus. Clone it cheaply – all clones share the same
/// subscriber registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new bus whose subscriber queues each hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to `topic` with blocking backpressure.
    pub fn subscribe(&self, topic: BusTopic) -> BusReceiver {
        self.subscribe_with(topic, OverflowPolicy::Block)
    }

    /// Subscribe to `topic` with an explicit overflow policy.
    pub fn subscribe_with(&self, topic: BusTopic, policy: OverflowPolicy) -> BusReceiver {
        let capacity = self.inner.capacity;
        let (queue, receiver) = match policy {
            OverflowPolicy::Block => {
                let (tx, rx) = mpsc::channel(capacity);
                (SubscriberQueue::Blocking(tx), ReceiverQueue::Bounded(rx))
            }
            OverflowPolicy::DropNewest => {
                let (tx, rx) = mpsc::channel(capacity);
                (SubscriberQueue::DropNewest(tx), ReceiverQueue::Bounded(rx))
            }
            OverflowPolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(capacity);
                (SubscriberQueue::DropOldest(tx), ReceiverQueue::Ring(rx))
            }
        };

        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push(queue);

        BusReceiver {
            topic,
            receiver,
        }
    }

    /// Publish `event` to every subscriber of `topic`.
    ///
    /// **May block** while any [`OverflowPolicy::Block`] subscriber queue is
    /// full.  Returns the number of subscribers the event was handed to;
    /// `Ok(0)` when nobody listens is a normal condition.  Subscribers whose
    /// receiver has been dropped are pruned.
    pub async fn publish(&self, topic: BusTopic, event: Event) -> Result<usize, RigError> {
        let queues = {
            let mut topics = self
                .inner
                .topics
                .lock()
                .map_err(|e| RigError::Channel(format!("event bus registry poisoned: {e}")))?;
            match topics.get_mut(&topic) {
                Some(queues) => {
                    queues.retain(|q| !q.is_closed());
                    queues.clone()
                }
                None => Vec::new(),
            }
        };

        let mut reached = 0;
        for queue in queues {
            match queue.deliver(event.clone()).await {
                Delivery::Delivered => reached += 1,
                Delivery::Dropped => {
                    debug!(topic = ?topic, event_id = %event.id, "subscriber queue full; event dropped");
                }
                Delivery::Closed => {}
            }
        }
        Ok(reached)
    }

    /// Wrap `payload` in a fresh [`Event`] and publish it on its natural
    /// topic.  Blocks like [`EventBus::publish`].
    pub async fn emit(
        &self,
        source: impl Into<String>,
        payload: EventPayload,
    ) -> Result<usize, RigError> {
        let topic = BusTopic::from(&payload);
        self.publish(topic, Event::new(source, payload)).await
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: BusTopic) -> usize {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, |queues| queues.iter().filter(|q| !q.is_closed()).count())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

enum ReceiverQueue {
    Bounded(mpsc::Receiver<Event>),
    Ring(broadcast::Receiver<Event>),
}

/// The receiving end of one bus subscription.
pub struct BusReceiver {
    topic: BusTopic,
    receiver: ReceiverQueue,
}

impl BusReceiver {
    /// Wait for the next event on this subscription.
    ///
    /// Returns `None` once every [`EventBus`] clone has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        match &mut self.receiver {
            ReceiverQueue::Bounded(rx) => rx.recv().await,
            ReceiverQueue::Ring(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = ?self.topic, lagged_by = n, "bus subscriber lagged; oldest events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        match &mut self.receiver {
            ReceiverQueue::Bounded(rx) => rx.try_recv().ok(),
            ReceiverQueue::Ring(rx) => loop {
                match rx.try_recv() {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!(topic = ?self.topic, lagged_by = n, "bus subscriber lagged; oldest events dropped");
                    }
                    Err(_) => return None,
                }
            },
        }
    }

    /// The [`BusTopic`] this receiver is bound to.
    pub fn topic(&self) -> BusTopic {
        self.topic
    }
}
