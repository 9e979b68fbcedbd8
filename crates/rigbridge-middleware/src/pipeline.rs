//! Bounded message pipeline between the transport and the workers.
//!
//! One outbound queue carries [`Envelope`]s from every producer to the
//! transport client.  Three inbound queues partition raw requests by
//! [`RequestClass`] so a burst on one class cannot starve the others.
//!
//! Enqueueing on a full queue waits for space; nothing is ever dropped.
//! Dequeueing is FIFO per queue.  No ordering is promised between different
//! producers racing on the outbound queue.
//!
//! A transport must not wait on an inbound queue from its network loop:
//! one saturated class would stall the other two classes and the outbound
//! side with it.  [`InboundRouter::dispatcher`] gives the transport an
//! [`InboundDispatcher`] whose per-class forwarders do the waiting instead.

use std::sync::Arc;

use rigbridge_types::{Envelope, RigError, TopicSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default outbound queue capacity.
pub const OUTBOUND_CAPACITY: usize = 20;
/// Default capacity of each inbound queue.
pub const INBOUND_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCapacity {
    pub outbound: usize,
    pub inbound: usize,
}

impl Default for PipelineCapacity {
    fn default() -> Self {
        Self {
            outbound: OUTBOUND_CAPACITY,
            inbound: INBOUND_CAPACITY,
        }
    }
}

/// Inbound request classes, one queue each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    SetState,
    Ping,
    CapsReq,
}

impl RequestClass {
    /// Classify an inbound `topic`; `None` when it is not one of ours.
    pub fn classify(topics: &TopicSet, topic: &str) -> Option<Self> {
        if topic == topics.set_state {
            Some(Self::SetState)
        } else if topic == topics.ping {
            Some(Self::Ping)
        } else if topic == topics.caps_req {
            Some(Self::CapsReq)
        } else {
            None
        }
    }
}

/// Cloneable producer handle onto the outbound queue.
#[derive(Clone, Debug)]
pub struct OutboundSender {
    tx: mpsc::Sender<Envelope>,
}

impl OutboundSender {
    /// Enqueue `envelope`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`RigError::Channel`] once the transport has dropped the
    /// receiving end.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<(), RigError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|e| RigError::Channel(format!("outbound queue closed, lost {}", e.0.topic)))
    }
}

/// The transport's handle for depositing classified inbound frames.
#[derive(Clone, Debug)]
pub struct InboundRouter {
    topics: Arc<TopicSet>,
    set_state: mpsc::Sender<Vec<u8>>,
    ping: mpsc::Sender<Vec<u8>>,
    caps_req: mpsc::Sender<Vec<u8>>,
}

impl InboundRouter {
    /// Classify `topic` and enqueue `payload` on the matching inbound queue,
    /// waiting while that queue is full.
    ///
    /// # Errors
    ///
    /// * [`RigError::UnroutableTopic`] – `topic` is not an inbound topic;
    ///   nothing is enqueued.
    /// * [`RigError::Channel`] – the consuming worker has gone away.
    pub async fn route(&self, topic: &str, payload: Vec<u8>) -> Result<RequestClass, RigError> {
        let class = RequestClass::classify(&self.topics, topic)
            .ok_or_else(|| RigError::UnroutableTopic(topic.to_string()))?;
        let queue = match class {
            RequestClass::SetState => &self.set_state,
            RequestClass::Ping => &self.ping,
            RequestClass::CapsReq => &self.caps_req,
        };
        queue
            .send(payload)
            .await
            .map_err(|_| RigError::Channel(format!("{class:?} queue closed")))?;
        Ok(class)
    }

    /// Spawn one forwarder per request class and return the non-blocking
    /// front end feeding them.  Must be called inside a tokio runtime.
    pub fn dispatcher(&self) -> InboundDispatcher {
        let (set_state, a) = forwarder(RequestClass::SetState, self.set_state.clone());
        let (ping, b) = forwarder(RequestClass::Ping, self.ping.clone());
        let (caps_req, c) = forwarder(RequestClass::CapsReq, self.caps_req.clone());
        InboundDispatcher {
            topics: Arc::clone(&self.topics),
            set_state,
            ping,
            caps_req,
            forwarders: [a, b, c],
        }
    }
}

fn forwarder(
    class: RequestClass,
    queue: mpsc::Sender<Vec<u8>>,
) -> (mpsc::UnboundedSender<Vec<u8>>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if queue.send(payload).await.is_err() {
                warn!(?class, "inbound queue closed; forwarder stopped");
                return;
            }
        }
        debug!(?class, "forwarder drained");
    });
    (tx, task)
}

/// Routes inbound frames without ever waiting on a consumer.
///
/// Each request class has its own unbounded hand-off to a forwarder task,
/// and the forwarder waits on the bounded queue.  Frames of one class stay
/// FIFO; a stalled consumer only backs up its own class.  Dropping the
/// dispatcher stops the forwarders and discards frames still in hand-off.
#[derive(Debug)]
pub struct InboundDispatcher {
    topics: Arc<TopicSet>,
    set_state: mpsc::UnboundedSender<Vec<u8>>,
    ping: mpsc::UnboundedSender<Vec<u8>>,
    caps_req: mpsc::UnboundedSender<Vec<u8>>,
    forwarders: [JoinHandle<()>; 3],
}

impl InboundDispatcher {
    /// Classify `topic` and hand `payload` to its class forwarder.
    ///
    /// # Errors
    ///
    /// * [`RigError::UnroutableTopic`] – `topic` is not an inbound topic.
    /// * [`RigError::Channel`] – the class forwarder has stopped because
    ///   its consumer went away.
    pub fn dispatch(&self, topic: &str, payload: Vec<u8>) -> Result<RequestClass, RigError> {
        let class = RequestClass::classify(&self.topics, topic)
            .ok_or_else(|| RigError::UnroutableTopic(topic.to_string()))?;
        let lane = match class {
            RequestClass::SetState => &self.set_state,
            RequestClass::Ping => &self.ping,
            RequestClass::CapsReq => &self.caps_req,
        };
        lane.send(payload)
            .map_err(|_| RigError::Channel(format!("{class:?} forwarder stopped")))?;
        Ok(class)
    }
}

impl Drop for InboundDispatcher {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
    }
}

/// Consumer ends of the three inbound queues.
pub struct InboundQueues {
    pub set_state: mpsc::Receiver<Vec<u8>>,
    pub ping: mpsc::Receiver<Vec<u8>>,
    pub caps_req: mpsc::Receiver<Vec<u8>>,
}

/// All four queues, split into the handles each side needs.
pub struct Pipeline {
    pub outbound_tx: OutboundSender,
    pub outbound_rx: mpsc::Receiver<Envelope>,
    pub router: InboundRouter,
    pub inbound: InboundQueues,
}

impl Pipeline {
    pub fn new(topics: TopicSet, capacity: PipelineCapacity) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.outbound.max(1));
        let inbound = capacity.inbound.max(1);
        let (set_state_tx, set_state_rx) = mpsc::channel(inbound);
        let (ping_tx, ping_rx) = mpsc::channel(inbound);
        let (caps_req_tx, caps_req_rx) = mpsc::channel(inbound);

        Self {
            outbound_tx: OutboundSender { tx: outbound_tx },
            outbound_rx,
            router: InboundRouter {
                topics: Arc::new(topics),
                set_state: set_state_tx,
                ping: ping_tx,
                caps_req: caps_req_tx,
            },
            inbound: InboundQueues {
                set_state: set_state_rx,
                ping: ping_rx,
                caps_req: caps_req_rx,
            },
        }
    }
}
