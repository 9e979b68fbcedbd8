//! In-process broker and transport for running the bridge without a network.
//!
//! [`LoopbackBroker`] implements the slice of MQTT semantics the bridge
//! relies on (topic filters with `+`/`#`, retained messages, credentials,
//! and Last-Will on unclean disconnect).  [`LoopbackTransport`] is a
//! [`TransportClient`] that connects to it.  Together they let the full
//! stack run in headless tests and demos.
//!
//! # Example
//!
//! ```rust
//! use rigbridge_middleware::loopback::LoopbackBroker;
//! use rigbridge_types::Envelope;
//!
//! let broker = LoopbackBroker::new();
//! broker.publish(&Envelope::retained("s/radios/r/cat/status", b"{}".to_vec()));
//! assert!(broker.retained("s/radios/r/cat/status").is_some());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rigbridge_types::{ConnectionState, Envelope, EventPayload, RigError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::transport::{LastWill, TransportClient, TransportLink, TransportSettings};

const SOURCE: &str = "rigbridge-middleware::loopback";

struct Session {
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<Envelope>,
    will: Option<LastWill>,
}

#[derive(Default)]
struct BrokerState {
    credentials: Option<(String, String)>,
    retained: HashMap<String, Vec<u8>>,
    sessions: HashMap<String, Session>,
}

/// A shared in-memory message broker.  Clones share state.
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LoopbackBroker {
    /// A broker that accepts any client.
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that only accepts `username` / `password`.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        let broker = Self::default();
        broker.lock().credentials = Some((username.into(), password.into()));
        broker
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session for `settings.client_id`, register its Last-Will and
    /// subscribe it to `settings.topics`.  Retained messages matching those
    /// topics are delivered immediately.
    ///
    /// A second connect with the same client id takes over the session; the
    /// previous will is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`RigError::Transport`] when the broker requires credentials
    /// and they do not match.
    pub fn connect(
        &self,
        settings: &TransportSettings,
    ) -> Result<mpsc::UnboundedReceiver<Envelope>, RigError> {
        let mut state = self.lock();
        if let Some((user, pass)) = &state.credentials
            && (user != &settings.username || pass != &settings.password)
        {
            return Err(RigError::Transport(format!(
                "client {} not authorized",
                settings.client_id
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for (topic, payload) in &state.retained {
            if settings.topics.iter().any(|f| topic_matches(f, topic)) {
                let _ = tx.send(Envelope::retained(topic.clone(), payload.clone()));
            }
        }
        state.sessions.insert(
            settings.client_id.clone(),
            Session {
                filters: settings.topics.clone(),
                tx,
                will: settings.last_will.clone(),
            },
        );
        Ok(rx)
    }

    /// Connect a passive observer (no credentials, no will) listening on
    /// `filters`.
    pub fn connect_observer(
        &self,
        client_id: &str,
        filters: &[&str],
    ) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        for (topic, payload) in &state.retained {
            if filters.iter().any(|f| topic_matches(f, topic)) {
                let _ = tx.send(Envelope::retained(topic.clone(), payload.clone()));
            }
        }
        state.sessions.insert(
            client_id.to_string(),
            Session {
                filters: filters.iter().map(|f| f.to_string()).collect(),
                tx,
                will: None,
            },
        );
        rx
    }

    /// Publish `envelope` to every matching session.  A retained envelope
    /// replaces the topic's retained payload; an empty retained payload
    /// clears it.
    pub fn publish(&self, envelope: &Envelope) {
        let mut state = self.lock();
        Self::publish_locked(&mut state, envelope);
    }

    fn publish_locked(state: &mut BrokerState, envelope: &Envelope) {
        if envelope.retain {
            if envelope.payload.is_empty() {
                state.retained.remove(&envelope.topic);
            } else {
                state
                    .retained
                    .insert(envelope.topic.clone(), envelope.payload.clone());
            }
        }
        for session in state.sessions.values() {
            if session
                .filters
                .iter()
                .any(|f| topic_matches(f, &envelope.topic))
            {
                let _ = session.tx.send(envelope.clone());
            }
        }
    }

    /// Clean disconnect: the session's Last-Will is discarded.
    pub fn disconnect(&self, client_id: &str) {
        if self.lock().sessions.remove(client_id).is_some() {
            debug!(client_id, "client disconnected cleanly");
        }
    }

    /// Unclean disconnect: the session's Last-Will, if any, is published.
    /// Returns `false` when `client_id` had no session.
    pub fn drop_connection(&self, client_id: &str) -> bool {
        let mut state = self.lock();
        let Some(session) = state.sessions.remove(client_id) else {
            return false;
        };
        if let Some(will) = session.will {
            info!(client_id, topic = %will.topic, "publishing last will");
            let envelope = Envelope {
                topic: will.topic,
                payload: will.payload,
                retain: will.retain,
            };
            Self::publish_locked(&mut state, &envelope);
        }
        true
    }

    /// The retained payload for `topic`, if any.
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.lock().retained.get(topic).cloned()
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.lock().sessions.contains_key(client_id)
    }
}

/// MQTT-style topic filter match supporting `+` (one level) and `#`
/// (all remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// [`TransportClient`] backed by a [`LoopbackBroker`].
pub struct LoopbackTransport {
    broker: LoopbackBroker,
}

impl LoopbackTransport {
    pub fn new(broker: LoopbackBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl TransportClient for LoopbackTransport {
    async fn run(
        &mut self,
        settings: TransportSettings,
        mut link: TransportLink,
    ) -> Result<(), RigError> {
        let client_id = settings.client_id.clone();
        let mut inbound = self.broker.connect(&settings)?;
        info!(
            client_id = %client_id,
            broker = %format!("{}:{}", settings.broker_url, settings.broker_port),
            "connected to broker"
        );
        link.bus
            .emit(SOURCE, EventPayload::ConnStatus(ConnectionState::Connected))
            .await?;

        let dispatcher = link.router.dispatcher();
        let mut connected = true;
        loop {
            tokio::select! {
                _ = link.shutdown.recv() => break,
                envelope = link.outbound.recv() => match envelope {
                    Some(envelope) if connected => self.broker.publish(&envelope),
                    Some(envelope) => {
                        warn!(topic = %envelope.topic, "not connected; outbound message dropped");
                    }
                    None => break,
                },
                frame = inbound.recv(), if connected => match frame {
                    Some(frame) => {
                        if let Err(e) = dispatcher.dispatch(&frame.topic, frame.payload) {
                            warn!(topic = %frame.topic, error = %e, "inbound frame not routed");
                        }
                    }
                    None => {
                        connected = false;
                        warn!(client_id = %client_id, "connection to broker lost");
                        link.bus
                            .emit(SOURCE, EventPayload::ConnStatus(ConnectionState::Disconnected))
                            .await?;
                    }
                },
            }
        }

        // Producers may have enqueued their final messages just before the
        // shutdown signal.
        while let Ok(envelope) = link.outbound.try_recv() {
            if connected {
                self.broker.publish(&envelope);
            }
        }
        if connected {
            self.broker.disconnect(&client_id);
        }
        info!(client_id = %client_id, "transport stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusTopic, EventBus};
    use crate::pipeline::{Pipeline, PipelineCapacity};
    use rigbridge_types::TopicSet;
    use std::time::Duration;

    fn settings(client_id: &str, topics: Vec<String>) -> TransportSettings {
        TransportSettings {
            broker_url: "loopback".to_string(),
            broker_port: 1883,
            client_id: client_id.to_string(),
            username: String::new(),
            password: String::new(),
            topics,
            last_will: None,
        }
    }

    #[test]
    fn topic_filters() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(topic_matches("a/+/c", "a/x/c"));
        assert!(topic_matches("a/#", "a/b/c/d"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("a/+", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }

    #[test]
    fn retained_message_replays_to_new_subscriber() {
        let broker = LoopbackBroker::new();
        broker.publish(&Envelope::retained("s/status", b"on".to_vec()));

        let mut rx = broker.connect_observer("late", &["s/#"]);
        let env = rx.try_recv().expect("retained replay");
        assert_eq!(env.payload, b"on".to_vec());
        assert!(env.retain);
    }

    #[test]
    fn empty_retained_payload_clears_topic() {
        let broker = LoopbackBroker::new();
        broker.publish(&Envelope::retained("s/status", b"on".to_vec()));
        broker.publish(&Envelope::retained("s/status", Vec::new()));
        assert!(broker.retained("s/status").is_none());
    }

    #[test]
    fn last_will_published_only_on_unclean_drop() {
        let broker = LoopbackBroker::new();
        let mut with_will = settings("svr", vec![]);
        with_will.last_will = Some(LastWill {
            topic: "s/status".to_string(),
            payload: b"offline".to_vec(),
            qos: 0,
            retain: true,
        });

        broker.connect(&with_will).unwrap();
        broker.disconnect("svr");
        assert!(broker.retained("s/status").is_none(), "clean disconnect discards will");

        broker.connect(&with_will).unwrap();
        assert!(broker.drop_connection("svr"));
        assert_eq!(broker.retained("s/status"), Some(b"offline".to_vec()));
        assert!(!broker.is_connected("svr"));
    }

    #[test]
    fn wrong_credentials_are_rejected() {
        let broker = LoopbackBroker::with_credentials("op", "secret");
        let mut s = settings("svr", vec![]);
        assert!(matches!(broker.connect(&s), Err(RigError::Transport(_))));
        s.username = "op".to_string();
        s.password = "secret".to_string();
        assert!(broker.connect(&s).is_ok());
    }

    #[test]
    fn settings_debug_redacts_password() {
        let mut s = settings("svr", vec![]);
        s.password = "hunter2".to_string();
        let debug = format!("{s:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn transport_routes_inbound_and_forwards_outbound() {
        let broker = LoopbackBroker::new();
        let topics = TopicSet::new("s", "r");
        let bus = EventBus::default();
        let mut conn = bus.subscribe(BusTopic::ConnStatus);
        let shutdown = bus.subscribe(BusTopic::Shutdown);
        let mut pipeline = Pipeline::new(topics.clone(), PipelineCapacity::default());
        let mut observer = broker.connect_observer("observer", &["s/radios/r/cat/pong"]);

        let link = TransportLink {
            router: pipeline.router.clone(),
            outbound: pipeline.outbound_rx,
            bus: bus.clone(),
            shutdown,
        };
        let mut transport = LoopbackTransport::new(broker.clone());
        let worker = tokio::spawn(async move {
            transport
                .run(settings("svr", topics.subscriptions()), link)
                .await
        });

        let event = conn.recv().await.unwrap();
        assert_eq!(
            event.payload,
            EventPayload::ConnStatus(ConnectionState::Connected)
        );

        broker.publish(&Envelope::new("s/radios/r/cat/ping", b"p".to_vec()));
        let routed = tokio::time::timeout(Duration::from_secs(1), pipeline.inbound.ping.recv())
            .await
            .unwrap();
        assert_eq!(routed, Some(b"p".to_vec()));

        pipeline
            .outbound_tx
            .enqueue(Envelope::new("s/radios/r/cat/pong", b"p".to_vec()))
            .await
            .unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(1), observer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.payload, b"p".to_vec());

        bus.emit("test", EventPayload::Shutdown).await.unwrap();
        worker.await.unwrap().unwrap();
        assert!(!broker.is_connected("svr"));
    }

    #[tokio::test]
    async fn stalled_set_state_consumer_does_not_block_ping_or_outbound() {
        let broker = LoopbackBroker::new();
        let topics = TopicSet::new("s", "r");
        let bus = EventBus::default();
        let mut conn = bus.subscribe(BusTopic::ConnStatus);
        let shutdown = bus.subscribe(BusTopic::Shutdown);
        let mut pipeline = Pipeline::new(topics.clone(), PipelineCapacity::default());
        let mut observer = broker.connect_observer("observer", &["s/radios/r/cat/pong"]);

        let link = TransportLink {
            router: pipeline.router.clone(),
            outbound: pipeline.outbound_rx,
            bus: bus.clone(),
            shutdown,
        };
        let mut transport = LoopbackTransport::new(broker.clone());
        let subscriptions = topics.subscriptions();
        let worker =
            tokio::spawn(async move { transport.run(settings("svr", subscriptions), link).await });
        conn.recv().await.unwrap();

        // More set-state requests than the queue holds; nobody reads them.
        for i in 0..12u8 {
            broker.publish(&Envelope::new(topics.set_state.clone(), vec![i]));
        }
        broker.publish(&Envelope::new(topics.ping.clone(), b"p".to_vec()));

        let routed = tokio::time::timeout(Duration::from_secs(1), pipeline.inbound.ping.recv())
            .await
            .expect("ping starved behind set-state backlog");
        assert_eq!(routed, Some(b"p".to_vec()));

        pipeline
            .outbound_tx
            .enqueue(Envelope::new("s/radios/r/cat/pong", b"p".to_vec()))
            .await
            .unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(1), observer.recv())
            .await
            .expect("outbound starved behind set-state backlog")
            .unwrap();
        assert_eq!(delivered.payload, b"p".to_vec());

        bus.emit("test", EventPayload::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(pipeline.inbound.set_state.try_recv().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn dropped_connection_emits_disconnected() {
        let broker = LoopbackBroker::new();
        let topics = TopicSet::new("s", "r");
        let bus = EventBus::default();
        let mut conn = bus.subscribe(BusTopic::ConnStatus);
        let shutdown = bus.subscribe(BusTopic::Shutdown);
        let pipeline = Pipeline::new(topics.clone(), PipelineCapacity::default());

        let link = TransportLink {
            router: pipeline.router.clone(),
            outbound: pipeline.outbound_rx,
            bus: bus.clone(),
            shutdown,
        };
        let mut transport = LoopbackTransport::new(broker.clone());
        let worker = tokio::spawn(async move {
            transport
                .run(settings("svr", topics.subscriptions()), link)
                .await
        });

        assert_eq!(
            conn.recv().await.unwrap().payload,
            EventPayload::ConnStatus(ConnectionState::Connected)
        );
        broker.drop_connection("svr");
        assert_eq!(
            conn.recv().await.unwrap().payload,
            EventPayload::ConnStatus(ConnectionState::Disconnected)
        );

        bus.emit("test", EventPayload::Shutdown).await.unwrap();
        worker.await.unwrap().unwrap();
    }
}
