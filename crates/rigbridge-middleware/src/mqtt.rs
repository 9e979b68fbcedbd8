//! [`MqttTransport`] – a [`TransportClient`] that talks MQTT 3.1.1 to a
//! real broker through `rumqttc`.
//!
//! The network event loop runs on its own task.  It subscribes to the
//! inbound topics on every (re)connect, reports connection changes on the
//! bus and hands inbound publishes to an [`InboundDispatcher`].  The
//! transport task only moves outbound envelopes and watches for shutdown,
//! so neither side can stall the other.
//!
//! [`InboundDispatcher`]: crate::pipeline::InboundDispatcher

use std::time::Duration;

use async_trait::async_trait;
use rigbridge_types::{ConnectionState, Envelope, EventPayload, RigError};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::pipeline::InboundDispatcher;
use crate::transport::{TransportClient, TransportLink, TransportSettings};

const SOURCE: &str = "rigbridge-middleware::mqtt";

/// Pending requests between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;
/// How long a clean disconnect may take before the event loop is dropped.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

pub struct MqttTransport {
    keep_alive: Duration,
    reconnect_delay: Duration,
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Host part of a broker URL; `tcp://` and `mqtt://` prefixes are accepted.
pub fn broker_host(url: &str) -> &str {
    let host = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url);
    host.trim_end_matches('/')
}

pub fn qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Connection options for `settings`: credentials when a username is set,
/// and the Last-Will when one is given.
///
/// # Errors
///
/// [`RigError::Config`] when the broker URL has no host.
pub fn mqtt_options(
    settings: &TransportSettings,
    keep_alive: Duration,
) -> Result<MqttOptions, RigError> {
    let host = broker_host(&settings.broker_url);
    if host.is_empty() {
        return Err(RigError::Config("broker url has no host".to_string()));
    }
    let mut options = MqttOptions::new(settings.client_id.clone(), host, settings.broker_port);
    options.set_keep_alive(keep_alive);
    options.set_clean_session(true);
    if !settings.username.is_empty() {
        options.set_credentials(settings.username.clone(), settings.password.clone());
    }
    if let Some(will) = &settings.last_will {
        options.set_last_will(rumqttc::LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            qos(will.qos),
            will.retain,
        ));
    }
    Ok(options)
}

fn publish(client: &AsyncClient, envelope: Envelope) {
    let Envelope {
        topic,
        payload,
        retain,
    } = envelope;
    if let Err(e) = client.try_publish(topic.clone(), QoS::AtMostOnce, retain, payload) {
        warn!(topic = %topic, error = %e, "outbound message dropped");
    }
}

#[async_trait]
impl TransportClient for MqttTransport {
    async fn run(
        &mut self,
        settings: TransportSettings,
        mut link: TransportLink,
    ) -> Result<(), RigError> {
        let options = mqtt_options(&settings, self.keep_alive)?;
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        info!(
            client_id = %settings.client_id,
            broker = %format!("{}:{}", settings.broker_url, settings.broker_port),
            "connecting to broker"
        );

        let mut network = tokio::spawn(drive(
            eventloop,
            client.clone(),
            settings.topics.clone(),
            link.router.dispatcher(),
            link.bus.clone(),
            self.reconnect_delay,
        ));

        loop {
            tokio::select! {
                _ = link.shutdown.recv() => break,
                envelope = link.outbound.recv() => match envelope {
                    Some(envelope) => publish(&client, envelope),
                    None => break,
                },
                stopped = &mut network => {
                    return Err(RigError::Transport(format!("mqtt event loop ended: {stopped:?}")));
                }
            }
        }

        while let Ok(envelope) = link.outbound.try_recv() {
            publish(&client, envelope);
        }
        if let Err(e) = client.try_disconnect() {
            warn!(error = %e, "disconnect not queued");
        }
        if tokio::time::timeout(DISCONNECT_GRACE, &mut network).await.is_err() {
            warn!("broker did not acknowledge disconnect in time");
            network.abort();
        }
        info!(client_id = %settings.client_id, "transport stopped");
        Ok(())
    }
}

/// Poll the network until the client's own disconnect goes out.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    dispatcher: InboundDispatcher,
    bus: EventBus,
    reconnect_delay: Duration,
) {
    let mut connected = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) if ack.code == ConnectReturnCode::Success => {
                for topic in &topics {
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                        warn!(topic = %topic, error = %e, "subscribe not queued");
                    }
                }
                connected = true;
                info!("connected to broker");
                if let Err(e) = bus
                    .emit(SOURCE, EventPayload::ConnStatus(ConnectionState::Connected))
                    .await
                {
                    warn!(error = %e, "connection status not reported");
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Publish(frame))) => {
                if let Err(e) = dispatcher.dispatch(&frame.topic, frame.payload.to_vec()) {
                    warn!(topic = %frame.topic, error = %e, "inbound frame not routed");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "broker connection failed; retrying");
                if connected {
                    connected = false;
                    if let Err(e) = bus
                        .emit(SOURCE, EventPayload::ConnStatus(ConnectionState::Disconnected))
                        .await
                    {
                        warn!(error = %e, "connection status not reported");
                        return;
                    }
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusTopic;
    use crate::pipeline::{Pipeline, PipelineCapacity};
    use crate::transport::LastWill;
    use rigbridge_types::TopicSet;

    fn settings() -> TransportSettings {
        TransportSettings {
            broker_url: "tcp://broker.local/".to_string(),
            broker_port: 1884,
            client_id: "rigbridge-svr-ab12".to_string(),
            username: String::new(),
            password: String::new(),
            topics: Vec::new(),
            last_will: None,
        }
    }

    #[test]
    fn broker_host_strips_scheme() {
        assert_eq!(broker_host("tcp://broker.local"), "broker.local");
        assert_eq!(broker_host("mqtt://10.0.0.2/"), "10.0.0.2");
        assert_eq!(broker_host("test.mosquitto.org"), "test.mosquitto.org");
    }

    #[test]
    fn qos_levels() {
        assert_eq!(qos(0), QoS::AtMostOnce);
        assert_eq!(qos(1), QoS::AtLeastOnce);
        assert_eq!(qos(2), QoS::ExactlyOnce);
    }

    #[test]
    fn options_carry_identity_credentials_and_will() {
        let mut s = settings();
        s.username = "op".to_string();
        s.password = "secret".to_string();
        s.last_will = Some(LastWill {
            topic: "s/radios/r/cat/status".to_string(),
            payload: br#"{"online":false}"#.to_vec(),
            qos: 0,
            retain: true,
        });

        let options = mqtt_options(&s, Duration::from_secs(30)).unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "rigbridge-svr-ab12");
        assert_eq!(
            options.credentials(),
            Some(("op".to_string(), "secret".to_string()))
        );
        let will = options.last_will().expect("last will registered");
        assert_eq!(will.topic, "s/radios/r/cat/status");
        assert!(will.retain);
    }

    #[test]
    fn anonymous_options_have_no_credentials() {
        let options = mqtt_options(&settings(), Duration::from_secs(30)).unwrap();
        assert_eq!(options.credentials(), None);
        assert!(options.last_will().is_none());
    }

    #[test]
    fn empty_host_is_rejected() {
        let mut s = settings();
        s.broker_url = "tcp://".to_string();
        assert!(matches!(
            mqtt_options(&s, Duration::from_secs(30)),
            Err(RigError::Config(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_broker_still_stops_on_shutdown() {
        let topics = TopicSet::new("s", "r");
        let bus = EventBus::default();
        let mut conn = bus.subscribe(BusTopic::ConnStatus);
        let pipeline = Pipeline::new(topics.clone(), PipelineCapacity::default());
        let outbound = pipeline.outbound_tx.clone();

        let link = TransportLink {
            router: pipeline.router.clone(),
            outbound: pipeline.outbound_rx,
            bus: bus.clone(),
            shutdown: bus.subscribe(BusTopic::Shutdown),
        };
        let mut s = settings();
        s.broker_url = "127.0.0.1".to_string();
        s.broker_port = 1;
        s.topics = topics.subscriptions();
        let mut transport = MqttTransport::new().with_reconnect_delay(Duration::from_millis(20));
        let worker = tokio::spawn(async move { transport.run(s, link).await });

        // Outbound traffic keeps draining while the broker is away.
        for i in 0..(REQUEST_CAPACITY + 10) {
            outbound
                .enqueue(Envelope::new("s/radios/r/cat/state", vec![i as u8]))
                .await
                .unwrap();
        }

        bus.emit("test", EventPayload::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("transport did not stop")
            .unwrap()
            .unwrap();
        assert!(conn.try_recv().is_none(), "never connected");
    }
}
