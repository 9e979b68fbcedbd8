//! [`Bridge`] – wires the bus, the pipeline and the four workers together
//! and hands control to the [`Orchestrator`].
//!
//! # Startup order
//!
//! 1. Bus, pipeline and worker group are created.
//! 2. The orchestrator and every worker subscribe to the bus.
//! 3. The system-event watcher, the transport and the heartbeat responder
//!    are spawned.
//! 4. After [`BridgeConfig::device_start_delay`] the device server is
//!    spawned, so the transport (and its Last-Will) is up before state
//!    starts flowing.  This is a soft ordering, not a barrier.
//! 5. The orchestrator runs on the calling task until the bridge
//!    terminates.
//!
//! Each worker is registered in the [`WorkerGroup`] by its spawning wrapper,
//! which holds the guard until the worker returns or panics.

use std::future::Future;
use std::time::Duration;

use rigbridge_hal::{RadioLink, RadioServer};
use rigbridge_kernel::{
    ExitOutcome, PingResponder, ShutdownTimings, WorkerGroup, watch_system_events,
};
use rigbridge_middleware::{
    BusTopic, EventBus, Pipeline, PipelineCapacity, TransportClient, TransportLink,
    TransportSettings, bus::DEFAULT_CAPACITY,
};
use rigbridge_types::{EventPayload, RigError, TopicSet};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::orchestrator::Orchestrator;
use crate::status::{ServerStatus, create_last_will};

/// Worker names as they appear in the worker group.
pub const EVENTS_WORKER: &str = "events";
pub const TRANSPORT_WORKER: &str = "transport";
pub const HEARTBEAT_WORKER: &str = "heartbeat";
pub const RADIO_WORKER: &str = "radio";

/// Everything needed to start a bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub topics: TopicSet,
    /// Broker connection.  `topics` and `last_will` are filled in by
    /// [`Bridge::launch`].
    pub transport: TransportSettings,
    pub pipeline: PipelineCapacity,
    /// Per-subscriber queue capacity on the event bus.
    pub bus_capacity: usize,
    pub timings: ShutdownTimings,
    pub device_start_delay: Duration,
}

impl BridgeConfig {
    pub fn new(topics: TopicSet, transport: TransportSettings) -> Self {
        Self {
            topics,
            transport,
            pipeline: PipelineCapacity::default(),
            bus_capacity: DEFAULT_CAPACITY,
            timings: ShutdownTimings::default(),
            device_start_delay: Duration::from_millis(500),
        }
    }
}

pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Run the bridge until it terminates.
    ///
    /// `stop` is the external stop request (Ctrl-C in the binary); when it
    /// completes the bridge goes through `PrepareShutdown`.  A transport or
    /// device failure has the same effect.
    ///
    /// # Errors
    ///
    /// [`RigError::Encoding`] if the Last-Will cannot be built.  Once the
    /// workers are running every failure is handled inside the bridge and
    /// the result is an [`ExitOutcome`].
    pub async fn launch<F>(
        self,
        mut transport: Box<dyn TransportClient>,
        mut radio: Box<dyn RadioServer>,
        stop: F,
    ) -> Result<ExitOutcome, RigError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let BridgeConfig {
            topics,
            transport: mut settings,
            pipeline: capacity,
            bus_capacity,
            timings,
            device_start_delay,
        } = self.config;
        settings.topics = topics.subscriptions();
        settings.last_will = Some(create_last_will(&topics)?);

        let bus = EventBus::new(bus_capacity);
        let pipeline = Pipeline::new(topics.clone(), capacity);
        let workers = WorkerGroup::new();

        // Subscribe everyone before anything can publish.
        let status = ServerStatus::new(&topics, pipeline.outbound_tx.clone());
        let orchestrator = Orchestrator::new(&bus, status, workers.clone(), timings);
        let watcher_shutdown = bus.subscribe(BusTopic::Shutdown);
        let transport_shutdown = bus.subscribe(BusTopic::Shutdown);
        let heartbeat_shutdown = bus.subscribe(BusTopic::Shutdown);
        let radio_shutdown = bus.subscribe(BusTopic::Shutdown);

        spawn_worker(
            &workers,
            EVENTS_WORKER,
            watch_system_events(bus.clone(), watcher_shutdown, stop),
        );

        let link = TransportLink {
            router: pipeline.router,
            outbound: pipeline.outbound_rx,
            bus: bus.clone(),
            shutdown: transport_shutdown,
        };
        let transport_bus = bus.clone();
        spawn_worker(&workers, TRANSPORT_WORKER, async move {
            if let Err(e) = transport.run(settings, link).await {
                error!(error = %e, "transport failed");
                request_shutdown(&transport_bus, TRANSPORT_WORKER).await;
            }
        });

        spawn_worker(
            &workers,
            HEARTBEAT_WORKER,
            PingResponder::new(topics.pong.clone()).run(
                pipeline.inbound.ping,
                pipeline.outbound_tx.clone(),
                heartbeat_shutdown,
            ),
        );

        tokio::time::sleep(device_start_delay).await;

        let link = RadioLink {
            set_state: pipeline.inbound.set_state,
            caps_req: pipeline.inbound.caps_req,
            outbound: pipeline.outbound_tx,
            bus: bus.clone(),
            shutdown: radio_shutdown,
            state_topic: topics.state.clone(),
            caps_topic: topics.caps.clone(),
        };
        let radio_bus = bus.clone();
        spawn_worker(&workers, RADIO_WORKER, async move {
            if let Err(e) = radio.run(link).await {
                error!(radio = %radio.id(), error = %e, "radio server failed");
                request_shutdown(&radio_bus, RADIO_WORKER).await;
            }
        });

        info!(base = %topics.base, workers = workers.len(), "bridge started");
        Ok(orchestrator.run().await)
    }
}

fn spawn_worker<F>(workers: &WorkerGroup, name: &str, worker: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let guard = workers.register(name);
    tokio::spawn(async move {
        let _guard = guard;
        worker.await;
    })
}

async fn request_shutdown(bus: &EventBus, source: &str) {
    if let Err(e) = bus.emit(source, EventPayload::PrepareShutdown).await {
        error!(error = %e, "could not request shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rigbridge_hal::{RadioSettings, SerialSettings, SimRadio};
    use rigbridge_middleware::{LoopbackBroker, LoopbackTransport};
    use rigbridge_types::{Envelope, Marshal, PingMsg, StateMsg, StatusMsg, Unmarshal};
    use tokio::sync::{mpsc, oneshot};

    fn config() -> BridgeConfig {
        let topics = TopicSet::new("mystation", "myradio");
        let settings = TransportSettings {
            broker_url: "loopback".to_string(),
            broker_port: 1883,
            client_id: "rigbridge-test".to_string(),
            username: String::new(),
            password: String::new(),
            topics: Vec::new(),
            last_will: None,
        };
        let mut config = BridgeConfig::new(topics, settings);
        config.device_start_delay = Duration::from_millis(20);
        config
    }

    async fn next_on(rx: &mut mpsc::UnboundedReceiver<Envelope>, topic: &str) -> Envelope {
        loop {
            let env = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for envelope")
                .expect("observer closed");
            if env.topic == topic {
                return env;
            }
        }
    }

    #[tokio::test]
    async fn end_to_end_over_loopback() {
        let broker = LoopbackBroker::new();
        let mut observer = broker.connect_observer("observer", &["mystation/radios/myradio/cat/#"]);
        let config = config();
        let topics = config.topics.clone();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let bridge = tokio::spawn(Bridge::new(config).launch(
            Box::new(LoopbackTransport::new(broker.clone())),
            Box::new(SimRadio::new(RadioSettings::default())),
            async move {
                let _ = stop_rx.await;
            },
        ));

        let online = next_on(&mut observer, &topics.status).await;
        assert!(online.retain);
        assert!(StatusMsg::unmarshal(&online.payload).unwrap().online);

        let state = next_on(&mut observer, &topics.state).await;
        assert!(matches!(
            StateMsg::unmarshal(&state.payload).unwrap(),
            StateMsg::Full(_) | StateMsg::Meters(_)
        ));

        let ping = PingMsg { timestamp: 99 }.marshal().unwrap();
        broker.publish(&Envelope::new(topics.ping.clone(), ping));
        let pong = next_on(&mut observer, &topics.pong).await;
        assert_eq!(PingMsg::unmarshal(&pong.payload).unwrap().timestamp, 99);

        stop_tx.send(()).unwrap();
        let offline = next_on(&mut observer, &topics.status).await;
        assert!(!StatusMsg::unmarshal(&offline.payload).unwrap().online);

        let outcome = tokio::time::timeout(Duration::from_secs(3), bridge)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExitOutcome::Clean);
        assert!(!broker.is_connected("rigbridge-test"));
        assert_eq!(
            broker.retained(&topics.status),
            Some(StatusMsg { online: false }.marshal().unwrap())
        );
    }

    #[tokio::test]
    async fn last_will_registered_with_transport() {
        let broker = LoopbackBroker::new();
        let config = config();
        let topics = config.topics.clone();
        let mut observer = broker.connect_observer("observer", &[topics.status.as_str()]);

        let bridge = tokio::spawn(Bridge::new(config).launch(
            Box::new(LoopbackTransport::new(broker.clone())),
            Box::new(SimRadio::new(RadioSettings::default())),
            std::future::pending::<()>(),
        ));

        let online = next_on(&mut observer, &topics.status).await;
        assert!(StatusMsg::unmarshal(&online.payload).unwrap().online);

        // Simulate the network cutting the bridge off.
        assert!(broker.drop_connection("rigbridge-test"));
        let will = next_on(&mut observer, &topics.status).await;
        assert!(will.retain);
        assert!(!StatusMsg::unmarshal(&will.payload).unwrap().online);

        bridge.abort();
    }

    #[tokio::test]
    async fn transport_failure_shuts_the_bridge_down() {
        let broker = LoopbackBroker::with_credentials("op", "secret");
        let bridge = Bridge::new(config()).launch(
            Box::new(LoopbackTransport::new(broker)),
            Box::new(SimRadio::new(RadioSettings::default())),
            std::future::pending::<()>(),
        );
        let outcome = tokio::time::timeout(Duration::from_secs(3), bridge)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExitOutcome::Clean);
    }

    #[tokio::test]
    async fn device_failure_shuts_the_bridge_down() {
        let radio = SimRadio::new(RadioSettings {
            serial: SerialSettings {
                portname: String::new(),
                ..SerialSettings::default()
            },
            ..RadioSettings::default()
        });
        let bridge = Bridge::new(config()).launch(
            Box::new(LoopbackTransport::new(LoopbackBroker::new())),
            Box::new(radio),
            std::future::pending::<()>(),
        );
        let outcome = tokio::time::timeout(Duration::from_secs(3), bridge)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExitOutcome::Clean);
    }

    struct StuckRadio;

    #[async_trait]
    impl RadioServer for StuckRadio {
        fn id(&self) -> &str {
            "stuck"
        }

        async fn run(&mut self, _link: RadioLink) -> Result<(), RigError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn ping_answered_while_device_ignores_set_state() {
        let broker = LoopbackBroker::new();
        let config = config();
        let topics = config.topics.clone();
        let mut observer = broker.connect_observer("observer", &[topics.pong.as_str()]);

        let bridge = tokio::spawn(Bridge::new(config).launch(
            Box::new(LoopbackTransport::new(broker.clone())),
            Box::new(StuckRadio),
            std::future::pending::<()>(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        for _ in 0..12 {
            broker.publish(&Envelope::new(topics.set_state.clone(), b"{}".to_vec()));
        }
        let ping = PingMsg { timestamp: 5 }.marshal().unwrap();
        broker.publish(&Envelope::new(topics.ping.clone(), ping));

        let pong = next_on(&mut observer, &topics.pong).await;
        assert_eq!(PingMsg::unmarshal(&pong.payload).unwrap().timestamp, 5);

        bridge.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_device_forces_exit() {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let bridge = tokio::spawn(Bridge::new(config()).launch(
            Box::new(LoopbackTransport::new(LoopbackBroker::new())),
            Box::new(StuckRadio),
            async move {
                let _ = stop_rx.await;
            },
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();

        let outcome = bridge.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            ExitOutcome::Forced {
                outstanding: vec![RADIO_WORKER.to_string()]
            }
        );
    }
}
