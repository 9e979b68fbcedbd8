//! Simulated transceiver for CI/CD testing without physical hardware.
//!
//! [`SimRadio`] implements [`RadioServer`] against an in-memory rig model:
//! state-change requests are validated against the advertised
//! [`RadioCaps`] and applied, meters drift on every polling tick, and the
//! full state is re-published on every sync tick.  This lets the complete
//! bridge run in headless tests and demos.
//!
//! # Example
//!
//! ```rust
//! use rigbridge_hal::sim::SimRadio;
//! use rigbridge_hal::RadioSettings;
//! use rigbridge_types::RadioStateUpdate;
//!
//! let mut radio = SimRadio::new(RadioSettings::default());
//! radio
//!     .apply(RadioStateUpdate {
//!         frequency_hz: Some(7_074_000),
//!         ..Default::default()
//!     })
//!     .expect("40m is in range");
//! assert_eq!(radio.state().frequency_hz, 7_074_000);
//! ```

use async_trait::async_trait;
use rigbridge_types::{
    Envelope, EventPayload, Marshal, Meters, RadioCaps, RadioState, RadioStateUpdate, RigError,
    StateMsg, Unmarshal,
};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::server::{
    DEBUG_LEVEL_ERROR, DEBUG_LEVEL_INFO, DEBUG_LEVEL_TRACE, RadioLink, RadioServer, RadioSettings,
};

const SOURCE: &str = "rigbridge-hal::sim";
const MODES: [&str; 6] = ["USB", "LSB", "CW", "AM", "FM", "RTTY"];
const MIN_FREQUENCY_HZ: u64 = 30_000;
const MAX_FREQUENCY_HZ: u64 = 74_800_000;

/// A simulated transceiver.
pub struct SimRadio {
    id: String,
    settings: RadioSettings,
    state: RadioState,
    ticks: u64,
}

impl SimRadio {
    pub fn new(settings: RadioSettings) -> Self {
        Self {
            id: "sim-radio".to_string(),
            settings,
            state: RadioState::default(),
            ticks: 0,
        }
    }

    pub fn state(&self) -> &RadioState {
        &self.state
    }

    pub fn caps(&self) -> RadioCaps {
        RadioCaps {
            rig_model: self.settings.serial.rig_model,
            model_name: "Simulated HF Transceiver".to_string(),
            modes: MODES.iter().map(|m| m.to_string()).collect(),
            min_frequency_hz: MIN_FREQUENCY_HZ,
            max_frequency_hz: MAX_FREQUENCY_HZ,
            has_ptt: true,
        }
    }

    /// Validate and apply a partial state update.  Nothing is applied when
    /// any field is out of range.
    ///
    /// # Errors
    ///
    /// Returns [`RigError::Device`] naming the rejected field.
    pub fn apply(&mut self, update: RadioStateUpdate) -> Result<(), RigError> {
        let reject = |details: String| RigError::Device {
            component: self.id.clone(),
            details,
        };
        if let Some(freq) = update.frequency_hz
            && !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&freq)
        {
            return Err(reject(format!("frequency {freq} Hz out of range")));
        }
        if let Some(mode) = &update.mode
            && !MODES.contains(&mode.as_str())
        {
            return Err(reject(format!("unsupported mode {mode}")));
        }
        if let Some(power) = update.rf_power
            && !(0.0..=1.0).contains(&power)
        {
            return Err(reject(format!("rf power {power} out of range")));
        }

        if let Some(freq) = update.frequency_hz {
            self.state.frequency_hz = freq;
        }
        if let Some(mode) = update.mode {
            self.state.mode = mode;
        }
        if let Some(passband) = update.passband_hz {
            self.state.passband_hz = passband;
        }
        if let Some(ptt) = update.ptt {
            self.state.ptt = ptt;
        }
        if let Some(power) = update.rf_power {
            self.state.rf_power = power;
        }
        Ok(())
    }

    fn sample_meters(&mut self) -> Meters {
        self.ticks += 1;
        Meters {
            strength_db: -30 + (self.ticks % 16) as i32 * 2,
            swr: if self.state.ptt { 1.3 } else { 1.0 },
        }
    }

    async fn log(&self, link: &RadioLink, level: u8, line: String) {
        debug!(radio = %self.id, "{line}");
        if level <= self.settings.debug_level
            && let Err(e) = link.bus.emit(SOURCE, EventPayload::RadioLog(line)).await
        {
            debug!(error = %e, "radio log not forwarded");
        }
    }

    async fn publish_state(&self, link: &RadioLink) -> Result<(), RigError> {
        let payload = StateMsg::Full(self.state.clone()).marshal()?;
        link.outbound
            .enqueue(Envelope::new(link.state_topic.clone(), payload))
            .await
    }

    async fn publish_caps(&self, link: &RadioLink) -> Result<(), RigError> {
        let payload = self.caps().marshal()?;
        link.outbound
            .enqueue(Envelope::new(link.caps_topic.clone(), payload))
            .await
    }

    async fn handle_set_state(&mut self, link: &RadioLink, raw: &[u8]) -> Result<(), RigError> {
        let update = match RadioStateUpdate::unmarshal(raw) {
            Ok(update) => update,
            Err(e) => {
                self.log(link, DEBUG_LEVEL_ERROR, format!("malformed set-state request: {e}"))
                    .await;
                return Ok(());
            }
        };
        if let Err(e) = self.apply(update) {
            self.log(link, DEBUG_LEVEL_ERROR, e.to_string()).await;
            return Ok(());
        }
        self.log(
            link,
            DEBUG_LEVEL_TRACE,
            format!(
                "state now {} Hz {}",
                self.state.frequency_hz, self.state.mode
            ),
        )
        .await;
        self.publish_state(link).await
    }
}

fn periodic(period: std::time::Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl RadioServer for SimRadio {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut link: RadioLink) -> Result<(), RigError> {
        if self.settings.serial.portname.is_empty() {
            return Err(RigError::Device {
                component: self.id.clone(),
                details: "no serial port configured".to_string(),
            });
        }
        info!(radio = %self.id, port = %self.settings.serial, "radio server started");
        self.log(
            &link,
            DEBUG_LEVEL_INFO,
            format!(
                "rig model {} opened on {}",
                self.settings.serial.rig_model, self.settings.serial
            ),
        )
        .await;

        self.publish_caps(&link).await?;
        self.publish_state(&link).await?;

        let mut poll = periodic(self.settings.polling_interval);
        let mut sync = periodic(self.settings.sync_interval);

        loop {
            tokio::select! {
                _ = link.shutdown.recv() => break,
                request = link.set_state.recv() => match request {
                    Some(raw) => self.handle_set_state(&link, &raw).await?,
                    None => break,
                },
                request = link.caps_req.recv() => match request {
                    Some(_) => self.publish_caps(&link).await?,
                    None => break,
                },
                _ = tick(&mut poll) => {
                    let payload = StateMsg::Meters(self.sample_meters()).marshal()?;
                    link.outbound
                        .enqueue(Envelope::new(link.state_topic.clone(), payload))
                        .await?;
                }
                _ = tick(&mut sync) => self.publish_state(&link).await?,
            }
        }

        info!(radio = %self.id, "radio server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigbridge_middleware::{BusTopic, EventBus, Pipeline, PipelineCapacity};
    use rigbridge_types::TopicSet;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        bus: EventBus,
        topics: TopicSet,
        set_state: mpsc::Sender<Vec<u8>>,
        caps_req: mpsc::Sender<Vec<u8>>,
        outbound: mpsc::Receiver<Envelope>,
        link: Option<RadioLink>,
    }

    fn harness() -> Harness {
        let topics = TopicSet::new("s", "r");
        let bus = EventBus::default();
        let pipeline = Pipeline::new(topics.clone(), PipelineCapacity::default());
        let (set_state, set_state_rx) = mpsc::channel(10);
        let (caps_req, caps_req_rx) = mpsc::channel(10);
        let link = RadioLink {
            set_state: set_state_rx,
            caps_req: caps_req_rx,
            outbound: pipeline.outbound_tx.clone(),
            bus: bus.clone(),
            shutdown: bus.subscribe(BusTopic::Shutdown),
            state_topic: topics.state.clone(),
            caps_topic: topics.caps.clone(),
        };
        Harness {
            bus,
            topics,
            set_state,
            caps_req,
            outbound: pipeline.outbound_rx,
            link: Some(link),
        }
    }

    fn quiet_settings() -> RadioSettings {
        RadioSettings {
            polling_interval: Duration::ZERO,
            sync_interval: Duration::ZERO,
            ..RadioSettings::default()
        }
    }

    async fn next(outbound: &mut mpsc::Receiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("envelope within 1s")
            .expect("outbound open")
    }

    #[test]
    fn apply_rejects_out_of_range_without_partial_update() {
        let mut radio = SimRadio::new(RadioSettings::default());
        let err = radio
            .apply(RadioStateUpdate {
                mode: Some("CW".to_string()),
                frequency_hz: Some(1),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, RigError::Device { .. }));
        assert_eq!(radio.state().mode, "USB");
    }

    #[test]
    fn apply_rejects_unknown_mode() {
        let mut radio = SimRadio::new(RadioSettings::default());
        assert!(radio
            .apply(RadioStateUpdate {
                mode: Some("DSTAR".to_string()),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn caps_reflect_rig_model() {
        let mut settings = RadioSettings::default();
        settings.serial.rig_model = 373;
        let radio = SimRadio::new(settings);
        assert_eq!(radio.caps().rig_model, 373);
        assert!(radio.caps().modes.contains(&"USB".to_string()));
    }

    #[tokio::test]
    async fn announces_caps_and_state_then_serves_requests() {
        let mut h = harness();
        let link = h.link.take().unwrap();
        let mut radio = SimRadio::new(quiet_settings());
        let worker = tokio::spawn(async move { radio.run(link).await });

        let caps = next(&mut h.outbound).await;
        assert_eq!(caps.topic, h.topics.caps);
        let state = next(&mut h.outbound).await;
        assert_eq!(state.topic, h.topics.state);

        h.set_state
            .send(br#"{"frequency_hz":7074000,"mode":"LSB"}"#.to_vec())
            .await
            .unwrap();
        let state = next(&mut h.outbound).await;
        match StateMsg::unmarshal(&state.payload).unwrap() {
            StateMsg::Full(s) => {
                assert_eq!(s.frequency_hz, 7_074_000);
                assert_eq!(s.mode, "LSB");
            }
            other => panic!("expected full state, got {other:?}"),
        }

        h.caps_req.send(Vec::new()).await.unwrap();
        assert_eq!(next(&mut h.outbound).await.topic, h.topics.caps);

        h.bus.emit("test", EventPayload::Shutdown).await.unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_request_is_logged_and_dropped() {
        let mut h = harness();
        let mut radio_log = h.bus.subscribe(BusTopic::RadioLog);
        let link = h.link.take().unwrap();
        let mut radio = SimRadio::new(quiet_settings());
        let worker = tokio::spawn(async move { radio.run(link).await });

        next(&mut h.outbound).await;
        next(&mut h.outbound).await;

        h.set_state.send(b"garbage".to_vec()).await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(1), radio_log.recv())
            .await
            .unwrap()
            .unwrap();
        match line.payload {
            EventPayload::RadioLog(text) => assert!(text.contains("malformed")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(h.outbound.try_recv().is_err(), "no state for a bad request");

        h.bus.emit("test", EventPayload::Shutdown).await.unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn polling_tick_publishes_meters() {
        let mut h = harness();
        let link = h.link.take().unwrap();
        let mut radio = SimRadio::new(RadioSettings {
            polling_interval: Duration::from_millis(100),
            sync_interval: Duration::ZERO,
            ..RadioSettings::default()
        });
        let worker = tokio::spawn(async move { radio.run(link).await });

        next(&mut h.outbound).await;
        next(&mut h.outbound).await;

        let meters = next(&mut h.outbound).await;
        assert!(matches!(
            StateMsg::unmarshal(&meters.payload).unwrap(),
            StateMsg::Meters(_)
        ));

        h.bus.emit("test", EventPayload::Shutdown).await.unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_port_is_a_device_fault() {
        let mut h = harness();
        let link = h.link.take().unwrap();
        let mut settings = quiet_settings();
        settings.serial.portname.clear();
        let mut radio = SimRadio::new(settings);
        assert!(matches!(
            radio.run(link).await,
            Err(RigError::Device { .. })
        ));
    }
}
