//! Heartbeat responder: answers every ping with a pong.
//!
//! Stateless request → reply.  A malformed ping is logged and dropped; it
//! never stops the worker.

use rigbridge_middleware::{BusReceiver, OutboundSender};
use rigbridge_types::{Envelope, Marshal, PingMsg, RigError, Unmarshal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct PingResponder {
    pong_topic: String,
}

impl PingResponder {
    pub fn new(pong_topic: impl Into<String>) -> Self {
        Self {
            pong_topic: pong_topic.into(),
        }
    }

    /// Build the pong envelope for one raw ping payload.
    ///
    /// # Errors
    ///
    /// [`RigError::Decoding`] for a malformed ping.
    pub fn reply(&self, raw: &[u8]) -> Result<Envelope, RigError> {
        let ping = PingMsg::unmarshal(raw)?;
        Ok(Envelope::new(self.pong_topic.clone(), ping.marshal()?))
    }

    /// Answer pings from `pings` until `shutdown` fires or a queue closes.
    pub async fn run(
        self,
        mut pings: mpsc::Receiver<Vec<u8>>,
        outbound: OutboundSender,
        mut shutdown: BusReceiver,
    ) {
        info!(topic = %self.pong_topic, "heartbeat responder started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                raw = pings.recv() => {
                    let Some(raw) = raw else { break };
                    match self.reply(&raw) {
                        Ok(pong) => {
                            if let Err(e) = outbound.enqueue(pong).await {
                                warn!(error = %e, "pong not sent");
                                break;
                            }
                            debug!("pong queued");
                        }
                        Err(e) => warn!(error = %e, "dropping malformed ping"),
                    }
                }
            }
        }
        info!("heartbeat responder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigbridge_middleware::{BusTopic, EventBus, Pipeline, PipelineCapacity};
    use rigbridge_types::{EventPayload, TopicSet};
    use std::time::Duration;

    #[test]
    fn reply_echoes_ping_on_pong_topic() {
        let responder = PingResponder::new("s/radios/r/cat/pong");
        let pong = responder.reply(br#"{"timestamp":1700000000000}"#).unwrap();
        assert_eq!(pong.topic, "s/radios/r/cat/pong");
        assert!(!pong.retain);
        assert_eq!(
            PingMsg::unmarshal(&pong.payload).unwrap().timestamp,
            1_700_000_000_000
        );
    }

    #[test]
    fn reply_rejects_garbage() {
        let responder = PingResponder::new("pong");
        assert!(matches!(
            responder.reply(b"\x00\x01"),
            Err(RigError::Decoding(_))
        ));
    }

    #[tokio::test]
    async fn ping_produces_exactly_one_pong() {
        let topics = TopicSet::new("s", "r");
        let bus = EventBus::default();
        let mut pipeline = Pipeline::new(topics.clone(), PipelineCapacity::default());
        let responder = PingResponder::new(topics.pong.clone());
        let worker = tokio::spawn(responder.run(
            pipeline.inbound.ping,
            pipeline.outbound_tx.clone(),
            bus.subscribe(BusTopic::Shutdown),
        ));

        pipeline
            .router
            .route(&topics.ping, br#"{"timestamp":42}"#.to_vec())
            .await
            .unwrap();

        let pong = tokio::time::timeout(Duration::from_secs(1), pipeline.outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pong.topic, topics.pong);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pipeline.outbound_rx.try_recv().is_err(), "exactly one pong");

        bus.emit("test", EventPayload::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_ping_does_not_stop_worker() {
        let topics = TopicSet::new("s", "r");
        let bus = EventBus::default();
        let mut pipeline = Pipeline::new(topics.clone(), PipelineCapacity::default());
        let worker = tokio::spawn(PingResponder::new(topics.pong.clone()).run(
            pipeline.inbound.ping,
            pipeline.outbound_tx.clone(),
            bus.subscribe(BusTopic::Shutdown),
        ));

        pipeline.router.route(&topics.ping, b"???".to_vec()).await.unwrap();
        pipeline
            .router
            .route(&topics.ping, br#"{"timestamp":7}"#.to_vec())
            .await
            .unwrap();

        let pong = tokio::time::timeout(Duration::from_secs(1), pipeline.outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(PingMsg::unmarshal(&pong.payload).unwrap().timestamp, 7);
        assert!(!worker.is_finished());

        bus.emit("test", EventPayload::Shutdown).await.unwrap();
        worker.await.unwrap();
    }
}
