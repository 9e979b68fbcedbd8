//! Server status, log forwarding and the Last-Will.
//!
//! [`ServerStatus`] is owned by the orchestrator alone; nothing else reads
//! or writes the `online` flag, so it carries no lock.

use rigbridge_middleware::{LastWill, OutboundSender};
use rigbridge_types::{Envelope, LogLevel, LogMsg, Marshal, RigError, StatusMsg, TopicSet};
use tracing::warn;

/// The bridge's announced availability plus the handles needed to announce
/// it.
#[derive(Debug)]
pub struct ServerStatus {
    online: bool,
    status_topic: String,
    log_topic: String,
    outbound: OutboundSender,
}

impl ServerStatus {
    /// Starts offline.
    pub fn new(topics: &TopicSet, outbound: OutboundSender) -> Self {
        Self {
            online: false,
            status_topic: topics.status.clone(),
            log_topic: topics.log.clone(),
            outbound,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Enqueue the current `{online}` value as a retained status envelope.
    ///
    /// # Errors
    ///
    /// [`RigError::Encoding`] if the status cannot be marshalled, or
    /// [`RigError::Channel`] if the outbound queue is closed.
    pub async fn send_update(&self) -> Result<(), RigError> {
        let payload = StatusMsg {
            online: self.online,
        }
        .marshal()?;
        self.outbound
            .enqueue(Envelope::retained(self.status_topic.clone(), payload))
            .await
    }

    /// Forward a log line to the network as a warning-level [`LogMsg`] and
    /// mirror it locally.
    ///
    /// # Errors
    ///
    /// [`RigError::Offline`] while offline; nothing is enqueued.
    pub async fn send_log_msg(&self, text: &str) -> Result<(), RigError> {
        if !self.online {
            return Err(RigError::Offline);
        }
        let payload = LogMsg {
            level: LogLevel::Warning,
            msg: text.to_string(),
        }
        .marshal()?;
        self.outbound
            .enqueue(Envelope::new(self.log_topic.clone(), payload))
            .await?;
        warn!(target: "rigbridge::radio", "{text}");
        Ok(())
    }
}

/// The `{online:false}` message the broker publishes (retained) if the
/// connection drops without a clean disconnect.
pub fn create_last_will(topics: &TopicSet) -> Result<LastWill, RigError> {
    Ok(LastWill {
        topic: topics.status.clone(),
        payload: StatusMsg { online: false }.marshal()?,
        qos: 0,
        retain: true,
    })
}
