//! `rigbridge-types` – shared vocabulary of the bridge.
//!
//! Every other crate speaks in these types: the [`Event`] values routed over
//! the internal event bus, the [`Envelope`] handed to the transport for
//! delivery on the network, the wire [`schema`] messages, the [`TopicSet`]
//! naming convention, and the crate-spanning [`RigError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod schema;
pub mod topics;

pub use schema::{
    LogLevel, LogMsg, Marshal, Meters, PingMsg, RadioCaps, RadioState, RadioStateUpdate,
    StateMsg, StatusMsg, Unmarshal,
};
pub use topics::TopicSet;

/// Connection state reported by the transport client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "rigbridge-middleware::loopback"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp a new event with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Control-plane signals and log lines carried over the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    /// The transport connected to, or lost, the broker.
    ConnStatus(ConnectionState),
    /// Announce "going offline" and prepare the workers for teardown.
    PrepareShutdown,
    /// Every worker must stop at its next safe point.
    Shutdown,
    /// Local diagnostic line, printed but never sent to the network.
    AppLog(String),
    /// Device-originated log line, forwarded to the network log topic.
    RadioLog(String),
}

/// One unit of work destined for the network.
///
/// Ownership moves from the producer into the outbound queue and from there
/// to the transport client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Envelope {
    /// A non-retained envelope.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            retain: false,
        }
    }

    /// An envelope the broker keeps serving to late subscribers.
    pub fn retained(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            retain: true,
        }
    }
}

/// Global error type spanning encoding failures, lifecycle violations,
/// transport and device faults.
#[derive(Error, Debug)]
pub enum RigError {
    #[error("Encoding Error: {0}")]
    Encoding(String),

    #[error("Decoding Error: {0}")]
    Decoding(String),

    #[error("Can not publish log message since server is offline")]
    Offline,

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("No inbound queue for topic {0}")]
    UnroutableTopic(String),

    #[error("Invalid shutdown transition: {signal} while {from}")]
    InvalidTransition { from: String, signal: String },

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Device Fault on {component}: {details}")]
    Device { component: String, details: String },

    #[error("Config Error: {0}")]
    Config(String),
}
