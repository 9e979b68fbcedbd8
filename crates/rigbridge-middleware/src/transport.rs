//! The transport-client seam.
//!
//! The bridge never speaks a network protocol directly.  It fills the
//! outbound queue and drains the inbound queues; a [`TransportClient`]
//! moves those bytes to and from the broker.

use std::fmt;

use async_trait::async_trait;
use rigbridge_types::{Envelope, RigError};
use tokio::sync::mpsc;

use crate::bus::{BusReceiver, EventBus};
use crate::pipeline::InboundRouter;

/// Message the broker publishes on our behalf if the connection drops
/// without a clean disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// Connection settings handed to the transport client.
#[derive(Clone)]
pub struct TransportSettings {
    pub broker_url: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// Inbound topics to subscribe to once connected.
    pub topics: Vec<String>,
    pub last_will: Option<LastWill>,
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("broker_url", &self.broker_url)
            .field("broker_port", &self.broker_port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("topics", &self.topics)
            .field("last_will", &self.last_will)
            .finish()
    }
}

/// Everything a transport worker is wired to.
pub struct TransportLink {
    /// Sole producer for the three inbound queues.
    pub router: InboundRouter,
    /// Sole consumer of the outbound queue.
    pub outbound: mpsc::Receiver<Envelope>,
    /// Where connection-status events are emitted.
    pub bus: EventBus,
    /// Fires once the orchestrator broadcasts `Shutdown`.
    pub shutdown: BusReceiver,
}

/// A network client that carries the bridge's traffic.
///
/// # Contract
///
/// * Connect using `settings`, registering `settings.last_will` with the
///   broker, and subscribe to `settings.topics`.
/// * Emit a `ConnStatus` event on every connect / disconnect.
/// * Forward every envelope from `link.outbound` to the network.
/// * Deposit inbound frames through `link.router`, via
///   [`InboundRouter::dispatcher`] so the network loop never waits on a
///   busy worker.
/// * Return once `link.shutdown` fires.
#[async_trait]
pub trait TransportClient: Send {
    async fn run(&mut self, settings: TransportSettings, link: TransportLink)
    -> Result<(), RigError>;
}
