//! The device-server seam.
//!
//! A [`RadioServer`] owns the CAT link to one transceiver.  It drains the
//! state-change and capability request queues, publishes state and
//! capability envelopes on the outbound queue, and forwards its own log
//! lines onto the event bus.  The rest of the bridge only ever talks to the
//! trait, so drivers can be swapped without touching the orchestration.

use std::time::Duration;

use async_trait::async_trait;
use rigbridge_middleware::{BusReceiver, EventBus, OutboundSender};
use rigbridge_types::RigError;
use tokio::sync::mpsc;

use crate::serial::SerialSettings;

/// Device log verbosity, 0 = errors only ... 5 = trace.
pub const DEBUG_LEVEL_ERROR: u8 = 0;
pub const DEBUG_LEVEL_INFO: u8 = 3;
pub const DEBUG_LEVEL_TRACE: u8 = 5;

/// Device-server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioSettings {
    pub serial: SerialSettings,
    /// Meter polling period; zero disables polling.
    pub polling_interval: Duration,
    /// Full state re-sync period; zero disables syncing.
    pub sync_interval: Duration,
    /// Device log verbosity (0–5).
    pub debug_level: u8,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            polling_interval: Duration::from_millis(100),
            sync_interval: Duration::from_secs(3),
            debug_level: DEBUG_LEVEL_ERROR,
        }
    }
}

/// Everything a device-server worker is wired to.
pub struct RadioLink {
    pub set_state: mpsc::Receiver<Vec<u8>>,
    pub caps_req: mpsc::Receiver<Vec<u8>>,
    pub outbound: OutboundSender,
    /// Where device log lines are published (`RadioLog`).
    pub bus: EventBus,
    pub shutdown: BusReceiver,
    /// Outbound topic for state updates.
    pub state_topic: String,
    /// Outbound topic for capability announcements.
    pub caps_topic: String,
}

/// A transceiver driver exposed to the network.
#[async_trait]
pub trait RadioServer: Send {
    /// Identifier used in logs, e.g. `"sim-radio"`.
    fn id(&self) -> &str;

    /// Serve requests until `link.shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`RigError::Device`] when the link to the transceiver cannot
    /// be established, or [`RigError::Channel`] when the outbound queue is
    /// gone.
    async fn run(&mut self, link: RadioLink) -> Result<(), RigError>;
}
