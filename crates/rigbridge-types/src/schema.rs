//! Wire schemas exchanged with remote clients.
//!
//! The bridge core treats every payload as an opaque byte blob produced by
//! [`Marshal::marshal`].  The encoding itself is JSON via `serde_json`; only
//! this module knows that.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::RigError;

/// Turn a schema value into its wire bytes.
pub trait Marshal {
    /// # Errors
    ///
    /// Returns [`RigError::Encoding`] when the value cannot be encoded.
    fn marshal(&self) -> Result<Vec<u8>, RigError>;
}

/// Parse wire bytes back into a schema value.
pub trait Unmarshal: Sized {
    /// # Errors
    ///
    /// Returns [`RigError::Decoding`] on malformed input.
    fn unmarshal(bytes: &[u8]) -> Result<Self, RigError>;
}

impl<T: Serialize> Marshal for T {
    fn marshal(&self) -> Result<Vec<u8>, RigError> {
        serde_json::to_vec(self).map_err(|e| RigError::Encoding(e.to_string()))
    }
}

impl<T: DeserializeOwned> Unmarshal for T {
    fn unmarshal(bytes: &[u8]) -> Result<Self, RigError> {
        serde_json::from_slice(bytes).map_err(|e| RigError::Decoding(e.to_string()))
    }
}

/// Availability announcement published (retained) on `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMsg {
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Log line forwarded on `/log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMsg {
    pub level: LogLevel,
    pub msg: String,
}

/// Heartbeat request on `/ping`, echoed back on `/pong`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMsg {
    /// Sender's clock in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Full snapshot of the transceiver's operating state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioState {
    pub frequency_hz: u64,
    pub mode: String,
    pub passband_hz: u32,
    pub ptt: bool,
    /// Output power as a fraction of the rig's maximum (0.0 – 1.0).
    pub rf_power: f32,
}

impl Default for RadioState {
    fn default() -> Self {
        Self {
            frequency_hz: 14_074_000,
            mode: "USB".to_string(),
            passband_hz: 2_400,
            ptt: false,
            rf_power: 0.5,
        }
    }
}

/// Partial update carried by a `/setstate` request; absent fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RadioStateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_hz: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passband_hz: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptt: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rf_power: Option<f32>,
}

/// Fast-changing meter readings sampled on every polling tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Meters {
    /// Received signal strength relative to S9, in dB.
    pub strength_db: i32,
    pub swr: f32,
}

/// Payload of the `/state` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StateMsg {
    Full(RadioState),
    Meters(Meters),
}

/// Capability announcement on `/caps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioCaps {
    pub rig_model: u32,
    pub model_name: String,
    pub modes: Vec<String>,
    pub min_frequency_hz: u64,
    pub max_frequency_hz: u64,
    pub has_ptt: bool,
}
