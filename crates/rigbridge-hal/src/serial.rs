//! Serial CAT link parameters.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl Parity {
    /// Lenient parse: anything other than exactly `"even"` / `"odd"` means
    /// no parity.
    pub fn from_name(name: &str) -> Self {
        match name {
            "even" => Parity::Even,
            "odd" => Parity::Odd,
            _ => Parity::None,
        }
    }
}

/// Flow control on the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Handshake {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "RTSCTS")]
    RtsCts,
}

impl Handshake {
    /// Lenient parse: anything other than exactly `"RTSCTS"` means no
    /// handshake.
    pub fn from_name(name: &str) -> Self {
        if name == "RTSCTS" {
            Handshake::RtsCts
        } else {
            Handshake::None
        }
    }
}

/// How to reach the transceiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Driver model identifier of the transceiver.
    pub rig_model: u32,
    pub portname: String,
    pub baudrate: u32,
    pub databits: u8,
    pub stopbits: u8,
    pub parity: Parity,
    pub handshake: Handshake,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            rig_model: 1,
            portname: "/dev/mhux/cat".to_string(),
            baudrate: 38_400,
            databits: 8,
            stopbits: 1,
            parity: Parity::None,
            handshake: Handshake::None,
        }
    }
}

impl std::fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(
            f,
            "{} @ {} {}{}{}",
            self.portname, self.baudrate, self.databits, parity, self.stopbits
        )
    }
}
