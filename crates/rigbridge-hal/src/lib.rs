//! `rigbridge-hal` – the transceiver side of the bridge.
//!
//! # Modules
//!
//! - [`serial`] – CAT link parameters ([`SerialSettings`], [`Parity`],
//!   [`Handshake`]).
//! - [`server`] – the [`RadioServer`] trait every driver implements and the
//!   [`RadioLink`] wiring it is handed.
//! - [`sim`] – [`SimRadio`][sim::SimRadio], an in-process simulated rig.

pub mod serial;
pub mod server;
pub mod sim;

pub use serial::{Handshake, Parity, SerialSettings};
pub use server::{RadioLink, RadioServer, RadioSettings};
pub use sim::SimRadio;
