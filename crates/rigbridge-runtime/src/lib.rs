//! `rigbridge-runtime` – the orchestrator and process wiring.
//!
//! # Modules
//!
//! - [`status`] – [`ServerStatus`]: the announced online flag, the status
//!   update, log forwarding, and the Last-Will payload.
//! - [`orchestrator`] – [`Orchestrator`]: the single-threaded dispatch loop
//!   that owns [`ServerStatus`] and drives the shutdown state machine.
//! - [`bridge`] – [`Bridge`]: builds the bus and pipeline, starts the
//!   workers in order, and runs the orchestrator to completion.
//! - [`telemetry`] – `tracing` subscriber and optional OTLP export.

pub mod bridge;
pub mod orchestrator;
pub mod status;
pub mod telemetry;

pub use bridge::{Bridge, BridgeConfig};
pub use orchestrator::Orchestrator;
pub use status::{ServerStatus, create_last_will};
