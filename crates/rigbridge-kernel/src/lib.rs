//! `rigbridge-kernel` – lifecycle and liveness.
//!
//! Owns nothing about radios or brokers; it only decides when the bridge
//! is allowed to stop.
//!
//! # Modules
//!
//! - [`worker_group`] – [`WorkerGroup`][worker_group::WorkerGroup]: named
//!   guards for the long-running workers and a wait for all of them to
//!   release.
//! - [`shutdown`] – the [`ShutdownPhase`] state machine, its
//!   [`ShutdownTimings`], and the bounded [`await_workers`] wait that ends
//!   in a clean or forced exit.
//! - [`heartbeat`] – [`PingResponder`][heartbeat::PingResponder]: answers
//!   every ping with a pong.
//! - [`watcher`] – turns an external stop request into `PrepareShutdown`.

pub mod heartbeat;
pub mod shutdown;
pub mod watcher;
pub mod worker_group;

pub use heartbeat::PingResponder;
pub use shutdown::{
    ExitOutcome, ShutdownPhase, ShutdownSignal, ShutdownTimings, await_workers,
};
pub use watcher::watch_system_events;
pub use worker_group::{WorkerGroup, WorkerGuard};
