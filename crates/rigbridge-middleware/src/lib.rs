//! `rigbridge-middleware` – the message plumbing.
//!
//! Routes control-plane events and payload bytes between the transport, the
//! workers, and the orchestrator without caring what the bytes mean.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus with per-subscriber
//!   bounded queues and overflow policies.
//! - [`pipeline`] – the bounded outbound queue and the three inbound
//!   request-class queues.
//! - [`transport`] – the [`TransportClient`] seam and its connection
//!   settings, including the Last-Will.
//! - [`mqtt`] – the network transport client for a real MQTT broker.
//! - [`loopback`] – an in-process broker and transport client for headless
//!   runs and tests.

pub mod bus;
pub mod loopback;
pub mod mqtt;
pub mod pipeline;
pub mod transport;

pub use bus::{BusReceiver, BusTopic, EventBus, OverflowPolicy};
pub use loopback::{LoopbackBroker, LoopbackTransport};
pub use mqtt::MqttTransport;
pub use pipeline::{
    InboundDispatcher, InboundQueues, InboundRouter, OutboundSender, Pipeline, PipelineCapacity,
    RequestClass,
};
pub use transport::{LastWill, TransportClient, TransportLink, TransportSettings};
