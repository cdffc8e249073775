//! # pubsub-relay
//!
//! `pubsub-relay` is a local development bridge that stands in for the
//! managed platform's Pub/Sub push delivery. It drains a subscription on the
//! Pub/Sub emulator and POSTs every message to a locally running function,
//! either wrapped in a CloudEvent envelope or as the plain JSON payload.
//!
//! ## Core Modules
//!
//! - `bridge`: the receive-process-ack loop and its stop handle.
//! - `config`: loading the immutable relay settings.
//! - `forward`: request bodies for both wire formats and the HTTP forwarder.
//! - `pubsub`: REST client and message types for the emulator.
//! - `utils`: error type and logging setup.

pub mod bridge;
pub mod config;
pub mod forward;
pub mod pubsub;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
