//! The `pubsub` module talks to the local Pub/Sub emulator.
//!
//! It covers exactly what the relay needs from the broker: provisioning a
//! topic and a subscription idempotently, pulling, acknowledging, and
//! publishing test messages. Everything goes through the emulator's REST
//! surface under `http://<PUBSUB_EMULATOR_HOST>/v1/`.

pub mod client;
pub mod message;

pub use client::{EmulatorClient, Provisioned};
pub use message::{PubsubMessage, PulledMessage, RelayMessage};
