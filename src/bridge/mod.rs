//! The `bridge` module runs the relay: it drains one subscription and
//! delivers every message to one HTTP endpoint, the way the managed platform
//! pushes Pub/Sub messages to a deployed function.

pub mod engine;

pub use engine::{Disposition, Phase, RelayBridge, RelayStats, StopHandle};
