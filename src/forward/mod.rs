//! The `forward` module turns a relayed message into the HTTP request a
//! function would receive from the managed platform, and sends it.
//!
//! Two body shapes are supported, chosen by [`WireFormat`](crate::config::WireFormat):
//! a `messagePublished` CloudEvent carrying the base64 payload, or the
//! decoded payload itself.

pub mod envelope;
pub mod http;

pub use envelope::{CloudEvent, EventSource, ForwardBody, build_body};
pub use self::http::Forwarder;
