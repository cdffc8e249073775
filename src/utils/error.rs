//! The `error` module defines the error taxonomy of the relay.
//!
//! Configuration errors are fatal and surface before the receive loop starts.
//! Decode and forward errors are recovered inside the loop: the first by
//! acknowledging and dropping the message, the second by leaving it
//! unacknowledged so the broker redelivers it.

use thiserror::Error;

/// Result type alias using [`RelayError`].
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// A required setting is missing or a value is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The message payload could not be decoded as UTF-8 JSON.
    #[error("decode error: {0}")]
    Decode(String),

    /// The HTTP forward failed or the endpoint answered with a non-2xx status.
    #[error("forward to {endpoint} failed{}: {detail}", status_suffix(.status))]
    Forward {
        endpoint: String,
        status: Option<u16>,
        detail: String,
    },

    /// The emulator answered an API call with an unexpected status.
    #[error("broker {operation} failed with status {status}: {detail}")]
    Broker {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl RelayError {
    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RelayError::Forward { status, .. } => *status,
            RelayError::Broker { status, .. } => Some(*status),
            RelayError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
