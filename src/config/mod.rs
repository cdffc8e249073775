//! The `config` module builds the relay's immutable [`Settings`].
//!
//! Sources, lowest precedence first: `config/relay.toml` (optional), `RELAY_*`
//! environment variables (`RELAY_BROKER__TOPIC`, `RELAY_TARGET__PORT`, ...),
//! the well-known `PUBSUB_EMULATOR_HOST` and `GOOGLE_CLOUD_PROJECT` variables,
//! and finally command line overrides.

mod settings;

use std::env;

use config::{Config, Environment, File};

use crate::utils::{RelayError, Result};
use settings::{PartialBrokerSettings, PartialForwardTarget, PartialSettings};

pub use settings::{
    BrokerSettings, DEFAULT_ACK_DEADLINE_SECS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PROJECT_ID,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TARGET_HOST, DEFAULT_TARGET_PATH, ForwardTarget,
    SUBSCRIPTION_SUFFIX, Settings, WireFormat,
};

pub const EMULATOR_HOST_VAR: &str = "PUBSUB_EMULATOR_HOST";
pub const PROJECT_VAR: &str = "GOOGLE_CLOUD_PROJECT";

/// Values given on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub topic: Option<String>,
    pub port: Option<u16>,
    pub wire_format: Option<WireFormat>,
}

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings> {
    load_config_with(&Overrides::default())
}

/// Loads the configuration and applies command line overrides on top.
///
/// Fails fast with [`RelayError::Config`] when the emulator host, the topic
/// or the target port is missing.
pub fn load_config_with(overrides: &Overrides) -> Result<Settings> {
    merge(load_partial(overrides)?)
}

/// Loads only the broker half of the configuration.
///
/// Used by commands that talk to the emulator but never forward, so the
/// target port is not required.
pub fn load_broker_settings(overrides: &Overrides) -> Result<BrokerSettings> {
    merge_broker(load_partial(overrides)?.broker.unwrap_or_default())
}

fn load_partial(overrides: &Overrides) -> Result<PartialSettings> {
    let config = Config::builder()
        .add_source(File::with_name("config/relay").required(false))
        .add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("broker.emulator_host", non_empty_var(EMULATOR_HOST_VAR))?
        .set_override_option("broker.project_id", non_empty_var(PROJECT_VAR))?
        .set_override_option("broker.topic", overrides.topic.clone())?
        .set_override_option("target.port", overrides.port.map(i64::from))?
        .set_override_option(
            "target.wire_format",
            overrides.wire_format.map(|f| f.as_str().to_string()),
        )?
        .build()?;

    Ok(config.try_deserialize()?)
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| RelayError::Config(format!("missing required setting: {name}")))
}

/// Merges partial settings with defaults and checks the required values.
fn merge(partial: PartialSettings) -> Result<Settings> {
    let broker = partial.broker.unwrap_or_default();
    let target = partial.target.unwrap_or_default();

    let settings = Settings {
        broker: merge_broker(broker)?,
        target: merge_target(target)?,
    };
    Ok(settings)
}

fn merge_broker(broker: PartialBrokerSettings) -> Result<BrokerSettings> {
    let emulator_host = required(
        broker.emulator_host.filter(|h| !h.trim().is_empty()),
        EMULATOR_HOST_VAR,
    )?;
    let topic = required(
        broker.topic.filter(|t| !t.trim().is_empty()),
        "broker.topic (RELAY_BROKER__TOPIC)",
    )?;
    if topic.contains('/') {
        return Err(RelayError::Config(format!(
            "topic must be a short name, not a path: {topic}"
        )));
    }

    let poll_interval_ms = broker.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    if poll_interval_ms == 0 {
        return Err(RelayError::Config(
            "broker.poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    Ok(BrokerSettings {
        emulator_host: emulator_host.trim().to_string(),
        project_id: broker
            .project_id
            .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string()),
        topic: topic.trim().to_string(),
        ack_deadline_secs: broker.ack_deadline_secs.unwrap_or(DEFAULT_ACK_DEADLINE_SECS),
        poll_interval_ms,
    })
}

fn merge_target(target: PartialForwardTarget) -> Result<ForwardTarget> {
    let port = required(target.port, "target.port (RELAY_TARGET__PORT)")?;
    if port == 0 {
        return Err(RelayError::Config(
            "target.port must be a non-zero port".to_string(),
        ));
    }

    Ok(ForwardTarget {
        host: target
            .host
            .unwrap_or_else(|| DEFAULT_TARGET_HOST.to_string()),
        port,
        path: target
            .path
            .unwrap_or_else(|| DEFAULT_TARGET_PATH.to_string()),
        wire_format: target.wire_format.unwrap_or_default(),
        request_timeout_secs: target
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        probe: target.probe.unwrap_or(false),
        dump_path: target.dump_path,
    })
}
