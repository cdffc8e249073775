use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

/// Fixed suffix appended to the topic name to form the subscription name.
pub const SUBSCRIPTION_SUFFIX: &str = "-sub";

pub const DEFAULT_PROJECT_ID: &str = "local-project";
pub const DEFAULT_ACK_DEADLINE_SECS: u32 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_TARGET_HOST: &str = "localhost";
pub const DEFAULT_TARGET_PATH: &str = "/";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration settings for the relay.
///
/// Built once at startup by [`load_config`](super::load_config) and passed by
/// reference; nothing in it changes for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub target: ForwardTarget,
}

/// Where the messages come from.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    /// `host:port` of the Pub/Sub emulator.
    pub emulator_host: String,
    pub project_id: String,
    pub topic: String,
    /// Ack deadline requested when the relay creates the subscription.
    pub ack_deadline_secs: u32,
    /// Idle wait between two pulls that returned nothing.
    pub poll_interval_ms: u64,
}

/// Where the messages go, and in which shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub wire_format: WireFormat,
    pub request_timeout_secs: u64,
    /// Check that the endpoint answers before every POST.
    pub probe: bool,
    /// Write the last forwarded body to this file.
    pub dump_path: Option<PathBuf>,
}

/// Shape of the HTTP body sent to the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    /// Pub/Sub push wrapped in a `messagePublished` CloudEvent.
    #[default]
    #[serde(alias = "cloudevent")]
    CloudeventEnvelope,
    /// The decoded payload as is.
    #[serde(alias = "json")]
    FlatJson,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::CloudeventEnvelope => "cloudevent-envelope",
            WireFormat::FlatJson => "flat-json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            WireFormat::CloudeventEnvelope => "application/cloudevents+json",
            WireFormat::FlatJson => "application/json",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloudevent-envelope" | "cloudevent" => Ok(WireFormat::CloudeventEnvelope),
            "flat-json" | "json" => Ok(WireFormat::FlatJson),
            other => Err(format!(
                "unknown wire format '{other}' (expected cloudevent-envelope or flat-json)"
            )),
        }
    }
}

impl BrokerSettings {
    /// Subscription name: the topic plus [`SUBSCRIPTION_SUFFIX`].
    pub fn subscription(&self) -> String {
        format!("{}{}", self.topic, SUBSCRIPTION_SUFFIX)
    }

    /// Fully qualified topic name, `projects/<p>/topics/<t>`.
    pub fn topic_path(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.topic)
    }

    /// Fully qualified subscription name, `projects/<p>/subscriptions/<s>`.
    pub fn subscription_path(&self) -> String {
        format!(
            "projects/{}/subscriptions/{}",
            self.project_id,
            self.subscription()
        )
    }
}

impl Settings {
    pub fn subscription(&self) -> String {
        self.broker.subscription()
    }

    pub fn topic_path(&self) -> String {
        self.broker.topic_path()
    }

    pub fn subscription_path(&self) -> String {
        self.broker.subscription_path()
    }
}

impl ForwardTarget {
    /// Target with the given port and every optional setting at its default.
    pub fn with_port(port: u16) -> Self {
        Self {
            host: DEFAULT_TARGET_HOST.to_string(),
            port,
            path: DEFAULT_TARGET_PATH.to_string(),
            wire_format: WireFormat::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            probe: false,
            dump_path: None,
        }
    }

    /// `http://host:port` without the path.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn endpoint(&self) -> String {
        if self.path.starts_with('/') {
            format!("{}{}", self.base_url(), self.path)
        } else {
            format!("{}/{}", self.base_url(), self.path)
        }
    }
}

/// Partial configuration loaded from the file and the environment.
///
/// Every value is optional here; required ones are checked when merging.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub target: Option<PartialForwardTarget>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub emulator_host: Option<String>,
    pub project_id: Option<String>,
    pub topic: Option<String>,
    pub ack_deadline_secs: Option<u32>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialForwardTarget {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub wire_format: Option<WireFormat>,
    pub request_timeout_secs: Option<u64>,
    pub probe: Option<bool>,
    pub dump_path: Option<PathBuf>,
}
