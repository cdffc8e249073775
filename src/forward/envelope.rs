use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{Settings, WireFormat};
use crate::pubsub::RelayMessage;
use crate::utils::Result;

pub const SPEC_VERSION: &str = "1.0";
pub const MESSAGE_PUBLISHED: &str = "google.cloud.pubsub.topic.v1.messagePublished";
pub const DATA_CONTENT_TYPE: &str = "application/json";

/// Structured-mode CloudEvent as pushed for a Pub/Sub trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub id: String,
    pub time: String,
    pub datacontenttype: String,
    pub data: MessagePublishedData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePublishedData {
    pub message: PushedMessage,
    /// Fully qualified subscription name.
    pub subscription: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushedMessage {
    /// Base64 of the original payload bytes.
    pub data: String,
    pub message_id: String,
    pub publish_time: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

/// Where an event claims to come from.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSource {
    pub topic_path: String,
    pub subscription_path: String,
}

impl EventSource {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            topic_path: settings.topic_path(),
            subscription_path: settings.subscription_path(),
        }
    }
}

/// Body of one forward request plus the content type that goes with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardBody {
    pub content_type: &'static str,
    pub body: Value,
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl CloudEvent {
    /// Wraps `msg` in a fresh event: new id, current time.
    pub fn message_published(msg: &RelayMessage, source: &EventSource) -> Self {
        Self {
            specversion: SPEC_VERSION.to_string(),
            event_type: MESSAGE_PUBLISHED.to_string(),
            source: format!("pubsub:{}", source.topic_path),
            id: Uuid::new_v4().to_string(),
            time: timestamp(Utc::now()),
            datacontenttype: DATA_CONTENT_TYPE.to_string(),
            data: MessagePublishedData {
                message: PushedMessage {
                    data: STANDARD.encode(&msg.payload),
                    message_id: msg.message_id.clone(),
                    publish_time: timestamp(msg.publish_time),
                    attributes: msg.attributes.clone(),
                },
                subscription: source.subscription_path.clone(),
            },
        }
    }
}

/// Builds the request body for `format`.
///
/// `decoded` is the payload already parsed as JSON; the flat format sends it
/// unchanged, the envelope format ignores it and encodes the raw bytes.
pub fn build_body(
    format: WireFormat,
    msg: &RelayMessage,
    decoded: Value,
    source: &EventSource,
) -> Result<ForwardBody> {
    let body = match format {
        WireFormat::CloudeventEnvelope => {
            serde_json::to_value(CloudEvent::message_published(msg, source))?
        }
        WireFormat::FlatJson => decoded,
    };
    Ok(ForwardBody {
        content_type: format.content_type(),
        body,
    })
}
