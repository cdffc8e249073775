use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::{RelayError, Result};

/// A message as the emulator's REST API represents it.
///
/// `data` is the base64 encoding of the published bytes. `message_id` and
/// `publish_time` are filled by the broker and left empty when publishing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<DateTime<Utc>>,
}

/// One entry of a `:pull` response: the message plus the id used to ack it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulledMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub return_immediately: bool,
    pub max_messages: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub received_messages: Vec<PulledMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub ack_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub messages: Vec<PubsubMessage>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    #[serde(default)]
    pub message_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub topic: String,
    pub ack_deadline_seconds: u32,
}

/// The unit of work the relay forwards.
///
/// Built from a pulled [`PubsubMessage`] once its base64 data has been
/// decoded. The payload stays opaque until [`RelayMessage::decode_json`].
#[derive(Debug, Clone, PartialEq)]
pub struct RelayMessage {
    pub payload: Vec<u8>,
    pub message_id: String,
    pub publish_time: DateTime<Utc>,
    pub attributes: HashMap<String, String>,
}

impl RelayMessage {
    /// Decodes the payload as UTF-8 JSON.
    pub fn decode_json(&self) -> Result<Value> {
        let text = std::str::from_utf8(&self.payload)
            .map_err(|e| RelayError::Decode(format!("payload is not UTF-8: {e}")))?;
        serde_json::from_str(text)
            .map_err(|e| RelayError::Decode(format!("payload is not JSON: {e}")))
    }
}

impl TryFrom<PubsubMessage> for RelayMessage {
    type Error = RelayError;

    fn try_from(msg: PubsubMessage) -> Result<Self> {
        let payload = STANDARD
            .decode(msg.data.as_bytes())
            .map_err(|e| RelayError::Decode(format!("message data is not base64: {e}")))?;

        Ok(Self {
            payload,
            message_id: msg.message_id,
            // the emulator always sets it; fall back to receipt time otherwise
            publish_time: msg.publish_time.unwrap_or_else(Utc::now),
            attributes: msg.attributes,
        })
    }
}

impl PubsubMessage {
    /// Message ready to publish: `payload` is base64-encoded into `data`.
    pub fn for_publish(payload: &[u8], attributes: HashMap<String, String>) -> Self {
        Self {
            data: STANDARD.encode(payload),
            attributes,
            ..Default::default()
        }
    }
}
