//! REST client for the Pub/Sub emulator.
//!
//! The client is stateless apart from the pooled `reqwest::Client`; the relay
//! owns one instance and nobody else touches it.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use tracing::debug;

use crate::config::BrokerSettings;
use crate::pubsub::message::{
    AcknowledgeRequest, PublishRequest, PublishResponse, PubsubMessage, PullRequest,
    PullResponse, PulledMessage, SubscriptionRequest,
};
use crate::utils::{RelayError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    /// The broker answered "already exists"; the existing resource is used.
    Existing,
}

impl Provisioned {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provisioned::Created => "created",
            Provisioned::Existing => "existing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmulatorClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
}

impl EmulatorClient {
    /// `emulator_host` is `host:port`, as in `PUBSUB_EMULATOR_HOST`. A full
    /// `http://` URL is accepted too.
    pub fn new(emulator_host: &str, project_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let host = emulator_host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };

        Ok(Self {
            http,
            base_url,
            project_id: project_id.to_string(),
        })
    }

    pub fn from_settings(settings: &BrokerSettings) -> Result<Self> {
        Self::new(&settings.emulator_host, &settings.project_id)
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/v1/projects/{}/{}", self.base_url, self.project_id, resource)
    }

    /// Creates the topic unless it already exists.
    pub async fn create_or_get_topic(&self, topic: &str) -> Result<Provisioned> {
        let response = self
            .http
            .put(self.url(&format!("topics/{topic}")))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        provisioned("create topic", response).await
    }

    /// Creates a subscription on `topic` unless one with this name exists.
    ///
    /// An existing subscription is used as is, even if its ack deadline
    /// differs from `ack_deadline_secs`.
    pub async fn create_or_get_subscription(
        &self,
        subscription: &str,
        topic: &str,
        ack_deadline_secs: u32,
    ) -> Result<Provisioned> {
        let request = SubscriptionRequest {
            topic: format!("projects/{}/topics/{topic}", self.project_id),
            ack_deadline_seconds: ack_deadline_secs,
        };
        let response = self
            .http
            .put(self.url(&format!("subscriptions/{subscription}")))
            .json(&request)
            .send()
            .await?;
        provisioned("create subscription", response).await
    }

    /// Pulls up to `max_messages` without waiting for new ones to arrive.
    pub async fn pull(&self, subscription: &str, max_messages: u32) -> Result<Vec<PulledMessage>> {
        let request = PullRequest {
            return_immediately: true,
            max_messages,
        };
        let response = self
            .http
            .post(self.url(&format!("subscriptions/{subscription}:pull")))
            .json(&request)
            .send()
            .await?;
        let response = check("pull", response).await?;
        let pulled: PullResponse = response.json().await?;
        debug!(subscription, count = pulled.received_messages.len(), "pulled");
        Ok(pulled.received_messages)
    }

    pub async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        let request = AcknowledgeRequest {
            ack_ids: ack_ids.to_vec(),
        };
        let response = self
            .http
            .post(self.url(&format!("subscriptions/{subscription}:acknowledge")))
            .json(&request)
            .send()
            .await?;
        check("acknowledge", response).await?;
        Ok(())
    }

    /// Polls `subscription` every `poll` until one message arrives or
    /// `timeout` has passed. With `ack` the message is acknowledged before it
    /// is returned; otherwise its lease runs out and the broker redelivers it.
    pub async fn receive(
        &self,
        subscription: &str,
        timeout: Duration,
        poll: Duration,
        ack: bool,
    ) -> Result<Option<PulledMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(pulled) = self.pull(subscription, 1).await?.into_iter().next() {
                if ack {
                    self.acknowledge(subscription, std::slice::from_ref(&pulled.ack_id))
                        .await?;
                }
                return Ok(Some(pulled));
            }
            if tokio::time::Instant::now() + poll > deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Publishes one message and returns the id the broker assigned to it.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        attributes: HashMap<String, String>,
    ) -> Result<String> {
        let request = PublishRequest {
            messages: vec![PubsubMessage::for_publish(payload, attributes)],
        };
        let response = self
            .http
            .post(self.url(&format!("topics/{topic}:publish")))
            .json(&request)
            .send()
            .await?;
        let response = check("publish", response).await?;
        let published: PublishResponse = response.json().await?;
        published
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Broker {
                operation: "publish",
                status: StatusCode::OK.as_u16(),
                detail: "response carried no message id".to_string(),
            })
    }
}

async fn check(operation: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(RelayError::Broker {
        operation,
        status: status.as_u16(),
        detail,
    })
}

async fn provisioned(operation: &'static str, response: Response) -> Result<Provisioned> {
    if response.status() == StatusCode::CONFLICT {
        return Ok(Provisioned::Existing);
    }
    check(operation, response).await?;
    Ok(Provisioned::Created)
}
