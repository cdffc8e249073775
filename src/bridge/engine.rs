//! Relay engine
//!
//! A single task runs an explicit receive-process-ack loop:
//! `Idle -> Receiving -> Processing -> Acking -> Idle`.
//!
//! Delivery rules:
//! - a message is acknowledged only after the endpoint answered 2xx
//! - a message whose payload is not UTF-8 JSON is acknowledged and dropped,
//!   so a poison message cannot block the subscription
//! - a failed forward leaves the message unacknowledged; the broker
//!   redelivers it once the ack deadline lapses. The bridge keeps no retry
//!   count and does no backoff of its own.
//!
//! Stopping interrupts a pull or an idle wait, never an in-flight forward.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Settings, WireFormat};
use crate::forward::{EventSource, Forwarder, build_body};
use crate::pubsub::{EmulatorClient, Provisioned, PulledMessage, RelayMessage};
use crate::utils::Result;

/// Messages requested per pull; they are processed one at a time anyway.
const PULL_BATCH: u32 = 1;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Receiving,
    Processing,
    Acking,
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delivered with a 2xx answer, then acknowledged.
    Forwarded,
    /// Payload could not be decoded; acknowledged without forwarding.
    Dropped,
    /// Forward failed; left for the broker to redeliver.
    Retained,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub retained: u64,
    pub ack_failures: u64,
}

/// Stops a running [`RelayBridge`]. Consumed by [`StopHandle::stop`].
#[derive(Debug)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct RelayBridge {
    client: EmulatorClient,
    forwarder: Forwarder,
    source: EventSource,
    topic: String,
    subscription: String,
    ack_deadline_secs: u32,
    wire_format: WireFormat,
    poll_interval: Duration,
    cancel: CancellationToken,
    phase: watch::Sender<Phase>,
    stats: RelayStats,
}

impl RelayBridge {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            client: EmulatorClient::from_settings(&settings.broker)?,
            forwarder: Forwarder::new(&settings.target)?,
            source: EventSource::from_settings(settings),
            topic: settings.broker.topic.clone(),
            subscription: settings.subscription(),
            ack_deadline_secs: settings.broker.ack_deadline_secs,
            wire_format: settings.target.wire_format,
            poll_interval: Duration::from_millis(settings.broker.poll_interval_ms),
            cancel: CancellationToken::new(),
            phase: watch::Sender::new(Phase::Idle),
            stats: RelayStats::default(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Follows phase changes while [`RelayBridge::run`] holds the bridge.
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Makes sure the topic and the subscription exist. Returns whether the
    /// subscription was created or already there.
    pub async fn provision(&self) -> Result<Provisioned> {
        let topic = self.client.create_or_get_topic(&self.topic).await?;
        debug!(topic = %self.topic, outcome = topic.as_str(), "topic ready");

        self.client
            .create_or_get_subscription(&self.subscription, &self.topic, self.ack_deadline_secs)
            .await
    }

    /// Provisions the subscription, then relays messages until stopped.
    ///
    /// Provisioning errors are returned before the loop starts. Once in the
    /// loop, failures are logged and never end it.
    pub async fn run(&mut self) -> Result<RelayStats> {
        let provisioned = self.provision().await?;
        info!(
            subscription = %self.source.subscription_path,
            outcome = provisioned.as_str(),
            endpoint = %self.forwarder.endpoint(),
            wire_format = %self.wire_format,
            "relay started"
        );

        while !self.cancel.is_cancelled() {
            self.set_phase(Phase::Receiving);
            let pulled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                pulled = self.client.pull(&self.subscription, PULL_BATCH) => pulled,
            };

            match pulled {
                Ok(messages) if !messages.is_empty() => {
                    for message in messages {
                        self.on_message(message).await;
                    }
                }
                Ok(_) => {
                    self.set_phase(Phase::Idle);
                    self.idle().await;
                }
                Err(e) => {
                    warn!(subscription = %self.subscription, error = %e, "pull failed");
                    self.set_phase(Phase::Idle);
                    self.idle().await;
                }
            }
        }

        self.set_phase(Phase::Idle);
        info!(
            subscription = %self.subscription,
            forwarded = self.stats.forwarded,
            dropped = self.stats.dropped,
            retained = self.stats.retained,
            ack_failures = self.stats.ack_failures,
            "relay stopped"
        );
        Ok(self.stats)
    }

    /// Decodes, forwards and, when appropriate, acknowledges one message.
    pub async fn on_message(&mut self, pulled: PulledMessage) -> Disposition {
        self.set_phase(Phase::Processing);
        let PulledMessage { ack_id, message } = pulled;
        let message_id = message.message_id.clone();

        let decoded = RelayMessage::try_from(message)
            .and_then(|msg| msg.decode_json().map(|payload| (msg, payload)));
        let (msg, payload) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    subscription = %self.subscription,
                    error = %e,
                    "dropping undecodable message"
                );
                self.ack(&ack_id, &message_id).await;
                self.stats.dropped += 1;
                self.set_phase(Phase::Idle);
                return Disposition::Dropped;
            }
        };
        trace!(message_id = %message_id, payload = %payload, "decoded message");

        let disposition = match build_body(self.wire_format, &msg, payload, &self.source) {
            Ok(body) => match self.forwarder.forward(&body).await {
                Ok(status) => {
                    self.ack(&ack_id, &message_id).await;
                    info!(
                        message_id = %message_id,
                        subscription = %self.subscription,
                        status,
                        "message forwarded"
                    );
                    self.stats.forwarded += 1;
                    Disposition::Forwarded
                }
                Err(e) => {
                    warn!(
                        message_id = %message_id,
                        subscription = %self.subscription,
                        status = ?e.status(),
                        error = %e,
                        "forward failed, message left for redelivery"
                    );
                    self.stats.retained += 1;
                    Disposition::Retained
                }
            },
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    subscription = %self.subscription,
                    error = %e,
                    "could not build request body, message left for redelivery"
                );
                self.stats.retained += 1;
                Disposition::Retained
            }
        };

        self.set_phase(Phase::Idle);
        disposition
    }

    async fn ack(&mut self, ack_id: &str, message_id: &str) {
        self.set_phase(Phase::Acking);
        if let Err(e) = self
            .client
            .acknowledge(&self.subscription, &[ack_id.to_string()])
            .await
        {
            // the broker will redeliver; the endpoint sees the message again
            error!(
                message_id = %message_id,
                subscription = %self.subscription,
                status = ?e.status(),
                error = %e,
                "acknowledge failed"
            );
            self.stats.ack_failures += 1;
        }
    }

    /// Waits one poll interval, or less if the bridge is stopped meanwhile.
    async fn idle(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            trace!(from = ?*current, to = ?phase, "phase");
            *current = phase;
            true
        });
    }
}
