//! CLI for pubsub-relay
//!
//! Subcommands:
//! - `run`: relay messages from the emulator to a local function
//! - `setup`: create the topic and subscription if they are missing
//! - `publish`: publish a test message to the configured topic
//! - `receive`: pull one message from a subscription and print it

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use pubsub_relay::bridge::RelayBridge;
use pubsub_relay::config::{Overrides, WireFormat, load_broker_settings, load_config_with};
use pubsub_relay::pubsub::{EmulatorClient, RelayMessage};
use pubsub_relay::utils::{RelayError, Result, logging};

#[derive(Parser)]
#[command(name = "pubsub-relay", version)]
enum Command {
    /// Relay messages until interrupted
    Run {
        /// Topic to drain; the subscription is `<topic>-sub`
        #[arg(long)]
        topic: Option<String>,
        /// Port of the local function
        #[arg(long)]
        port: Option<u16>,
        /// cloudevent-envelope or flat-json
        #[arg(long)]
        wire_format: Option<WireFormat>,
    },
    /// Create the topic and the relay subscription
    Setup {
        #[arg(long)]
        topic: Option<String>,
    },
    /// Publish a JSON message to the topic
    Publish {
        #[arg(long)]
        topic: Option<String>,
        /// Message body, must be valid JSON
        #[arg(long)]
        data: String,
        /// Message attribute as key=value, repeatable
        #[arg(long = "attribute", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
    },
    /// Pull one message and print it, for checking what a topic carries
    Receive {
        #[arg(long)]
        topic: Option<String>,
        /// Subscription to pull from, defaults to `<topic>-sub`
        #[arg(long)]
        subscription: Option<String>,
        /// Give up after this many seconds without a message
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
        /// Acknowledge the message instead of letting it be redelivered
        #[arg(long)]
        ack: bool,
    },
}

fn parse_attribute(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid attribute '{s}', expected key=value"))?;
    if key.is_empty() {
        return Err(format!("invalid attribute '{s}', empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    logging::init("info");

    let result = match Command::parse() {
        Command::Run {
            topic,
            port,
            wire_format,
        } => {
            run_relay(Overrides {
                topic,
                port,
                wire_format,
            })
            .await
        }
        Command::Setup { topic } => run_setup(topic).await,
        Command::Publish {
            topic,
            data,
            attributes,
        } => run_publish(topic, data, attributes).await,
        Command::Receive {
            topic,
            subscription,
            timeout_secs,
            ack,
        } => run_receive(topic, subscription, Duration::from_secs(timeout_secs), ack).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_relay(overrides: Overrides) -> Result<()> {
    let settings = load_config_with(&overrides)?;
    let mut bridge = RelayBridge::new(&settings)?;

    let stop = bridge.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received. Stopping relay.");
            stop.stop();
        }
    });

    bridge.run().await?;
    Ok(())
}

async fn run_setup(topic: Option<String>) -> Result<()> {
    let broker = load_broker_settings(&Overrides {
        topic,
        ..Default::default()
    })?;
    let client = EmulatorClient::from_settings(&broker)?;

    let topic = client.create_or_get_topic(&broker.topic).await?;
    info!(topic = %broker.topic_path(), outcome = topic.as_str(), "topic ready");

    let subscription = client
        .create_or_get_subscription(
            &broker.subscription(),
            &broker.topic,
            broker.ack_deadline_secs,
        )
        .await?;
    info!(
        subscription = %broker.subscription_path(),
        outcome = subscription.as_str(),
        "subscription ready"
    );
    Ok(())
}

async fn run_publish(
    topic: Option<String>,
    data: String,
    attributes: Vec<(String, String)>,
) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(&data)
        .map_err(|e| RelayError::Decode(format!("--data is not valid JSON: {e}")))?;

    let broker = load_broker_settings(&Overrides {
        topic,
        ..Default::default()
    })?;
    let client = EmulatorClient::from_settings(&broker)?;
    let message_id = client
        .publish(&broker.topic, data.as_bytes(), attributes.into_iter().collect())
        .await?;
    info!(topic = %broker.topic_path(), message_id = %message_id, "published");
    Ok(())
}

async fn run_receive(
    topic: Option<String>,
    subscription: Option<String>,
    timeout: Duration,
    ack: bool,
) -> Result<()> {
    let broker = load_broker_settings(&Overrides {
        topic,
        ..Default::default()
    })?;
    let subscription = subscription.unwrap_or_else(|| broker.subscription());
    let client = EmulatorClient::from_settings(&broker)?;

    let poll = Duration::from_millis(broker.poll_interval_ms);
    let Some(pulled) = client.receive(&subscription, timeout, poll, ack).await? else {
        info!(subscription = %subscription, "no message within {}s", timeout.as_secs());
        return Ok(());
    };

    let message = RelayMessage::try_from(pulled.message)?;
    info!(
        subscription = %subscription,
        message_id = %message.message_id,
        acked = ack,
        "received"
    );
    for (key, value) in &message.attributes {
        println!("{key}={value}");
    }
    println!("{}", String::from_utf8_lossy(&message.payload));
    Ok(())
}
