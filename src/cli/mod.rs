//! `publish` / `subscribe` command definitions and dispatch.

use clap::{Args, Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{error, info};

use crate::client::{NsqConsumer, NsqProducer};
use crate::config::{
    ClientConfig, PublisherConfig, SubscriberConfig, DEFAULT_HOST, DEFAULT_PUBLISH_PORT,
    DEFAULT_SUBSCRIBE_PORT,
};
use crate::core::error::{Error, Result};
use crate::core::graceful_shutdown::shutdown_signal;
use crate::core::publisher::run_publisher;
use crate::core::subscriber::{run_subscriber, PrintHandler};

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(name = "nsq-pubsub", version, about = "NSQ Simple Publish and Subscribe")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Publish message(s) to given topic
    Publish(PublishArgs),
    /// Subscribe message(s) to given topic
    Subscribe(SubscribeArgs),
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Publisher host (nsqd)
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Publisher port (nsqd TCP)
    #[arg(long, default_value_t = DEFAULT_PUBLISH_PORT)]
    pub port: u16,

    /// Topic
    #[arg(long)]
    pub topic: String,
}

#[derive(Debug, Args)]
pub struct SubscribeArgs {
    /// Subscriber host (nsqlookupd)
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Subscriber port (nsqlookupd HTTP)
    #[arg(long, default_value_t = DEFAULT_SUBSCRIBE_PORT)]
    pub port: u16,

    /// Topic
    #[arg(long)]
    pub topic: String,

    /// Channel
    #[arg(long)]
    pub channel: String,
}

impl TryFrom<PublishArgs> for PublisherConfig {
    type Error = Error;

    fn try_from(args: PublishArgs) -> Result<Self> {
        Ok(Self {
            host: non_blank("host", args.host)?,
            port: args.port,
            topic: non_blank("topic", args.topic)?,
        })
    }
}

impl TryFrom<SubscribeArgs> for SubscriberConfig {
    type Error = Error;

    fn try_from(args: SubscribeArgs) -> Result<Self> {
        Ok(Self {
            host: non_blank("host", args.host)?,
            port: args.port,
            topic: non_blank("topic", args.topic)?,
            channel: non_blank("channel", args.channel)?,
        })
    }
}

// clap only checks presence; `--topic ""` still has to be refused
fn non_blank(flag: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::Flag(format!("--{flag} must not be empty")));
    }
    Ok(value)
}

impl Cli {
    /// Run the selected subcommand to completion.
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Publish(args) => publish(PublisherConfig::try_from(args)?).await?,
            Command::Subscribe(args) => subscribe(SubscriberConfig::try_from(args)?).await?,
        }
        Ok(())
    }
}

/// Publish stdin lines to `config.topic` until end of input, failure or Ctrl+C.
pub async fn publish(config: PublisherConfig) -> Result<()> {
    let producer = NsqProducer::new(config.addr(), ClientConfig::default()).map_err(|e| {
        error!("failed to create new publisher with an error: {e}");
        e
    })?;
    info!(nsqd = %producer.addr(), topic = %config.topic, "publishing lines from stdin");

    run_publisher(
        producer,
        &config.topic,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown_signal(),
    )
    .await
}

/// Print messages from `config.topic`/`config.channel` until Ctrl+C.
pub async fn subscribe(config: SubscriberConfig) -> Result<()> {
    let mut consumer = NsqConsumer::new(
        config.topic.as_str(),
        config.channel.as_str(),
        ClientConfig::default(),
    )
    .map_err(|e| {
        error!("failed to create new subscriber with an error: {e}");
        e
    })?;
    consumer.add_handler(PrintHandler::stdout());

    run_subscriber(consumer, &config.lookupd_addr(), shutdown_signal()).await
}
