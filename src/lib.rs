//! nsq-pubsub – publish stdin lines to an NSQ topic, or print the messages
//! arriving on a topic/channel.
//!
//! This crate exports
//!  * `core`    – wire codec, message type, and the publish/subscribe flows
//!  * `client`  – NSQ producer/consumer over TCP, nsqlookupd queries
//!  * `config`  – command and client settings
//!  * `cli`     – clap command definitions shared with the binary
//!
//! The flows only talk to the client through the [`Producer`] and
//! [`Consumer`] traits, so they can be driven by test doubles.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod cli;
pub mod client;
pub mod config;
pub mod core;
pub mod logging;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use client::{NsqConsumer, NsqProducer};
pub use config::{ClientConfig, PublisherConfig, SubscriberConfig};
pub use crate::core::error::{Error, Result};
pub use crate::core::message::{Message, MessageId};
pub use crate::core::publisher::{run_publisher, Producer};
pub use crate::core::subscriber::{run_subscriber, Consumer, MessageHandler, PrintHandler};
