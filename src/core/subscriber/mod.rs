//! Subscriber flow: NSQ messages in, lines on stdout out.

#[allow(clippy::module_inception)]
pub mod subscriber;

pub use subscriber::{run_subscriber, Consumer, MessageHandler, PrintHandler};
