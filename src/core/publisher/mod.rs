//! Publisher flow: stdin lines in, NSQ messages out.
#[allow(clippy::module_inception)]
pub mod publisher;

pub use publisher::{run_publisher, Producer, ProducerGuard, PROMPT};
