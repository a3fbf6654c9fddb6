pub mod error;
pub mod graceful_shutdown;
pub mod message;
pub mod protocol;
pub mod publisher;
pub mod subscriber;
