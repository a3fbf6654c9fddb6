//! Minimal NSQ client: a producer that publishes to one nsqd, and a consumer
//! that discovers nsqd nodes through nsqlookupd.

pub mod connection;
pub mod consumer;
pub mod lookup;
pub mod producer;

pub use consumer::NsqConsumer;
pub use producer::NsqProducer;
