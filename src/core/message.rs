use bytes::{Buf, Bytes};
use std::fmt;

use crate::core::error::{Error, Result};

/// 8-byte timestamp + 2-byte attempts + 16-byte id.
const MESSAGE_HEADER_LEN: usize = 8 + 2 + 16;

/// The 16-byte ASCII id nsqd assigns to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; 16]);

impl MessageId {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for MessageId {
    fn from(raw: [u8; 16]) -> Self {
        MessageId(raw)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// A message delivered by nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Nanoseconds since the unix epoch, as stamped by nsqd.
    pub timestamp: i64,
    /// Delivery count, starting at 1.
    pub attempts: u16,
    pub body: Bytes,
}

impl Message {
    /// Build a message by hand, e.g. for feeding a handler in tests.
    pub fn new(id: MessageId, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            timestamp: 0,
            attempts: 1,
            body: body.into(),
        }
    }

    /// Decode the data section of a message frame.
    pub fn decode(mut data: Bytes) -> Result<Self> {
        if data.len() < MESSAGE_HEADER_LEN {
            return Err(Error::Protocol(format!(
                "message frame of {} bytes is shorter than its {MESSAGE_HEADER_LEN}-byte header",
                data.len()
            )));
        }

        let timestamp = data.get_i64();
        let attempts = data.get_u16();
        let mut id = [0u8; 16];
        data.copy_to_slice(&mut id);

        Ok(Self {
            id: MessageId(id),
            timestamp,
            attempts,
            body: data,
        })
    }
}
