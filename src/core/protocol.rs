//! NSQ TCP protocol (`  V2`) framing.
//!
//! Client → server commands are newline-terminated text lines, optionally
//! followed by a 4-byte big-endian size and a binary body:
//!
//! ```text
//! PUB <topic>\n[ 4-byte size ][ N-byte body ]
//! ```
//!
//! Server → client frames are size-prefixed:
//!
//! ```text
//! [ 4-byte size ][ 4-byte frame type ][ size - 4 bytes of data ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::core::error::{Error, Result};
use crate::core::message::MessageId;

/// Sent once, right after the TCP connect.
pub const MAGIC_V2: &[u8; 4] = b"  V2";

pub const HEARTBEAT: &[u8] = b"_heartbeat_";
pub const OK: &[u8] = b"OK";
pub const CLOSE_WAIT: &[u8] = b"CLOSE_WAIT";

/// Largest frame we are willing to buffer. nsqd's default `--max-msg-size`
/// is 1 MiB, so this leaves plenty of headroom.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const MAX_NAME_LEN: usize = 64;
const EPHEMERAL_SUFFIX: &str = "#ephemeral";

const FRAME_TYPE_RESPONSE: i32 = 0;
const FRAME_TYPE_ERROR: i32 = 1;
const FRAME_TYPE_MESSAGE: i32 = 2;

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(Bytes),
}

impl Frame {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == HEARTBEAT)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == OK)
    }
}

/// Body of the `IDENTIFY` command.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyBody {
    pub client_id: String,
    pub hostname: String,
    pub user_agent: String,
    /// Milliseconds; -1 disables heartbeats.
    pub heartbeat_interval: i64,
    pub feature_negotiation: bool,
}

/// Client → server commands.
#[derive(Debug)]
pub enum Command<'a> {
    Identify(&'a IdentifyBody),
    Sub { topic: &'a str, channel: &'a str },
    Pub { topic: &'a str, body: &'a [u8] },
    Rdy(u32),
    Fin(&'a MessageId),
    Req { id: &'a MessageId, delay_ms: u64 },
    Nop,
    Cls,
}

impl Command<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Identify(_) => "IDENTIFY",
            Command::Sub { .. } => "SUB",
            Command::Pub { .. } => "PUB",
            Command::Rdy(_) => "RDY",
            Command::Fin(_) => "FIN",
            Command::Req { .. } => "REQ",
            Command::Nop => "NOP",
            Command::Cls => "CLS",
        }
    }
}

/// Append the wire form of `cmd` to `buf`.
pub fn encode_command(cmd: &Command<'_>, buf: &mut BytesMut) -> Result<()> {
    match cmd {
        Command::Identify(body) => {
            let json = serde_json::to_vec(body)
                .map_err(|e| Error::Protocol(format!("failed to encode IDENTIFY: {e}")))?;
            buf.put_slice(b"IDENTIFY\n");
            put_sized(buf, &json)?;
        }
        Command::Sub { topic, channel } => {
            buf.put_slice(format!("SUB {topic} {channel}\n").as_bytes());
        }
        Command::Pub { topic, body } => {
            buf.put_slice(format!("PUB {topic}\n").as_bytes());
            put_sized(buf, body)?;
        }
        Command::Rdy(count) => {
            buf.put_slice(format!("RDY {count}\n").as_bytes());
        }
        Command::Fin(id) => {
            buf.put_slice(b"FIN ");
            buf.put_slice(id.as_bytes());
            buf.put_u8(b'\n');
        }
        Command::Req { id, delay_ms } => {
            buf.put_slice(b"REQ ");
            buf.put_slice(id.as_bytes());
            buf.put_slice(format!(" {delay_ms}\n").as_bytes());
        }
        Command::Nop => buf.put_slice(b"NOP\n"),
        Command::Cls => buf.put_slice(b"CLS\n"),
    }
    Ok(())
}

fn put_sized(buf: &mut BytesMut, body: &[u8]) -> Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| Error::Protocol(format!("body too large: {} bytes", body.len())))?;
    buf.reserve(4 + body.len());
    buf.put_u32(len);
    buf.put_slice(body);
    Ok(())
}

/// Try to split one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; `buf` is left untouched in
/// that case, so this is safe to call after every partial read.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if size < 4 {
        return Err(Error::Protocol(format!("frame size {size} is too small")));
    }
    if size > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "frame size {size} exceeds limit of {MAX_FRAME_SIZE}"
        )));
    }
    if buf.len() < 4 + size {
        buf.reserve(4 + size - buf.len());
        return Ok(None);
    }

    buf.advance(4);
    let frame_type = buf.get_i32();
    let data = buf.split_to(size - 4).freeze();

    match frame_type {
        FRAME_TYPE_RESPONSE => Ok(Some(Frame::Response(data))),
        FRAME_TYPE_ERROR => Ok(Some(Frame::Error(data))),
        FRAME_TYPE_MESSAGE => Ok(Some(Frame::Message(data))),
        other => Err(Error::Protocol(format!("unknown frame type {other}"))),
    }
}

/// Check a topic name against nsqd's naming rules.
pub fn validate_topic_name(name: &str) -> Result<()> {
    validate_name("topic", name)
}

/// Check a channel name against nsqd's naming rules.
pub fn validate_channel_name(name: &str) -> Result<()> {
    validate_name("channel", name)
}

// 1..=64 chars of [.a-zA-Z0-9_-], optionally ending in "#ephemeral"
fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::Configuration(format!(
            "{kind} name {name:?} must be 1-{MAX_NAME_LEN} characters"
        )));
    }

    let stem = name.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(name);
    let valid = !stem.is_empty()
        && stem
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));

    if valid {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "{kind} name {name:?} contains invalid characters"
        )))
    }
}
