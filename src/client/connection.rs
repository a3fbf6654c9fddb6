use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::core::error::{Error, Result};
use crate::core::protocol::{
    encode_command, try_decode_frame, Command, Frame, IdentifyBody, MAGIC_V2,
};

const INITIAL_BUFFER_SIZE: usize = 8 * 1024;

/// One TCP connection to an nsqd, past the `IDENTIFY` handshake.
pub struct Connection {
    addr: String,
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Connection {
    /// Dial `addr`, send the protocol magic and identify ourselves.
    ///
    /// With `heartbeats` off, nsqd neither sends heartbeats nor times the
    /// connection out.
    pub async fn connect(addr: &str, config: &ClientConfig, heartbeats: bool) -> Result<Self> {
        let stream = timeout(config.dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "dial {addr} timed out after {:?}",
                    config.dial_timeout
                ))
            })?
            .map_err(|e| Error::Connection(format!("dial {addr}: {e}")))?;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            addr: addr.to_string(),
            stream,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        };

        conn.write_raw(MAGIC_V2).await?;

        let identify = IdentifyBody {
            client_id: config.client_id.clone(),
            hostname: config.hostname.clone(),
            user_agent: config.user_agent.clone(),
            heartbeat_interval: if heartbeats {
                i64::try_from(config.heartbeat_interval.as_millis()).unwrap_or(i64::MAX)
            } else {
                -1
            },
            feature_negotiation: false,
        };
        conn.send(&Command::Identify(&identify)).await?;

        match conn.read_response().await? {
            frame if frame.is_ok() => {}
            Frame::Error(data) => {
                return Err(Error::Connection(format!(
                    "IDENTIFY rejected by {addr}: {}",
                    String::from_utf8_lossy(&data)
                )));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected reply to IDENTIFY from {addr}: {other:?}"
                )));
            }
        }

        debug!(%addr, "connected to nsqd");
        Ok(conn)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Encode and write one command.
    pub async fn send(&mut self, cmd: &Command<'_>) -> Result<()> {
        self.write_buf.clear();
        encode_command(cmd, &mut self.write_buf)?;
        trace!(addr = %self.addr, command = cmd.name(), "send");

        let buf = self.write_buf.split().freeze();
        self.write_raw(&buf).await
    }

    /// Read the next frame. Cancel safe: partially received frames stay buffered.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = try_decode_frame(&mut self.read_buf)? {
                return Ok(frame);
            }

            let n = timeout(self.read_timeout, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| timed_out(&self.addr, "read from", self.read_timeout))??;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} closed the connection", self.addr),
                )));
            }
        }
    }

    /// Read the next frame that is not a heartbeat, answering heartbeats
    /// with `NOP` along the way.
    pub async fn read_response(&mut self) -> Result<Frame> {
        loop {
            let frame = self.read_frame().await?;
            if frame.is_heartbeat() {
                trace!(addr = %self.addr, "heartbeat");
                self.send(&Command::Nop).await?;
                continue;
            }
            return Ok(frame);
        }
    }

    async fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        timeout(self.write_timeout, self.stream.write_all(buf))
            .await
            .map_err(|_| timed_out(&self.addr, "write to", self.write_timeout))??;
        Ok(())
    }
}

fn timed_out(addr: &str, op: &str, after: Duration) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{op} {addr} timed out after {after:?}"),
    ))
}
