use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::client::connection::Connection;
use crate::config::{validate_addr, ClientConfig};
use crate::core::error::{Error, Result};
use crate::core::protocol::{validate_topic_name, Command, Frame};
use crate::core::publisher::Producer;

/// Publishes to a single nsqd over TCP.
///
/// The connection is opened on the first publish and reopened after a
/// failed one.
pub struct NsqProducer {
    addr: String,
    config: ClientConfig,
    conn: Option<Connection>,
    stopped: bool,
}

impl NsqProducer {
    /// Build a producer for the nsqd at `addr` (`host:port`). No I/O happens
    /// here; a malformed address or config is rejected up front.
    pub fn new(addr: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let addr = addr.into();
        validate_addr(&addr)?;
        config.validate()?;

        Ok(Self {
            addr,
            config,
            conn: None,
            stopped: false,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Make sure a connection is up, without publishing anything.
    pub async fn ping(&mut self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&mut self) -> Result<&mut Connection> {
        if self.stopped {
            return Err(Error::Stopped);
        }

        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                info!(addr = %self.addr, "connecting to nsqd");
                Connection::connect(&self.addr, &self.config, false).await?
            }
        };
        Ok(self.conn.insert(conn))
    }

    async fn publish_once(&mut self, topic: &str, body: &[u8]) -> Result<()> {
        let conn = self.connection().await?;
        conn.send(&Command::Pub { topic, body }).await?;

        match conn.read_response().await? {
            frame if frame.is_ok() => Ok(()),
            Frame::Error(data) => Err(Error::Publish(
                String::from_utf8_lossy(&data).into_owned(),
            )),
            other => Err(Error::Protocol(format!(
                "unexpected reply to PUB from {}: {other:?}",
                conn.addr()
            ))),
        }
    }
}

#[async_trait]
impl Producer for NsqProducer {
    async fn publish(&mut self, topic: &str, body: Bytes) -> Result<()> {
        validate_topic_name(topic)?;

        match self.publish_once(topic, &body).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // nsqd closes the connection after a failed PUB; start fresh next time
                if self.conn.take().is_some() {
                    debug!(addr = %self.addr, "dropped connection after failed publish");
                }
                Err(match err {
                    Error::Io(e) => Error::Publish(e.to_string()),
                    Error::Protocol(msg) => Error::Publish(msg),
                    other => other,
                })
            }
        }
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if self.conn.take().is_some() {
            info!(addr = %self.addr, "closed connection to nsqd");
        }
    }
}
