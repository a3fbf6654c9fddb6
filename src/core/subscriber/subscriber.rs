use std::future::Future;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::core::error::Result;
use crate::core::message::Message;

/// Callback invoked for every message a consumer receives.
///
/// `Ok` finishes the message; `Err` asks the broker to requeue it.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle_message(&self, message: &Message) -> anyhow::Result<()>;
}

/// Anything that can subscribe through an nsqlookupd and be stopped.
#[async_trait]
pub trait Consumer: Send {
    /// Discover nsqd nodes for the topic via nsqlookupd at `addr` and start
    /// consuming from them.
    async fn connect_to_lookupd(&mut self, addr: &str) -> Result<()>;

    /// Close every connection. Must be idempotent.
    async fn stop(&mut self);
}

/// Writes each non-empty message body to `out` as one line.
///
/// Never fails: a body that cannot be written is logged and still finished,
/// so nothing is requeued because of it.
pub struct PrintHandler<W = io::Stdout> {
    out: Mutex<W>,
}

impl PrintHandler<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> PrintHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<W: Write + Send + 'static> MessageHandler for PrintHandler<W> {
    async fn handle_message(&self, message: &Message) -> anyhow::Result<()> {
        if message.body.is_empty() {
            return Ok(());
        }

        debug!(id = %message.id, attempts = message.attempts, "received message");

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let written = write_line(&mut *out, &message.body);

        if let Err(e) = written {
            warn!("failed to print message {} with an error: {e}", message.id);
        }
        Ok(())
    }
}

fn write_line<W: Write + ?Sized>(out: &mut W, body: &[u8]) -> io::Result<()> {
    out.write_all(body)?;
    if !body.ends_with(b"\n") {
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Connect `consumer` to the nsqlookupd at `lookupd_addr`, then block until
/// `shutdown` resolves. The consumer is stopped once on every exit path.
pub async fn run_subscriber<C, S>(mut consumer: C, lookupd_addr: &str, shutdown: S) -> Result<()>
where
    C: Consumer,
    S: Future<Output = ()>,
{
    if let Err(e) = consumer.connect_to_lookupd(lookupd_addr).await {
        error!("failed to connect to {lookupd_addr} with an error: {e}");
        consumer.stop().await;
        return Err(e);
    }

    info!(lookupd = lookupd_addr, "subscribed, waiting for messages");
    shutdown.await;

    info!("interrupted, stopping subscriber");
    consumer.stop().await;
    Ok(())
}
