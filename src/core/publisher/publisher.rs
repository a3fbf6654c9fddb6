use std::future::Future;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

use crate::core::error::{Error, Result};

/// Printed before every line read from the input.
pub const PROMPT: &[u8] = b"message: ";

/// Anything that can publish message bodies to a topic.
#[async_trait]
pub trait Producer: Send {
    /// Publish one message body to `topic`.
    async fn publish(&mut self, topic: &str, body: Bytes) -> Result<()>;

    /// Close the underlying connection. Must be idempotent.
    fn stop(&mut self);
}

/// Owns a producer for one publish run and stops it when dropped, so every
/// exit path (error, interrupt, panic) closes the connection exactly once.
pub struct ProducerGuard<P: Producer> {
    producer: P,
}

impl<P: Producer> ProducerGuard<P> {
    pub fn new(producer: P) -> Self {
        Self { producer }
    }
}

impl<P: Producer> Drop for ProducerGuard<P> {
    fn drop(&mut self) {
        self.producer.stop();
    }
}

/// Read lines from `input` and publish each one to `topic` until input ends,
/// a publish fails, or `shutdown` resolves.
///
/// Each line is published as read, trailing newline included. End of input
/// and publish failures are returned as errors; `shutdown` is a clean exit.
/// The producer is stopped exactly once on the way out.
pub async fn run_publisher<P, R, W, S>(
    producer: P,
    topic: &str,
    input: R,
    prompt: W,
    shutdown: S,
) -> Result<()>
where
    P: Producer,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut guard = ProducerGuard::new(producer);

    tokio::select! {
        err = publish_lines(&mut guard.producer, topic, input, prompt) => {
            error!("failed to publish message with an error: {err}");
            Err(err)
        }
        _ = shutdown => {
            info!(topic, "interrupted, stopping publisher");
            Ok(())
        }
    }
}

// Only ever returns by failing; the happy path is "forever".
async fn publish_lines<P, R, W>(producer: &mut P, topic: &str, mut input: R, mut prompt: W) -> Error
where
    P: Producer,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        if let Err(e) = write_prompt(&mut prompt).await {
            error!("failed to write prompt with an error: {e}");
            return Error::Io(e);
        }

        let mut line = Vec::new();
        match input.read_until(b'\n', &mut line).await {
            Ok(_) if line.ends_with(b"\n") => {}
            Ok(_) => {
                if !line.is_empty() {
                    debug!(bytes = line.len(), "dropping unterminated final line");
                }
                let err = io::Error::new(io::ErrorKind::UnexpectedEof, "end of input");
                error!("failed to read input with an error: {err}");
                return Error::Io(err);
            }
            Err(e) => {
                error!("failed to read input with an error: {e}");
                return Error::Io(e);
            }
        }

        let body = Bytes::from(line);
        if let Err(e) = producer.publish(topic, body.clone()).await {
            error!(
                "failed to publish message {:?} with an error: {e}",
                String::from_utf8_lossy(&body)
            );
            return e;
        }
        debug!(topic, bytes = body.len(), "published");
    }
}

async fn write_prompt<W: AsyncWrite + Unpin>(prompt: &mut W) -> io::Result<()> {
    prompt.write_all(PROMPT).await?;
    prompt.flush().await
}
