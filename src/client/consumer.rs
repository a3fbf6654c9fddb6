use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::connection::Connection;
use crate::client::lookup;
use crate::config::{validate_addr, ClientConfig};
use crate::core::error::{Error, Result};
use crate::core::message::Message;
use crate::core::protocol::{
    validate_channel_name, validate_topic_name, Command, Frame, CLOSE_WAIT,
};
use crate::core::subscriber::{Consumer, MessageHandler};

/// How long `stop` waits for connection tasks to wind down.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Consumes one topic/channel from every nsqd that carries it.
///
/// nsqd nodes are found through nsqlookupd ([`Consumer::connect_to_lookupd`])
/// or given directly ([`NsqConsumer::connect_to_nsqd`]). Each node gets its
/// own task; a lookupd poll task picks up nodes that appear later.
pub struct NsqConsumer {
    topic: String,
    channel: String,
    config: Arc<ClientConfig>,
    handler: Option<Arc<dyn MessageHandler>>,
    http: reqwest::Client,
    lookupd_addrs: Vec<String>,
    connected: Arc<Mutex<HashSet<String>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    // every task holds a clone; `recv` yields `None` once all of them exit
    done_tx: Option<mpsc::Sender<()>>,
    done_rx: mpsc::Receiver<()>,
    stopped: bool,
}

impl NsqConsumer {
    /// Validate names and config. No I/O happens until a connect call.
    pub fn new(
        topic: impl Into<String>,
        channel: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self> {
        let topic = topic.into();
        let channel = channel.into();
        validate_topic_name(&topic)?;
        validate_channel_name(&channel)?;
        config.validate()?;

        let http = reqwest::Client::builder()
            .connect_timeout(config.dial_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel(1);

        Ok(Self {
            topic,
            channel,
            config: Arc::new(config),
            handler: None,
            http,
            lookupd_addrs: Vec::new(),
            connected: Arc::new(Mutex::new(HashSet::new())),
            shutdown_tx,
            shutdown_rx,
            done_tx: Some(done_tx),
            done_rx,
            stopped: false,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Register the handler every message is passed to. Must happen before
    /// connecting; a later call replaces it for connections made afterwards.
    pub fn add_handler<H: MessageHandler>(&mut self, handler: H) {
        self.handler = Some(Arc::new(handler));
    }

    /// nsqd addresses with a live connection.
    pub fn connected_nsqds(&self) -> Vec<String> {
        let connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);
        let mut addrs: Vec<String> = connected.iter().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Subscribe on the nsqd at `addr` directly, bypassing nsqlookupd.
    ///
    /// Unlike nodes found through lookup, a failure here is returned.
    pub async fn connect_to_nsqd(&mut self, addr: &str) -> Result<()> {
        validate_addr(addr)?;
        let worker = self.worker()?;

        if !worker.claim(addr) {
            return Err(Error::Configuration(format!("already connected to nsqd {addr}")));
        }

        match worker.subscribe(addr).await {
            Ok(conn) => {
                tokio::spawn(worker.run(conn));
                Ok(())
            }
            Err(e) => {
                worker.release(addr);
                Err(e)
            }
        }
    }

    fn worker(&self) -> Result<Worker> {
        if self.stopped {
            return Err(Error::Stopped);
        }
        let done = self.done_tx.clone().ok_or(Error::Stopped)?;
        let handler = self.handler.clone().ok_or_else(|| {
            Error::Configuration("no message handler registered".to_string())
        })?;

        Ok(Worker {
            topic: self.topic.clone(),
            channel: self.channel.clone(),
            config: Arc::clone(&self.config),
            handler,
            connected: Arc::clone(&self.connected),
            shutdown: self.shutdown_rx.clone(),
            _done: done,
        })
    }
}

#[async_trait]
impl Consumer for NsqConsumer {
    async fn connect_to_lookupd(&mut self, addr: &str) -> Result<()> {
        if !addr.contains("://") {
            validate_addr(addr)?;
        }
        let worker = self.worker()?;

        if self.lookupd_addrs.iter().any(|a| a == addr) {
            debug!(lookupd = %addr, "already polling nsqlookupd");
            return Ok(());
        }

        let producers = lookup::query(&self.http, addr, &self.topic).await?;
        self.lookupd_addrs.push(addr.to_string());

        if producers.is_empty() {
            info!(
                topic = %self.topic,
                "no nsqd carries the topic yet, polling every {:?}",
                self.config.lookupd_poll_interval
            );
        }
        for nsqd in producers {
            worker.spawn_nsqd(nsqd);
        }

        tokio::spawn(worker.poll_lookupd(self.http.clone(), addr.to_string()));
        Ok(())
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!(topic = %self.topic, channel = %self.channel, "stopping consumer");

        let _ = self.shutdown_tx.send(true);
        self.done_tx.take();

        match timeout(STOP_GRACE, self.done_rx.recv()).await {
            Ok(_) => debug!("all consumer connections closed"),
            Err(_) => warn!("consumer connections still open after {STOP_GRACE:?}, giving up"),
        }
    }
}

/// Everything a connection or poll task needs, detached from the consumer.
#[derive(Clone)]
struct Worker {
    topic: String,
    channel: String,
    config: Arc<ClientConfig>,
    handler: Arc<dyn MessageHandler>,
    connected: Arc<Mutex<HashSet<String>>>,
    shutdown: watch::Receiver<bool>,
    _done: mpsc::Sender<()>,
}

impl Worker {
    /// Mark `addr` as connected; false if it already was.
    fn claim(&self, addr: &str) -> bool {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr.to_string())
    }

    fn release(&self, addr: &str) {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(addr);
    }

    /// Connect to a discovered nsqd in the background. Failures are logged;
    /// the next lookupd poll retries.
    fn spawn_nsqd(&self, addr: String) {
        if !self.claim(&addr) {
            return;
        }

        let worker = self.clone();
        tokio::spawn(async move {
            match worker.subscribe(&addr).await {
                Ok(conn) => worker.run(conn).await,
                Err(e) => {
                    error!("failed to connect to nsqd {addr} with an error: {e}");
                    worker.release(&addr);
                }
            }
        });
    }

    /// Handshake, `SUB` and the initial `RDY`.
    async fn subscribe(&self, addr: &str) -> Result<Connection> {
        let mut conn = Connection::connect(addr, &self.config, true).await?;

        conn.send(&Command::Sub {
            topic: &self.topic,
            channel: &self.channel,
        })
        .await?;

        match conn.read_response().await? {
            frame if frame.is_ok() => {}
            Frame::Error(data) => {
                return Err(Error::Connection(format!(
                    "SUB rejected by {addr}: {}",
                    String::from_utf8_lossy(&data)
                )));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected reply to SUB from {addr}: {other:?}"
                )));
            }
        }

        conn.send(&Command::Rdy(self.config.max_in_flight)).await?;
        info!(nsqd = %addr, topic = %self.topic, channel = %self.channel, "subscribed");
        Ok(conn)
    }

    /// Drive one subscribed connection until it closes or shutdown is signalled.
    async fn run(self, mut conn: Connection) {
        let addr = conn.addr().to_string();
        match self.read_loop(&mut conn).await {
            Ok(()) => info!(nsqd = %addr, "connection closed"),
            Err(e) => error!("connection to nsqd {addr} failed with an error: {e}"),
        }
        self.release(&addr);
    }

    async fn read_loop(&self, conn: &mut Connection) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                frame = conn.read_frame() => {
                    match frame? {
                        frame if frame.is_heartbeat() => conn.send(&Command::Nop).await?,
                        Frame::Message(data) => {
                            let message = Message::decode(data)?;
                            self.dispatch(conn, message).await?;
                        }
                        Frame::Response(data) if data.as_ref() == CLOSE_WAIT => return Ok(()),
                        Frame::Response(data) => {
                            debug!(nsqd = %conn.addr(), "response: {}", String::from_utf8_lossy(&data));
                        }
                        Frame::Error(data) => {
                            warn!(nsqd = %conn.addr(), "nsqd reported an error: {}", String::from_utf8_lossy(&data));
                        }
                    }
                }
                _ = shutdown.changed() => {
                    // in-flight messages are requeued by nsqd once we're gone
                    if let Err(e) = conn.send(&Command::Cls).await {
                        debug!(nsqd = %conn.addr(), "CLS not delivered: {e}");
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Run the handler and acknowledge: `FIN` on success, `REQ` on failure.
    async fn dispatch(&self, conn: &mut Connection, message: Message) -> Result<()> {
        if message.attempts > self.config.max_attempts {
            warn!(
                id = %message.id,
                attempts = message.attempts,
                "message exceeded {} attempts, finishing without handling",
                self.config.max_attempts
            );
            return conn.send(&Command::Fin(&message.id)).await;
        }

        match self.handler.handle_message(&message).await {
            Ok(()) => conn.send(&Command::Fin(&message.id)).await,
            Err(e) => {
                let delay = self.config.requeue_delay(message.attempts);
                warn!(
                    id = %message.id,
                    "handler failed with an error: {e}; requeueing in {delay:?}"
                );
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                conn.send(&Command::Req {
                    id: &message.id,
                    delay_ms,
                })
                .await
            }
        }
    }

    /// Re-query nsqlookupd every `lookupd_poll_interval` and connect to new nodes.
    async fn poll_lookupd(self, http: reqwest::Client, addr: String) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = interval(self.config.lookupd_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; the initial query already ran
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match lookup::query(&http, &addr, &self.topic).await {
                        Ok(producers) => {
                            for nsqd in producers {
                                self.spawn_nsqd(nsqd);
                            }
                        }
                        Err(e) => warn!("failed to poll nsqlookupd {addr} with an error: {e}"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(lookupd = %addr, "stopped polling");
    }
}
