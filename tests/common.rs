#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use nsq_pubsub::{Error, Message, MessageHandler, Producer, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        nsq_pubsub::logging::init_logging();
    });
}

// ───────────────────────────────────────────────────────────
// Test doubles for the flows
// ───────────────────────────────────────────────────────────

/// Records publishes and stop calls; optionally fails every publish.
#[derive(Clone, Default)]
pub struct FakeProducer {
    pub published: Arc<Mutex<Vec<(String, Bytes)>>>,
    pub stops: Arc<AtomicUsize>,
    pub reject_with: Option<String>,
}

impl FakeProducer {
    pub fn rejecting(reason: &str) -> Self {
        Self {
            reject_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Producer for FakeProducer {
    async fn publish(&mut self, topic: &str, body: Bytes) -> Result<()> {
        if let Some(reason) = &self.reject_with {
            return Err(Error::Publish(reason.clone()));
        }
        self.published.lock().unwrap().push((topic.to_string(), body));
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Keeps every body it sees; fails when `fail` is set.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub bodies: Arc<Mutex<Vec<Bytes>>>,
    pub fail: bool,
}

impl RecordingHandler {
    pub fn bodies(&self) -> Vec<Bytes> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle_message(&self, message: &Message) -> anyhow::Result<()> {
        self.bodies.lock().unwrap().push(message.body.clone());
        if self.fail {
            anyhow::bail!("handler asked to fail");
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────
// In-process nsqd
// ───────────────────────────────────────────────────────────

pub async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

/// Server side of one nsqd connection, driven step by step by a test.
pub struct FakeNsqd {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl FakeNsqd {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self::new(stream)
    }

    pub fn new(stream: TcpStream) -> Self {
        let (r, w) = stream.into_split();
        Self {
            reader: BufReader::new(r),
            writer: w,
        }
    }

    /// Magic plus `IDENTIFY`, answered with `OK`. Returns the IDENTIFY body.
    pub async fn handshake(&mut self) -> serde_json::Value {
        let mut magic = [0u8; 4];
        self.reader.read_exact(&mut magic).await.unwrap();
        assert_eq!(&magic, b"  V2");

        let (line, body) = self.read_command().await;
        assert_eq!(line, "IDENTIFY");
        let identify: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(identify["feature_negotiation"], false);

        self.respond(b"OK").await;
        identify
    }

    /// Next command line (without `\n`) and its body, if it carries one.
    pub async fn read_command(&mut self) -> (String, Vec<u8>) {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "client closed the connection");
        let line = line.trim_end_matches('\n').to_string();

        let mut body = Vec::new();
        if line == "IDENTIFY" || line.starts_with("PUB ") {
            let size = self.reader.read_u32().await.unwrap() as usize;
            body.resize(size, 0);
            self.reader.read_exact(&mut body).await.unwrap();
        }
        (line, body)
    }

    /// True once the client has closed its side.
    pub async fn at_eof(&mut self) -> bool {
        let mut line = String::new();
        matches!(self.reader.read_line(&mut line).await, Ok(0) | Err(_))
    }

    pub async fn respond(&mut self, data: &[u8]) {
        self.write_frame(0, data).await;
    }

    pub async fn error(&mut self, data: &[u8]) {
        self.write_frame(1, data).await;
    }

    pub async fn message(&mut self, id: &[u8; 16], attempts: u16, body: &[u8]) {
        let mut data = BytesMut::new();
        data.put_i64(1_700_000_000_000_000_000);
        data.put_u16(attempts);
        data.put_slice(id);
        data.put_slice(body);
        self.write_frame(2, &data).await;
    }

    async fn write_frame(&mut self, frame_type: i32, data: &[u8]) {
        let mut frame = BytesMut::new();
        frame.put_u32(4 + data.len() as u32);
        frame.put_i32(frame_type);
        frame.put_slice(data);
        self.writer.write_all(&frame).await.unwrap();
    }
}

// ───────────────────────────────────────────────────────────
// In-process nsqlookupd
// ───────────────────────────────────────────────────────────

/// Answer one HTTP request on `listener` with `status` and `body`,
/// returning the request line.
pub async fn serve_lookup_once(listener: &TcpListener, status: &str, body: &str) -> String {
    let (stream, _) = listener.accept().await.unwrap();
    let (r, mut w) = stream.into_split();
    let mut reader = BufReader::new(r);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.unwrap();
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header).await.unwrap();
        if n == 0 || header == "\r\n" {
            break;
        }
    }

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    w.write_all(response.as_bytes()).await.unwrap();
    w.shutdown().await.unwrap();

    request_line.trim_end().to_string()
}

/// A lookup response pointing at one nsqd.
pub fn lookup_body(nsqd_addr: &str) -> String {
    let (host, port) = nsqd_addr.rsplit_once(':').unwrap();
    format!(
        r#"{{"channels":[],"producers":[{{"broadcast_address":"{host}","tcp_port":{port},"http_port":4151,"version":"1.3.0"}}]}}"#
    )
}
