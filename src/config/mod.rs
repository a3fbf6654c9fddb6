use std::time::Duration;

use crate::core::error::{Error, Result};

pub const DEFAULT_HOST: &str = "localhost";
/// nsqd TCP port.
pub const DEFAULT_PUBLISH_PORT: u16 = 4150;
/// nsqlookupd HTTP port.
pub const DEFAULT_SUBSCRIBE_PORT: u16 = 4161;

/// Settings for the `publish` command, built once from CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
}

impl PublisherConfig {
    /// `host:port` of the nsqd to publish to.
    pub fn addr(&self) -> String {
        format_addr(&self.host, self.port)
    }
}

/// Settings for the `subscribe` command, built once from CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub channel: String,
}

impl SubscriberConfig {
    /// `host:port` of the nsqlookupd to query.
    pub fn lookupd_addr(&self) -> String {
        format_addr(&self.host, self.port)
    }
}

/// Tuning for producer and consumer connections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub lookupd_poll_interval: Duration,
    pub max_in_flight: u32,
    pub max_attempts: u16,
    pub default_requeue_delay: Duration,
    pub max_requeue_delay: Duration,
    pub client_id: String,
    pub hostname: String,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            lookupd_poll_interval: Duration::from_secs(60),
            max_in_flight: 1,
            max_attempts: 5,
            default_requeue_delay: Duration::from_secs(90),
            max_requeue_delay: Duration::from_secs(15 * 60),
            client_id: env!("CARGO_PKG_NAME").to_string(),
            hostname: env!("CARGO_PKG_NAME").to_string(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("dial_timeout", self.dial_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("lookupd_poll_interval", self.lookupd_poll_interval),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Configuration(format!("{name} must be non-zero")));
        }

        // nsqd closes connections that miss two heartbeats; reading must outlast one
        if self.read_timeout <= self.heartbeat_interval {
            return Err(Error::Configuration(
                "read_timeout must be longer than heartbeat_interval".to_string(),
            ));
        }

        if self.max_in_flight == 0 {
            return Err(Error::Configuration(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        if self.default_requeue_delay > self.max_requeue_delay {
            return Err(Error::Configuration(
                "default_requeue_delay exceeds max_requeue_delay".to_string(),
            ));
        }

        Ok(())
    }

    /// Requeue delay for a message that failed on its `attempts`-th delivery.
    pub fn requeue_delay(&self, attempts: u16) -> Duration {
        self.default_requeue_delay
            .saturating_mul(u32::from(attempts.max(1)))
            .min(self.max_requeue_delay)
    }
}

fn format_addr(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

/// Reject addresses no dialer could use.
pub fn validate_addr(addr: &str) -> Result<()> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Connection(format!("address {addr:?} is missing a port")))?;

    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(Error::Connection(format!("address {addr:?} has an invalid host")));
    }

    port.parse::<u16>()
        .map_err(|_| Error::Connection(format!("address {addr:?} has an invalid port")))?;

    Ok(())
}
