//! nsqlookupd `/lookup` queries.

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct ProducerInfo {
    broadcast_address: String,
    tcp_port: u16,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    #[serde(default)]
    producers: Vec<ProducerInfo>,
}

/// nsqlookupd < 1.0 wraps the payload in a status envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LookupResponse {
    Legacy { data: LookupData },
    Current(LookupData),
}

/// `http://<addr>/lookup?topic=<topic>`; `addr` may already carry a scheme.
pub fn lookup_url(addr: &str, topic: &str) -> String {
    let base = if addr.contains("://") {
        addr.trim_end_matches('/').to_string()
    } else {
        format!("http://{addr}")
    };
    // topic names are [.a-zA-Z0-9_-#]; only '#' needs escaping
    format!("{base}/lookup?topic={}", topic.replace('#', "%23"))
}

/// Extract `host:port` TCP addresses of every nsqd in a lookup response.
pub fn parse_lookup_response(body: &[u8]) -> Result<Vec<String>> {
    let response: LookupResponse = serde_json::from_slice(body)
        .map_err(|e| Error::Protocol(format!("malformed lookup response: {e}")))?;

    let data = match response {
        LookupResponse::Legacy { data } => data,
        LookupResponse::Current(data) => data,
    };

    Ok(data
        .producers
        .into_iter()
        .map(|p| join_host_port(&p.broadcast_address, p.tcp_port))
        .collect())
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Ask the nsqlookupd at `addr` which nsqd nodes carry `topic`.
///
/// An unknown topic is not an error: it yields no producers, and later polls
/// pick the topic up once something publishes to it.
pub async fn query(http: &reqwest::Client, addr: &str, topic: &str) -> Result<Vec<String>> {
    let url = lookup_url(addr, topic);
    debug!(%url, "querying nsqlookupd");

    let response = http
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/vnd.nsq; version=1.0")
        .send()
        .await
        .map_err(|e| Error::Connection(format!("lookup {url}: {e}")))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        warn!(topic, lookupd = addr, "topic not found on nsqlookupd");
        return Ok(Vec::new());
    }
    if !status.is_success() {
        return Err(Error::Connection(format!("lookup {url} returned {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Connection(format!("lookup {url}: {e}")))?;
    parse_lookup_response(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_urls() {
        assert_eq!(
            lookup_url("localhost:4161", "orders"),
            "http://localhost:4161/lookup?topic=orders"
        );
        assert_eq!(
            lookup_url("https://lookupd.internal/", "tmp#ephemeral"),
            "https://lookupd.internal/lookup?topic=tmp%23ephemeral"
        );
    }

    #[test]
    fn parses_current_envelope() {
        let body = br#"{
            "channels": ["archive"],
            "producers": [
                {"remote_address": "10.0.0.5:51234", "hostname": "n1",
                 "broadcast_address": "n1.local", "tcp_port": 4150,
                 "http_port": 4151, "version": "1.2.1"},
                {"broadcast_address": "fd00::7", "tcp_port": 4150}
            ]
        }"#;

        let addrs = parse_lookup_response(body).unwrap();
        assert_eq!(addrs, vec!["n1.local:4150", "[fd00::7]:4150"]);
    }

    #[test]
    fn parses_legacy_envelope() {
        let body = br#"{"status_code": 200, "status_txt": "OK",
            "data": {"channels": [], "producers": [
                {"broadcast_address": "127.0.0.1", "tcp_port": 4150}
            ]}}"#;

        assert_eq!(parse_lookup_response(body).unwrap(), vec!["127.0.0.1:4150"]);
    }

    #[test]
    fn no_producers() {
        assert!(parse_lookup_response(br#"{"channels": []}"#)
            .unwrap()
            .is_empty());
        assert!(matches!(
            parse_lookup_response(b"not json"),
            Err(Error::Protocol(_))
        ));
    }
}
