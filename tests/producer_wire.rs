mod common;

use bytes::Bytes;
use nsq_pubsub::{ClientConfig, Error, NsqProducer, Producer};
use tokio::time::timeout;

use common::{listen, FakeNsqd, TEST_TIMEOUT};

#[tokio::test]
async fn answers_heartbeats_while_waiting_for_ok() {
    common::init_logging();
    let (listener, addr) = listen().await;

    let nsqd = tokio::spawn(async move {
        let mut nsqd = FakeNsqd::accept(&listener).await;
        let identify = nsqd.handshake().await;
        // idle producers must not be timed out by nsqd
        assert_eq!(identify["heartbeat_interval"], -1);

        let (line, body) = nsqd.read_command().await;
        assert_eq!(line, "PUB orders");
        assert_eq!(body, b"{\"id\":1}\n");

        nsqd.respond(b"_heartbeat_").await;
        assert_eq!(nsqd.read_command().await.0, "NOP");
        nsqd.respond(b"OK").await;
    });

    let mut producer = NsqProducer::new(addr, ClientConfig::default()).unwrap();
    assert!(!producer.is_connected());

    timeout(
        TEST_TIMEOUT,
        producer.publish("orders", Bytes::from_static(b"{\"id\":1}\n")),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(producer.is_connected());
    nsqd.await.unwrap();
}

#[tokio::test]
async fn error_frame_fails_the_publish_and_reconnects() {
    let (listener, addr) = listen().await;

    let nsqd = tokio::spawn(async move {
        let mut first = FakeNsqd::accept(&listener).await;
        first.handshake().await;
        let _ = first.read_command().await;
        first.error(b"E_BAD_MESSAGE PUB message too big").await;

        let mut second = FakeNsqd::accept(&listener).await;
        second.handshake().await;
        let (line, _) = second.read_command().await;
        assert_eq!(line, "PUB orders");
        second.respond(b"OK").await;
    });

    let mut producer = NsqProducer::new(addr, ClientConfig::default()).unwrap();

    let err = producer
        .publish("orders", Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Publish(ref msg) if msg.starts_with("E_BAD_MESSAGE")));
    assert!(!producer.is_connected());

    producer
        .publish("orders", Bytes::from_static(b"y"))
        .await
        .unwrap();
    timeout(TEST_TIMEOUT, nsqd).await.unwrap().unwrap();
}

#[tokio::test]
async fn unreachable_nsqd_is_a_connection_error() {
    let (listener, addr) = listen().await;
    drop(listener);

    let mut producer = NsqProducer::new(addr, ClientConfig::default()).unwrap();
    let err = producer.ping().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[tokio::test]
async fn stopped_producer_refuses_to_publish() {
    let mut producer = NsqProducer::new("127.0.0.1:4150", ClientConfig::default()).unwrap();
    producer.stop();
    producer.stop();

    let err = producer
        .publish("orders", Bytes::from_static(b"late"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Stopped));
}

#[tokio::test]
async fn invalid_topic_is_refused_before_connecting() {
    // nothing listens here; a dial attempt would surface as a connection error
    let mut producer = NsqProducer::new("127.0.0.1:1", ClientConfig::default()).unwrap();

    let err = producer
        .publish("no spaces allowed", Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(!producer.is_connected());
}

#[test]
fn malformed_address_is_rejected() {
    for addr in ["", "localhost", "local host:4150", "localhost:port"] {
        let err = NsqProducer::new(addr, ClientConfig::default()).err().unwrap();
        assert!(matches!(err, Error::Connection(_)), "{addr:?} accepted");
    }
}
