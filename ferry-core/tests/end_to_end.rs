use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ferry_core::broker::{InMemoryBroker, NotificationSource};
use ferry_core::consume::{NotificationConsumer, Outcome};
use ferry_core::publish::config::DEFAULT_QUEUE_NAME;
use ferry_core::publish::{NotificationPublisher, NotificationQueue, PublisherConfig};
use ferry_core::transfer::{FileFetcher, TransferClient, TransferConfig, TransferServer};
use ferry_core::watch::{Classification, EventClassifier, WatchConfig};
use ferry_core::{Result, TransferRequest, WatchEvent, WatchEventMask};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Stands in for the origin's file server.
#[derive(Clone, Default)]
struct CannedFetcher {
    requests: Arc<Mutex<Vec<TransferRequest>>>,
}

#[async_trait]
impl FileFetcher for CannedFetcher {
    async fn fetch(&self, request: &TransferRequest) -> Result<u64> {
        self.requests.lock().unwrap().push(request.clone());
        std::fs::write(&request.local_path, b"jpeg bytes")?;
        Ok(10)
    }
}

#[tokio::test(start_paused = true)]
async fn finished_photo_travels_from_watch_event_to_inbox() {
    let inbox = tempfile::tempdir().unwrap();
    let broker = InMemoryBroker::new();
    let (queue, outbound) = NotificationQueue::channel();
    let mut classifier = EventClassifier::new(
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
        WatchConfig::default(),
        queue,
    );
    let token = CancellationToken::new();
    let publisher =
        NotificationPublisher::new(broker.transport(), PublisherConfig::default(), outbound);
    let publishing = tokio::spawn(publisher.run(token.clone()));

    let event = WatchEvent::new("/data/photo.jpg", WatchEventMask::CLOSE_WRITE);
    assert!(matches!(classifier.handle(&event), Classification::Accepted(_)));
    // A second finalize of the same name is not announced again.
    classifier.handle(&event);

    // One publish cycle.
    sleep(Duration::from_millis(600)).await;
    assert_eq!(
        broker.published().await,
        vec!["10.0.0.5,/data/photo.jpg,photo.jpg".to_string()]
    );

    let fetcher = CannedFetcher::default();
    let mut source = broker.source(DEFAULT_QUEUE_NAME);
    let delivery = source.next_delivery().await.unwrap().unwrap();
    let mut consumer = NotificationConsumer::new(source, fetcher.clone(), inbox.path());
    let outcome = consumer.process(delivery.clone()).await.unwrap();

    let expected = inbox.path().join("photo.jpg");
    assert!(matches!(outcome, Outcome::Transferred { ref path, bytes: 10 } if *path == expected));
    assert_eq!(std::fs::read(&expected).unwrap(), b"jpeg bytes");
    assert_eq!(
        fetcher.requests.lock().unwrap().clone(),
        vec![TransferRequest::new("10.0.0.5", "/data/photo.jpg", expected.clone())]
    );
    assert_eq!(broker.acked().await, vec![delivery.id]);
    assert_eq!(broker.unacked_len().await, 0);
    assert_eq!(broker.queue_len(DEFAULT_QUEUE_NAME).await, 0);

    token.cancel();
    let report = publishing.await.unwrap().unwrap();
    assert_eq!(report.totals.published, 1);
    assert_eq!(report.totals.acked, 1);
}

#[tokio::test(start_paused = true)]
async fn consumer_run_skips_sentinels_and_survives_bad_messages() {
    let inbox = tempfile::tempdir().unwrap();
    let broker = InMemoryBroker::new();
    broker.enqueue(DEFAULT_QUEUE_NAME, "10.0.0.5,/data,").await;
    broker.enqueue(DEFAULT_QUEUE_NAME, "garbage").await;
    broker
        .enqueue(DEFAULT_QUEUE_NAME, "10.0.0.5,/data/b.jpg,b.jpg")
        .await;

    let fetcher = CannedFetcher::default();
    let consumer = NotificationConsumer::new(
        broker.source(DEFAULT_QUEUE_NAME),
        fetcher.clone(),
        inbox.path(),
    );
    let token = CancellationToken::new();
    let running = tokio::spawn(consumer.run(token.clone()));

    sleep(Duration::from_millis(500)).await;
    token.cancel();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(stats.received, 3);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.transferred, 1);
    assert_eq!(fetcher.requests.lock().unwrap().len(), 1);
    assert_eq!(broker.acked().await.len(), 3);
    assert!(inbox.path().join("b.jpg").exists());
}

#[tokio::test]
async fn file_is_pulled_over_tcp_from_its_origin() {
    let origin = tempfile::tempdir().unwrap();
    let inbox = tempfile::tempdir().unwrap();
    let photo = origin.path().join("photo.jpg");
    let body: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
    std::fs::write(&photo, &body).unwrap();

    let token = CancellationToken::new();
    let transfer = TransferConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        ..TransferConfig::default()
    };
    let server = TransferServer::bind(transfer.clone()).await.unwrap();
    let port = server.local_addr().unwrap().port();
    let serving = tokio::spawn(server.run(token.clone()));

    let broker = InMemoryBroker::new();
    let (queue, outbound) = NotificationQueue::channel();
    let mut classifier =
        EventClassifier::new(IpAddr::V4(Ipv4Addr::LOCALHOST), WatchConfig::default(), queue);
    let config = PublisherConfig {
        publish_interval_ms: 20,
        ..PublisherConfig::default()
    };
    let publishing = tokio::spawn(
        NotificationPublisher::new(broker.transport(), config, outbound).run(token.clone()),
    );

    classifier.handle(&WatchEvent::new(&photo, WatchEventMask::MOVED_TO));

    let client = TransferClient::new(&TransferConfig { port, ..transfer });
    let mut consumer =
        NotificationConsumer::new(broker.source(DEFAULT_QUEUE_NAME), client, inbox.path());
    // Any handle on the queue can claim; the consumer's own source acks.
    let mut claims = broker.source(DEFAULT_QUEUE_NAME);
    let delivery = loop {
        if let Some(delivery) = claims.next_delivery().await.unwrap() {
            break delivery;
        }
    };
    let outcome = consumer.process(delivery).await.unwrap();

    assert!(matches!(outcome, Outcome::Transferred { bytes: 20_000, .. }));
    assert_eq!(std::fs::read(inbox.path().join("photo.jpg")).unwrap(), body);
    assert_eq!(broker.acked().await.len(), 1);

    token.cancel();
    serving.await.unwrap().unwrap();
    publishing.await.unwrap().unwrap();
}
