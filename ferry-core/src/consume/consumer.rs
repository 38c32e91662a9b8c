use std::fmt;
use std::path::{Path, PathBuf};

use ferry_model::{Notification, TransferRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Delivery, NotificationSource};
use crate::error::{FerryError, Result};
use crate::transfer::FileFetcher;

/// What became of one delivery. Every variant has been acknowledged.
#[derive(Debug)]
pub enum Outcome {
    Transferred { path: PathBuf, bytes: u64 },
    /// The pull failed. The message is gone regardless; there is no
    /// redelivery.
    TransferFailed { error: FerryError },
    /// Sentinel message with an empty filename.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub transferred: u64,
    pub failed: u64,
    pub skipped: u64,
    pub malformed: u64,
}

/// Pulls every announced file into `destination`.
pub struct NotificationConsumer<S: NotificationSource, F: FileFetcher> {
    source: S,
    fetcher: F,
    destination: PathBuf,
    stats: ConsumerStats,
}

impl<S: NotificationSource, F: FileFetcher> fmt::Debug for NotificationConsumer<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationConsumer")
            .field("source_type", &std::any::type_name::<S>())
            .field("fetcher_type", &std::any::type_name::<F>())
            .field("destination", &self.destination)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<S: NotificationSource, F: FileFetcher> NotificationConsumer<S, F> {
    pub fn new(source: S, fetcher: F, destination: impl Into<PathBuf>) -> Self {
        Self {
            source,
            fetcher,
            destination: destination.into(),
            stats: ConsumerStats::default(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Handle a single delivery and acknowledge it.
    ///
    /// Bodies that do not decode are logged, acknowledged so they cannot
    /// block the queue, and returned as errors.
    pub async fn process(&mut self, delivery: Delivery) -> Result<Outcome> {
        self.stats.received += 1;

        let request = match self.decode(&delivery) {
            Ok(Some(request)) => request,
            Ok(None) => {
                self.source.ack(&delivery).await?;
                self.stats.skipped += 1;
                debug!(id = %delivery.id, "sentinel acknowledged");
                return Ok(Outcome::Skipped);
            }
            Err(err) => {
                error!(
                    id = %delivery.id,
                    body = %String::from_utf8_lossy(&delivery.body),
                    "{err}; discarding message"
                );
                self.source.ack(&delivery).await?;
                self.stats.malformed += 1;
                return Err(err);
            }
        };

        let outcome = match self.fetcher.fetch(&request).await {
            Ok(bytes) => {
                info!(path = %request.local_path.display(), bytes, "file received");
                self.stats.transferred += 1;
                Outcome::Transferred {
                    path: request.local_path,
                    bytes,
                }
            }
            Err(error) => {
                warn!("{error}");
                self.stats.failed += 1;
                Outcome::TransferFailed { error }
            }
        };

        self.source.ack(&delivery).await?;
        Ok(outcome)
    }

    fn decode(&self, delivery: &Delivery) -> Result<Option<TransferRequest>> {
        let notification = Notification::from_bytes(&delivery.body)?;
        info!(
            origin_host = %notification.origin_host,
            origin_path = %notification.origin_path,
            filename = %notification.filename,
            "notification received"
        );
        if notification.is_sentinel() {
            return Ok(None);
        }
        Ok(Some(TransferRequest::for_notification(
            &notification,
            &self.destination,
        )?))
    }

    /// Process deliveries until `token` is cancelled. The message in hand
    /// when cancellation arrives is finished first.
    ///
    /// Undecodable messages do not stop the loop; broker failures do.
    pub async fn run(mut self, token: CancellationToken) -> Result<ConsumerStats> {
        info!(destination = %self.destination.display(), "waiting for notifications");

        while !token.is_cancelled() {
            let Some(delivery) = self.source.next_delivery().await? else {
                continue;
            };
            match self.process(delivery).await {
                Ok(_) | Err(FerryError::MalformedNotification(_)) => {}
                Err(err) => return Err(err),
            }
        }

        info!(
            received = self.stats.received,
            transferred = self.stats.transferred,
            failed = self.stats.failed,
            "consumer stopped"
        );
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::broker::{InMemoryBroker, MemorySource};

    #[derive(Clone, Default)]
    struct RecordingFetcher {
        requests: Arc<Mutex<Vec<TransferRequest>>>,
        fail: bool,
    }

    #[async_trait]
    impl FileFetcher for RecordingFetcher {
        async fn fetch(&self, request: &TransferRequest) -> Result<u64> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(FerryError::TransferFailed {
                    remote_host: request.remote_host.clone(),
                    remote_path: request.remote_path.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                });
            }
            Ok(7)
        }
    }

    async fn delivery(broker: &InMemoryBroker, body: &str) -> (Delivery, MemorySource) {
        broker.enqueue("q", body).await;
        let mut source = broker.source("q");
        let delivery = source.next_delivery().await.unwrap().unwrap();
        (delivery, source)
    }

    #[tokio::test]
    async fn fetches_into_destination_then_acks() {
        let broker = InMemoryBroker::new();
        let (delivery, source) = delivery(&broker, "10.0.0.5,/data/photo.jpg,photo.jpg").await;
        let fetcher = RecordingFetcher::default();
        let mut consumer = NotificationConsumer::new(source, fetcher.clone(), "/srv/inbox");

        let outcome = consumer.process(delivery.clone()).await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Transferred { ref path, bytes: 7 } if path == Path::new("/srv/inbox/photo.jpg")
        ));
        let requests = fetcher.requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![TransferRequest::new("10.0.0.5", "/data/photo.jpg", "/srv/inbox/photo.jpg")]
        );
        assert_eq!(broker.acked().await, vec![delivery.id]);
    }

    #[tokio::test]
    async fn failed_transfer_is_still_acked() {
        let broker = InMemoryBroker::new();
        let (delivery, source) = delivery(&broker, "10.0.0.5,/data/a.jpg,a.jpg").await;
        let fetcher = RecordingFetcher {
            fail: true,
            ..RecordingFetcher::default()
        };
        let mut consumer = NotificationConsumer::new(source, fetcher, "/srv/inbox");

        let outcome = consumer.process(delivery).await.unwrap();
        assert!(matches!(outcome, Outcome::TransferFailed { .. }));
        assert_eq!(broker.acked().await.len(), 1);
        assert_eq!(broker.unacked_len().await, 0);
        assert_eq!(consumer.stats().failed, 1);
    }

    #[tokio::test]
    async fn sentinel_is_acked_without_transfer() {
        let broker = InMemoryBroker::new();
        let (delivery, source) = delivery(&broker, "10.0.0.5,/data,").await;
        let fetcher = RecordingFetcher::default();
        let mut consumer = NotificationConsumer::new(source, fetcher.clone(), "/srv/inbox");

        let outcome = consumer.process(delivery).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped));
        assert!(fetcher.requests.lock().unwrap().is_empty());
        assert_eq!(broker.acked().await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_acked_and_reported() {
        let broker = InMemoryBroker::new();
        let (delivery, source) = delivery(&broker, "only,two").await;
        let fetcher = RecordingFetcher::default();
        let mut consumer = NotificationConsumer::new(source, fetcher.clone(), "/srv/inbox");

        let err = consumer.process(delivery).await.unwrap_err();
        assert!(matches!(err, FerryError::MalformedNotification(_)));
        assert!(fetcher.requests.lock().unwrap().is_empty());
        assert_eq!(broker.acked().await.len(), 1);
        assert_eq!(consumer.stats().malformed, 1);
    }

    #[tokio::test]
    async fn path_escaping_filename_is_refused() {
        let broker = InMemoryBroker::new();
        let (delivery, source) = delivery(&broker, "10.0.0.5,/data/x,../x").await;
        let fetcher = RecordingFetcher::default();
        let mut consumer = NotificationConsumer::new(source, fetcher.clone(), "/srv/inbox");

        let err = consumer.process(delivery).await.unwrap_err();
        assert!(matches!(err, FerryError::MalformedNotification(_)));
        assert!(fetcher.requests.lock().unwrap().is_empty());
        assert_eq!(broker.acked().await.len(), 1);
    }
}
