use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use ferry_model::notification::FIELD_SEPARATOR;
use ferry_model::{Notification, WatchEvent, WatchEventMask};
use tracing::{debug, info, warn};

use crate::publish::NotificationQueue;
use crate::watch::WatchConfig;

/// Why an event did not become a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not a close-after-write, close-without-write, or moved-in event.
    NotFinalized,
    Directory,
    EmptyName,
    /// The name or path contains the wire field separator and could never
    /// be decoded by a consumer.
    FieldSeparator,
    /// A file with this bare name was already announced by this process.
    AlreadySent,
    ExtensionFiltered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Accepted(Notification),
    Rejected(RejectReason),
}

/// Decides which filesystem events are announced to consumers.
///
/// Deduplication is keyed on the bare file name and lives only as long as
/// this value: the same name under two directories is announced once, and a
/// restarted watcher announces everything again.
pub struct EventClassifier {
    origin_host: String,
    config: WatchConfig,
    sent: HashSet<String>,
    queue: NotificationQueue,
}

impl fmt::Debug for EventClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventClassifier")
            .field("origin_host", &self.origin_host)
            .field("extensions", &self.config.extensions)
            .field("sent_count", &self.sent.len())
            .finish()
    }
}

impl EventClassifier {
    pub fn new(node_address: IpAddr, config: WatchConfig, queue: NotificationQueue) -> Self {
        Self {
            origin_host: node_address.to_string(),
            config,
            sent: HashSet::new(),
            queue,
        }
    }

    /// Pure decision for `event`; does not record anything.
    pub fn classify(&self, event: &WatchEvent) -> Classification {
        if !event.mask.intersects(WatchEventMask::FINALIZED) {
            return Classification::Rejected(RejectReason::NotFinalized);
        }
        if event.is_dir {
            return Classification::Rejected(RejectReason::Directory);
        }
        if event.name.is_empty() {
            return Classification::Rejected(RejectReason::EmptyName);
        }
        if event.name.contains(FIELD_SEPARATOR)
            || event.path.to_string_lossy().contains(FIELD_SEPARATOR)
        {
            return Classification::Rejected(RejectReason::FieldSeparator);
        }
        if self.sent.contains(&event.name) {
            return Classification::Rejected(RejectReason::AlreadySent);
        }
        if !self.config.matches(&event.name) {
            return Classification::Rejected(RejectReason::ExtensionFiltered);
        }

        Classification::Accepted(Notification::new(
            self.origin_host.clone(),
            event.path.to_string_lossy(),
            event.name.clone(),
        ))
    }

    /// Classify `event` and submit accepted notifications to the publisher.
    ///
    /// The name is only recorded as sent once the queue has taken it.
    pub fn handle(&mut self, event: &WatchEvent) -> Classification {
        let outcome = self.classify(event);
        match &outcome {
            Classification::Accepted(notification) => {
                match self.queue.submit(notification.clone()) {
                    Ok(()) => {
                        self.sent.insert(event.name.clone());
                        info!(
                            mask = ?event.mask,
                            message = %notification,
                            "queued file notification"
                        );
                    }
                    Err(err) => {
                        warn!(path = %event.path.display(), "dropping notification: {err}");
                    }
                }
            }
            Classification::Rejected(reason) => {
                debug!(path = %event.path.display(), mask = ?event.mask, ?reason, "ignored event");
            }
        }
        outcome
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn has_sent(&self, name: &str) -> bool {
        self.sent.contains(name)
    }
}
