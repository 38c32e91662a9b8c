use std::collections::VecDeque;

use ferry_model::Notification;
use tokio::sync::mpsc;

use crate::error::{FerryError, Result};

/// Producer half of the watcher → publisher FIFO. Cheap to clone, never
/// blocks, usable from non-async threads.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationQueue {
    pub fn channel() -> (Self, Outbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { tx },
            Outbound {
                rx,
                requeued: VecDeque::new(),
            },
        )
    }

    pub fn submit(&self, notification: Notification) -> Result<()> {
        self.tx
            .send(notification)
            .map_err(|_| FerryError::Internal("publisher queue is closed".into()))
    }
}

/// Consumer half of the FIFO, owned by the publisher.
///
/// Survives reconnects. Entries handed back with [`Outbound::requeue`] come
/// out again before anything still waiting in the channel.
#[derive(Debug)]
pub struct Outbound {
    rx: mpsc::UnboundedReceiver<Notification>,
    requeued: VecDeque<Notification>,
}

impl Outbound {
    pub fn pop(&mut self) -> Option<Notification> {
        if let Some(front) = self.requeued.pop_front() {
            return Some(front);
        }
        self.rx.try_recv().ok()
    }

    /// Return a notification the broker never accepted to the head of the
    /// queue.
    pub fn requeue(&mut self, notification: Notification) {
        self.requeued.push_front(notification);
    }

    pub fn len(&self) -> usize {
        self.requeued.len() + self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(name: &str) -> Notification {
        Notification::new("10.0.0.5", format!("/data/{name}"), name)
    }

    #[test]
    fn pops_in_submission_order() {
        let (queue, mut outbound) = NotificationQueue::channel();
        queue.submit(note("a.jpg")).unwrap();
        queue.submit(note("b.jpg")).unwrap();

        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound.pop(), Some(note("a.jpg")));
        assert_eq!(outbound.pop(), Some(note("b.jpg")));
        assert_eq!(outbound.pop(), None);
    }

    #[test]
    fn requeued_entry_goes_first() {
        let (queue, mut outbound) = NotificationQueue::channel();
        queue.submit(note("a.jpg")).unwrap();
        queue.submit(note("b.jpg")).unwrap();

        let first = outbound.pop().unwrap();
        outbound.requeue(first);
        assert_eq!(outbound.pop(), Some(note("a.jpg")));
        assert_eq!(outbound.pop(), Some(note("b.jpg")));
    }

    #[test]
    fn submit_fails_once_publisher_is_gone() {
        let (queue, outbound) = NotificationQueue::channel();
        drop(outbound);
        assert!(queue.submit(note("a.jpg")).is_err());
    }
}
