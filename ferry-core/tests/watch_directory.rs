use std::net::{IpAddr, Ipv4Addr};
use std::thread::sleep;
use std::time::{Duration, Instant};

use ferry_core::Notification;
use ferry_core::publish::{NotificationQueue, Outbound};
use ferry_core::watch::{DirectoryWatcher, EventClassifier, WatchConfig};

/// Wait up to a few seconds for the watcher thread to queue something.
fn next_notification(outbound: &mut Outbound) -> Option<Notification> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(notification) = outbound.pop() {
            return Some(notification);
        }
        sleep(Duration::from_millis(20));
    }
    None
}

#[test]
fn finished_files_in_the_directory_are_queued_once() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, mut outbound) = NotificationQueue::channel();
    let classifier = EventClassifier::new(
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
        WatchConfig::default(),
        queue,
    );
    let watcher = DirectoryWatcher::start(dir.path(), classifier).unwrap();

    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
    std::fs::write(dir.path().join("photo.jpg"), b"jpeg").unwrap();

    let notification = next_notification(&mut outbound).expect("photo.jpg was not announced");
    assert_eq!(notification.origin_host, "10.0.0.5");
    assert_eq!(notification.filename, "photo.jpg");
    assert_eq!(
        notification.origin_path,
        watcher.directory().join("photo.jpg").to_string_lossy()
    );

    // Rewriting the same file produces more close events but no new entry.
    std::fs::write(dir.path().join("photo.jpg"), b"jpeg again").unwrap();
    sleep(Duration::from_millis(300));
    assert!(outbound.pop().is_none());

    watcher.stop();
}

#[test]
fn missing_directory_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, _outbound) = NotificationQueue::channel();
    let classifier = EventClassifier::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        WatchConfig::default(),
        queue,
    );

    let missing = dir.path().join("absent");
    assert!(DirectoryWatcher::start(&missing, classifier).is_err());
}
