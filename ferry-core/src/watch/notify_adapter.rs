//! Bridges `notify` onto the classifier.
//!
//! `notify` runs its own event thread; the classifier is moved into the
//! handler closure and executes there, so accepted notifications leave this
//! module only through the publisher queue.

use std::fmt;
use std::path::{Path, PathBuf};

use ferry_model::{WatchEvent, WatchEventMask};
use notify::event::{
    AccessKind, AccessMode, CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode,
};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::error::{FerryError, Result};
use crate::watch::EventClassifier;

/// Owns the OS watch on one directory. Dropping it stops the event thread.
pub struct DirectoryWatcher {
    directory: PathBuf,
    _watcher: RecommendedWatcher,
}

impl fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("directory", &self.directory)
            .finish()
    }
}

impl DirectoryWatcher {
    /// Start watching `directory` (non-recursively) and feed every event to
    /// `classifier`.
    pub fn start(directory: &Path, mut classifier: EventClassifier) -> Result<Self> {
        let directory = directory.canonicalize().map_err(|err| {
            FerryError::Watch(format!("cannot watch {}: {err}", directory.display()))
        })?;
        if !directory.is_dir() {
            return Err(FerryError::Watch(format!(
                "{} is not a directory",
                directory.display()
            )));
        }

        let watched = directory.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(event) = translate_event(&event) {
                        classifier.handle(&event);
                    }
                }
                Err(err) => {
                    warn!("watch error on {}: {}", watched.display(), err);
                }
            },
            NotifyConfig::default(),
        )?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|err| {
                FerryError::Watch(format!("failed to watch {}: {}", directory.display(), err))
            })?;

        info!(directory = %directory.display(), "watching for finished files");
        Ok(Self {
            directory,
            _watcher: watcher,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn stop(self) {
        info!(directory = %self.directory.display(), "stopping directory watcher");
    }
}

/// Map a `notify` event onto the inotify-style mask the classifier expects.
///
/// notify's inotify backend subscribes to `IN_CLOSE_WRITE` but not
/// `IN_CLOSE_NOWRITE`, so on Linux only close-after-write and moved-in
/// events reach the classifier. Close-without-write is still mapped for
/// backends that report it.
///
/// Returns `None` for events that carry no path.
pub fn translate_event(event: &Event) -> Option<WatchEvent> {
    let (path, mask) = match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let target = event.paths.get(1).or_else(|| event.paths.first())?;
            (target, WatchEventMask::MOVED_TO)
        }
        kind => (event.paths.first()?, mask_for(kind)),
    };

    let is_dir = match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => true,
        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => false,
        _ => path.is_dir(),
    };

    let mut translated = WatchEvent::new(path.clone(), mask);
    translated.is_dir = is_dir;
    Some(translated)
}

fn mask_for(kind: EventKind) -> WatchEventMask {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => WatchEventMask::CLOSE_WRITE,
        EventKind::Access(AccessKind::Close(_)) => WatchEventMask::CLOSE_NOWRITE,
        EventKind::Access(AccessKind::Open(_)) => WatchEventMask::OPEN,
        EventKind::Access(_) => WatchEventMask::ACCESS,
        EventKind::Create(_) => WatchEventMask::CREATE,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchEventMask::MOVED_TO,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => WatchEventMask::MOVED_FROM,
        EventKind::Modify(ModifyKind::Metadata(_)) => WatchEventMask::ATTRIB,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => WatchEventMask::MODIFY,
        EventKind::Remove(_) => WatchEventMask::DELETE,
        _ => WatchEventMask::EMPTY,
    }
}
