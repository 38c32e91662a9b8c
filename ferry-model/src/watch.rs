use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;

/// Bitmask of filesystem change kinds, modelled on inotify's event flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WatchEventMask(u32);

impl WatchEventMask {
    pub const EMPTY: Self = Self(0);
    pub const ACCESS: Self = Self(1 << 0);
    pub const MODIFY: Self = Self(1 << 1);
    pub const ATTRIB: Self = Self(1 << 2);
    /// A file opened for writing was closed.
    pub const CLOSE_WRITE: Self = Self(1 << 3);
    /// A file not opened for writing was closed.
    pub const CLOSE_NOWRITE: Self = Self(1 << 4);
    pub const OPEN: Self = Self(1 << 5);
    pub const MOVED_FROM: Self = Self(1 << 6);
    /// A file was moved into the watched directory.
    pub const MOVED_TO: Self = Self(1 << 7);
    pub const CREATE: Self = Self(1 << 8);
    pub const DELETE: Self = Self(1 << 9);

    /// Events that mean "this file is complete and can be fetched".
    pub const FINALIZED: Self =
        Self(Self::CLOSE_WRITE.0 | Self::CLOSE_NOWRITE.0 | Self::MOVED_TO.0);

    const NAMES: [(Self, &'static str); 10] = [
        (Self::ACCESS, "ACCESS"),
        (Self::MODIFY, "MODIFY"),
        (Self::ATTRIB, "ATTRIB"),
        (Self::CLOSE_WRITE, "CLOSE_WRITE"),
        (Self::CLOSE_NOWRITE, "CLOSE_NOWRITE"),
        (Self::OPEN, "OPEN"),
        (Self::MOVED_FROM, "MOVED_FROM"),
        (Self::MOVED_TO, "MOVED_TO"),
        (Self::CREATE, "CREATE"),
        (Self::DELETE, "DELETE"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for WatchEventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for WatchEventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for WatchEventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("EMPTY");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// A single raw change reported by the filesystem watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Full path of the entry, directory plus `name`.
    pub path: PathBuf,
    /// Bare entry name; empty for events on the watched directory itself.
    pub name: String,
    pub mask: WatchEventMask,
    pub is_dir: bool,
}

impl WatchEvent {
    /// Build an event for `path`, deriving `name` from its final component.
    pub fn new(path: impl Into<PathBuf>, mask: WatchEventMask) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            mask,
            is_dir: false,
        }
    }

    pub fn directory(mut self) -> Self {
        self.is_dir = true;
        self
    }
}
