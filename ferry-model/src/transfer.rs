use std::path::{Component, Path, PathBuf};

use crate::error::{ModelError, Result};
use crate::notification::Notification;

/// One pull of `remote_path` from `remote_host` into `local_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub remote_host: String,
    pub remote_path: String,
    pub local_path: PathBuf,
}

impl TransferRequest {
    pub fn new(
        remote_host: impl Into<String>,
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote_host: remote_host.into(),
            remote_path: remote_path.into(),
            local_path: local_path.into(),
        }
    }

    /// Build the pull for `notification`, landing the file directly inside
    /// `destination` under its announced name.
    ///
    /// Names with directory components are refused so a message cannot
    /// write outside `destination`.
    pub fn for_notification(notification: &Notification, destination: &Path) -> Result<Self> {
        let name = notification.filename.as_str();
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if part == name => Ok(Self::new(
                notification.origin_host.clone(),
                notification.origin_path.clone(),
                destination.join(name),
            )),
            _ => Err(ModelError::UnsafeFilename(name.to_string())),
        }
    }
}
