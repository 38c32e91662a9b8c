use serde::{Deserialize, Serialize};

use crate::error::{FerryError, Result};

/// Classifier policy and address settings for the watcher side.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// File name suffixes that are announced. Matching ignores ASCII case.
    pub extensions: Vec<String>,
    /// Address placed in notifications instead of the discovered one.
    pub advertise_address: Option<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".jpg".to_string()],
            advertise_address: None,
        }
    }
}

impl WatchConfig {
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.extensions
            .iter()
            .map(|ext| ext.trim())
            .filter(|ext| !ext.is_empty())
            .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(FerryError::Config(
                "watch.extensions needs at least one non-empty suffix".into(),
            ));
        }
        Ok(())
    }
}
