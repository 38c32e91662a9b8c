use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FerryError, Result};

/// Name of the durable queue notifications are published to.
pub const DEFAULT_QUEUE_NAME: &str = "file_transfer";

/// Publish cadence and reconnect policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub queue: String,
    /// Period of the publish timer; at most one notification per tick.
    pub publish_interval_ms: u64,
    /// Fixed delay before every reconnect attempt. There is no retry limit.
    pub reconnect_delay_ms: u64,
    /// Liveness probe period while connected.
    pub heartbeat_interval_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE_NAME.to_string(),
            publish_interval_ms: 500,
            reconnect_delay_ms: 5_000,
            heartbeat_interval_ms: 10_000,
        }
    }
}

impl PublisherConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.trim().is_empty() {
            return Err(FerryError::Config("publisher.queue must not be empty".into()));
        }
        for (name, value) in [
            ("publish_interval_ms", self.publish_interval_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
        ] {
            if value == 0 {
                return Err(FerryError::Config(format!("publisher.{name} must be > 0")));
            }
        }
        Ok(())
    }
}
