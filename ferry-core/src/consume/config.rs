use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::DEFAULT_GROUP;
use crate::error::{FerryError, Result};

/// Consumer-group membership and polling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Consumers sharing a group split the queue between them.
    pub group: String,
    /// Stable name within the group. Generated per process when unset; a
    /// stable name lets a restarted consumer finish its own pending entries
    /// straight away instead of waiting for `claim_idle_ms`.
    pub consumer_name: Option<String>,
    /// Upper bound on a single broker wait, which is also how quickly the
    /// consumer notices cancellation.
    pub block_ms: u64,
    /// Entries another consumer has held unacked this long are taken over
    /// at startup. `0` disables claiming.
    pub claim_idle_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            consumer_name: None,
            block_ms: 400,
            claim_idle_ms: 300_000,
        }
    }
}

impl ConsumerConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn claim_idle(&self) -> Option<Duration> {
        (self.claim_idle_ms > 0).then(|| Duration::from_millis(self.claim_idle_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.group.trim().is_empty() {
            return Err(FerryError::Config("consumer.group must not be empty".into()));
        }
        if self.block_ms == 0 {
            return Err(FerryError::Config("consumer.block_ms must be > 0".into()));
        }
        Ok(())
    }
}
