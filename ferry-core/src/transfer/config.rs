use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_REQUEST_BYTES, DEFAULT_PORT};
use crate::error::{FerryError, Result};

/// Settings shared by the file server and client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Address the server binds to.
    pub bind: IpAddr,
    pub port: u16,
    pub chunk_size: usize,
    /// Buffer for the request read. The usable path length is one less: a
    /// read that fills the buffer may have been cut short and is refused.
    pub max_request_bytes: usize,
    pub connect_timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            connect_timeout_ms: 10_000,
        }
    }
}

impl TransferConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(FerryError::Config("transfer.chunk_size must be > 0".into()));
        }
        if self.max_request_bytes < 2 {
            return Err(FerryError::Config(
                "transfer.max_request_bytes must be at least 2".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(FerryError::Config(
                "transfer.connect_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}
