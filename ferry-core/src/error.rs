use thiserror::Error;

use ferry_model::ModelError;

#[derive(Error, Debug)]
pub enum FerryError {
    /// Broker unreachable or closed underneath us. Recovered by reconnecting.
    #[error("Broker connectivity lost: {0}")]
    ConnectivityLost(String),

    /// Broker refused a publish. The payload is dropped, not retried.
    #[error("Delivery {tag} rejected by broker: {reason}")]
    DeliveryRejected { tag: u64, reason: String },

    #[error("Malformed notification: {0}")]
    MalformedNotification(#[from] ModelError),

    #[error("Source file missing: {path}")]
    SourceFileMissing {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer request exceeds {limit} bytes")]
    RequestTooLong { limit: usize },

    #[error("Transfer of {remote_path} from {remote_host} failed: {source}")]
    TransferFailed {
        remote_host: String,
        remote_path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to determine a routable local address: {0}")]
    NoRoutableAddress(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FerryError>;

#[cfg(feature = "redis-broker")]
impl FerryError {
    /// Whether a Redis failure means the connection itself is unusable.
    pub(crate) fn is_connectivity(err: &redis::RedisError) -> bool {
        err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
    }
}

#[cfg(feature = "redis-broker")]
impl From<redis::RedisError> for FerryError {
    fn from(err: redis::RedisError) -> Self {
        if FerryError::is_connectivity(&err) {
            FerryError::ConnectivityLost(err.to_string())
        } else {
            FerryError::Broker(err.to_string())
        }
    }
}

#[cfg(feature = "fs-watch")]
impl From<notify::Error> for FerryError {
    fn from(err: notify::Error) -> Self {
        FerryError::Watch(err.to_string())
    }
}
