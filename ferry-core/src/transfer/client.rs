use std::io;
use std::time::Duration;

use async_trait::async_trait;
use ferry_model::TransferRequest;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::TransferConfig;
use crate::error::{FerryError, Result};

/// Something that can pull a remote file to a local path.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    /// Returns the number of bytes written to `request.local_path`.
    async fn fetch(&self, request: &TransferRequest) -> Result<u64>;
}

/// Client for [`TransferServer`](super::TransferServer).
///
/// A file missing on the origin is indistinguishable from an empty one: both
/// produce an empty local file and `Ok(0)`.
#[derive(Debug, Clone)]
pub struct TransferClient {
    port: u16,
    chunk_size: usize,
    connect_timeout: Duration,
}

impl TransferClient {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            port: config.port,
            chunk_size: config.chunk_size.max(1),
            connect_timeout: config.connect_timeout(),
        }
    }

    async fn pull(&self, request: &TransferRequest) -> io::Result<u64> {
        let target = (request.remote_host.as_str(), self.port);
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.write_all(request.remote_path.as_bytes()).await?;

        // Partial files stay behind on failure.
        let mut file = File::create(&request.local_path).await?;
        let mut chunk = vec![0u8; self.chunk_size];
        let mut received = 0u64;
        loop {
            let filled = stream.read(&mut chunk).await?;
            if filled == 0 {
                break;
            }
            file.write_all(&chunk[..filled]).await?;
            received += filled as u64;
        }
        file.flush().await?;

        if let Err(err) = stream.shutdown().await {
            debug!("shutdown after transfer: {err}");
        }
        Ok(received)
    }
}

#[async_trait]
impl FileFetcher for TransferClient {
    async fn fetch(&self, request: &TransferRequest) -> Result<u64> {
        self.pull(request)
            .await
            .map_err(|source| FerryError::TransferFailed {
                remote_host: request.remote_host.clone(),
                remote_path: request.remote_path.clone(),
                source,
            })
    }
}
