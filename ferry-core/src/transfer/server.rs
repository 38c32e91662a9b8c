use std::io;
use std::net::SocketAddr;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::TransferConfig;
use crate::error::{FerryError, Result};

/// Serves files by absolute path to whoever asks.
///
/// Each connection is handled on its own task with no shared state, so a
/// failing request never affects the listener or other requests.
#[derive(Debug)]
pub struct TransferServer {
    listener: TcpListener,
    config: TransferConfig,
}

impl TransferServer {
    pub async fn bind(config: TransferConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `token` is cancelled. Requests still in
    /// flight at that point are aborted.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let local = self.local_addr()?;
        info!(addr = %local, "transfer server listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let config = self.config.clone();
                        connections.spawn(async move {
                            match serve_connection(stream, peer, &config).await {
                                Ok(sent) => debug!(%peer, bytes = sent, "request served"),
                                Err(err) => warn!(%peer, "request failed: {err}"),
                            }
                        });
                    }
                    Err(err) => warn!("accept failed: {err}"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        error!("transfer task ended abnormally: {err}");
                    }
                }
            }
        }

        let in_flight = connections.len();
        connections.shutdown().await;
        info!(addr = %local, in_flight, "transfer server stopped");
        Ok(())
    }
}

/// Handle one request: a single read of the path, then the file body.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: &TransferConfig,
) -> Result<u64> {
    let mut request = vec![0u8; config.max_request_bytes];
    let read = stream.read(&mut request).await?;
    if read == 0 {
        debug!(%peer, "empty request");
        return Ok(0);
    }
    if read == request.len() {
        return Err(FerryError::RequestTooLong { limit: read - 1 });
    }

    let path = std::str::from_utf8(&request[..read]).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "request path is not valid utf-8")
    })?;
    debug!(%peer, path, "file requested");

    let mut file = File::open(path).await.map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => FerryError::SourceFileMissing {
            path: path.to_string(),
            source,
        },
        _ => FerryError::Io(source),
    })?;

    let mut chunk = vec![0u8; config.chunk_size];
    let mut sent = 0u64;
    loop {
        let filled = file.read(&mut chunk).await?;
        if filled == 0 {
            break;
        }
        stream.write_all(&chunk[..filled]).await?;
        sent += filled as u64;
    }
    stream.shutdown().await?;
    Ok(sent)
}
