//! Redis Streams as the notification broker.
//!
//! The queue is a stream; a consumer group on it gives each entry to one
//! consumer and tracks it until `XACK`. An `XADD` reply is the publish
//! confirmation: an id acks the delivery, a server error nacks it, and an
//! I/O failure means the connection is gone.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use ferry_model::DeliveryTag;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;
use tracing::{debug, info, warn};

use crate::broker::{
    APP_ID, BrokerSignal, BrokerTransport, CONTENT_TYPE, Delivery, NotificationSource,
    SignalSender,
};
use crate::error::{FerryError, Result};

/// Create `group` on `stream`, creating the stream too. Reading from id `0`
/// keeps entries published before the first consumer attached.
async fn ensure_group(conn: &mut MultiplexedConnection, stream: &str, group: &str) -> Result<()> {
    let created: redis::RedisResult<()> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match created {
        Ok(()) => {
            info!(stream, group, "declared notification queue");
            Ok(())
        }
        Err(err) if err.code() == Some("BUSYGROUP") => {
            debug!(stream, group, "notification queue already declared");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Publisher transport over a single multiplexed Redis connection.
pub struct RedisStreamTransport {
    client: redis::Client,
    group: String,
    conn: Option<MultiplexedConnection>,
    signals: Option<SignalSender>,
    confirms: bool,
}

impl fmt::Debug for RedisStreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamTransport")
            .field("group", &self.group)
            .field("connected", &self.conn.is_some())
            .field("confirms", &self.confirms)
            .finish()
    }
}

impl RedisStreamTransport {
    pub fn new(url: &str, group: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| FerryError::Broker(format!("Failed to create Redis client: {e}")))?;
        Ok(Self {
            client,
            group: group.into(),
            conn: None,
            signals: None,
            confirms: false,
        })
    }

    fn conn(&mut self) -> Result<&mut MultiplexedConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| FerryError::ConnectivityLost("not connected".into()))
    }

    /// Forget the connection after an I/O failure so later calls fail fast.
    fn lost(&mut self, err: redis::RedisError) -> FerryError {
        let err = FerryError::from(err);
        if matches!(err, FerryError::ConnectivityLost(_)) {
            self.conn = None;
        }
        err
    }
}

#[async_trait]
impl BrokerTransport for RedisStreamTransport {
    async fn connect(&mut self, signals: SignalSender) -> Result<()> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| FerryError::ConnectivityLost(format!("Failed to connect to Redis: {e}")))?;
        self.conn = Some(conn);
        self.signals = Some(signals);
        self.confirms = false;
        Ok(())
    }

    async fn open_channel(&mut self) -> Result<()> {
        // Streams have no channel concept; a PING proves the session is usable.
        self.heartbeat().await
    }

    async fn declare_queue(&mut self, queue: &str) -> Result<()> {
        let group = self.group.clone();
        let conn = self.conn()?;
        match ensure_group(conn, queue, &group).await {
            Err(FerryError::ConnectivityLost(reason)) => {
                self.conn = None;
                Err(FerryError::ConnectivityLost(reason))
            }
            other => other,
        }
    }

    async fn enable_confirms(&mut self) -> Result<()> {
        self.conn()?;
        self.confirms = true;
        Ok(())
    }

    async fn publish(&mut self, queue: &str, tag: DeliveryTag, payload: &str) -> Result<()> {
        let conn = self.conn()?;
        let reply: redis::RedisResult<String> = redis::cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg("body")
            .arg(payload)
            .arg("app_id")
            .arg(APP_ID)
            .arg("content_type")
            .arg(CONTENT_TYPE)
            .query_async(conn)
            .await;

        let signal = match reply {
            Ok(entry_id) => {
                debug!(%tag, entry_id, "stream entry appended");
                BrokerSignal::Ack(tag)
            }
            Err(err) => match self.lost(err) {
                FerryError::ConnectivityLost(reason) => {
                    return Err(FerryError::ConnectivityLost(reason));
                }
                other => BrokerSignal::Nack {
                    tag,
                    reason: other.to_string(),
                },
            },
        };

        if self.confirms
            && let Some(signals) = &self.signals
        {
            let _ = signals.send(signal);
        }
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        let conn = self.conn()?;
        let reply: redis::RedisResult<String> = redis::cmd("PING").query_async(conn).await;
        reply.map(|_| ()).map_err(|err| self.lost(err))
    }

    async fn close_channel(&mut self) -> Result<()> {
        self.confirms = false;
        Ok(())
    }

    async fn close_connection(&mut self) -> Result<()> {
        // Dropping the last handle closes the socket once in-flight replies
        // have been read.
        self.conn = None;
        self.signals = None;
        Ok(())
    }
}

/// Added to the XREADGROUP block to get the client response timeout, so a
/// reply that arrives late is never mistaken for an empty poll.
const RESPONSE_MARGIN: Duration = Duration::from_secs(5);
/// Entries claimed per XAUTOCLAIM call.
const CLAIM_BATCH: usize = 100;
/// Cap on XAUTOCLAIM round trips while connecting.
const MAX_CLAIM_PASSES: usize = 64;

/// Client-side wait for a reply to a read blocking for `block`.
pub fn response_timeout(block: Duration) -> Duration {
    block + RESPONSE_MARGIN
}

/// Where the next XREADGROUP starts.
///
/// A fresh source first walks its own pending entries (delivered earlier
/// but never acked), then switches to new entries for good.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadCursor {
    /// Re-reading pending entries after this id.
    Backlog(String),
    /// Entries never delivered to anyone.
    Live,
}

impl ReadCursor {
    fn start() -> Self {
        Self::Backlog("0".to_string())
    }

    fn id(&self) -> &str {
        match self {
            Self::Backlog(after) => after,
            Self::Live => ">",
        }
    }

    fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Record what the last read returned. An empty backlog read means the
    /// pending list is exhausted.
    fn advance(&mut self, delivered: Option<&str>) {
        if self.is_live() {
            return;
        }
        *self = match delivered {
            Some(id) => Self::Backlog(id.to_string()),
            None => Self::Live,
        };
    }
}

/// Cursor and claimed-id count out of an `XAUTOCLAIM ... JUSTID` reply.
fn parse_autoclaim(reply: &[redis::Value]) -> Result<(String, usize)> {
    let cursor = match reply.first() {
        Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
        Some(redis::Value::SimpleString(text)) => text.clone(),
        other => {
            return Err(FerryError::Broker(format!(
                "unexpected XAUTOCLAIM reply: {other:?}"
            )));
        }
    };
    let claimed = match reply.get(1) {
        Some(redis::Value::Array(ids)) => ids.len(),
        _ => 0,
    };
    Ok((cursor, claimed))
}

/// Take over entries other consumers left pending for at least `min_idle`.
/// They join this consumer's pending list and come out of the backlog read.
async fn claim_idle_entries(
    conn: &mut MultiplexedConnection,
    stream: &str,
    group: &str,
    consumer: &str,
    min_idle: Duration,
) -> Result<usize> {
    let min_idle_ms = u64::try_from(min_idle.as_millis()).unwrap_or(u64::MAX);
    let mut cursor = "0-0".to_string();
    let mut claimed = 0;

    for _ in 0..MAX_CLAIM_PASSES {
        let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&cursor)
            .arg("COUNT")
            .arg(CLAIM_BATCH)
            .arg("JUSTID")
            .query_async(conn)
            .await?;
        let (next, ids) = parse_autoclaim(&reply)?;
        claimed += ids;
        if next == "0-0" {
            break;
        }
        cursor = next;
    }
    Ok(claimed)
}

/// Consumer-group reader over one stream.
///
/// Delivery is at least once: an entry is acked only after it was handled,
/// and entries left pending by a crash are read again on the next start, by
/// this consumer or, once idle long enough, by any consumer of the group.
pub struct RedisStreamSource {
    conn: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    block: Duration,
    cursor: ReadCursor,
}

impl fmt::Debug for RedisStreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamSource")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("block", &self.block)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl RedisStreamSource {
    /// Join `group` on `stream` as `consumer`.
    ///
    /// With `claim_idle` set, entries other consumers have held unacked for
    /// at least that long are claimed before the first read.
    pub async fn connect(
        url: &str,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        block: Duration,
        claim_idle: Option<Duration>,
    ) -> Result<Self> {
        let stream = stream.into();
        let group = group.into();
        let consumer = consumer.into();
        info!("Connecting to Redis broker at {}", url);

        let client = redis::Client::open(url)
            .map_err(|e| FerryError::Broker(format!("Failed to create Redis client: {e}")))?;
        let config = redis::AsyncConnectionConfig::new()
            .set_response_timeout(Some(response_timeout(block)));
        let mut conn = client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| FerryError::ConnectivityLost(format!("Failed to connect to Redis: {e}")))?;
        ensure_group(&mut conn, &stream, &group).await?;

        if let Some(min_idle) = claim_idle {
            let claimed =
                claim_idle_entries(&mut conn, &stream, &group, &consumer, min_idle).await?;
            if claimed > 0 {
                info!(claimed, consumer = %consumer, "claimed idle notifications");
            }
        }

        Ok(Self {
            conn,
            stream,
            group,
            consumer,
            block,
            cursor: ReadCursor::start(),
        })
    }

    async fn read(&mut self) -> redis::RedisResult<Option<StreamReadReply>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1);
        // Pending reads answer immediately; only new entries are waited for.
        if self.cursor.is_live() {
            let block_ms = u64::try_from(self.block.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(self.cursor.id());
        cmd.query_async(&mut self.conn).await
    }
}

#[async_trait]
impl NotificationSource for RedisStreamSource {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        let reply = match self.read().await {
            Ok(reply) => reply,
            Err(err) if !self.cursor.is_live() && !FerryError::is_connectivity(&err) => {
                // An entry deleted from the stream while pending cannot be
                // decoded; give up on the backlog rather than stall on it.
                warn!("skipping unreadable pending entries: {err}");
                self.cursor.advance(None);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let entry = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .next();
        self.cursor.advance(entry.as_ref().map(|entry| entry.id.as_str()));
        let Some(entry) = entry else {
            if self.cursor.is_live() {
                debug!(consumer = %self.consumer, "pending notifications drained");
            }
            return Ok(None);
        };

        let body = match entry.get::<Vec<u8>>("body") {
            Some(body) => body,
            None => {
                warn!(id = %entry.id, "stream entry has no body field");
                Vec::new()
            }
        };
        Ok(Some(Delivery { id: entry.id, body }))
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&delivery.id)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }
}
