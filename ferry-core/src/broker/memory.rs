//! In-process broker.
//!
//! Keeps queues in memory and offers fault injection (refused connects,
//! nacks, closed channels, severed connections) so the publisher's recovery paths can be
//! exercised without a real broker.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ferry_model::DeliveryTag;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::debug;

use crate::broker::{BrokerSignal, BrokerTransport, Delivery, NotificationSource, SignalSender};
use crate::error::{FerryError, Result};

const POLL_WINDOW: Duration = Duration::from_millis(100);

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Delivery>>,
    unacked: HashMap<String, Delivery>,
    acked: Vec<String>,
    published: Vec<String>,
    next_message_id: u64,
    connect_attempts: u64,
    connections: u64,
    live_connection: Option<(u64, SignalSender)>,
    refuse_connects: usize,
    nack_publishes: usize,
}

/// Shared handle to an in-memory broker. Clones see the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    arrivals: Arc<Notify>,
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryBroker");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("queues", &state.queues.len())
                    .field("published", &state.published.len())
                    .field("connections", &state.connections);
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
            connection: None,
            confirms: false,
        }
    }

    pub fn source(&self, queue: impl Into<String>) -> MemorySource {
        MemorySource {
            broker: self.clone(),
            queue: queue.into(),
        }
    }

    /// Refuse the next `count` connection attempts.
    pub async fn refuse_next_connects(&self, count: usize) {
        self.state.lock().await.refuse_connects = count;
    }

    /// Nack the next `count` publishes instead of queueing them.
    pub async fn nack_next_publishes(&self, count: usize) {
        self.state.lock().await.nack_publishes = count;
    }

    /// Drop the live publisher connection as if the broker went away.
    pub async fn sever(&self) {
        let mut state = self.state.lock().await;
        if let Some((id, signals)) = state.live_connection.take() {
            debug!(connection = id, "severing in-memory broker connection");
            let _ = signals.send(BrokerSignal::ConnectionClosed(
                "connection reset by broker".into(),
            ));
        }
    }

    /// Close the live publisher's channel while leaving its connection up.
    pub async fn close_channel(&self, reason: &str) {
        let state = self.state.lock().await;
        if let Some((id, signals)) = &state.live_connection {
            debug!(connection = *id, "closing in-memory broker channel");
            let _ = signals.send(BrokerSignal::ChannelClosed(reason.to_string()));
        }
    }

    /// Put a raw message body straight onto `queue`.
    pub async fn enqueue(&self, queue: &str, body: impl Into<Vec<u8>>) -> String {
        let mut state = self.state.lock().await;
        let id = push_message(&mut state, queue, body.into());
        drop(state);
        self.arrivals.notify_waiters();
        id
    }

    /// Every payload accepted by the broker, in arrival order.
    pub async fn published(&self) -> Vec<String> {
        self.state.lock().await.published.clone()
    }

    pub async fn acked(&self) -> Vec<String> {
        self.state.lock().await.acked.clone()
    }

    pub async fn unacked_len(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    pub async fn queue_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub async fn connections(&self) -> u64 {
        self.state.lock().await.connections
    }

    pub async fn connect_attempts(&self) -> u64 {
        self.state.lock().await.connect_attempts
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.live_connection.is_some()
    }
}

fn push_message(state: &mut BrokerState, queue: &str, body: Vec<u8>) -> String {
    state.next_message_id += 1;
    let id = format!("{}-0", state.next_message_id);
    state
        .queues
        .entry(queue.to_string())
        .or_default()
        .push_back(Delivery {
            id: id.clone(),
            body,
        });
    id
}

/// Publisher-side handle onto an [`InMemoryBroker`].
#[derive(Debug)]
pub struct MemoryTransport {
    broker: InMemoryBroker,
    connection: Option<u64>,
    confirms: bool,
}

impl MemoryTransport {
    async fn live_signals(&self) -> Result<SignalSender> {
        let state = self.broker.state.lock().await;
        match (&state.live_connection, self.connection) {
            (Some((live, signals)), Some(ours)) if *live == ours => Ok(signals.clone()),
            _ => Err(FerryError::ConnectivityLost("connection closed".into())),
        }
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn connect(&mut self, signals: SignalSender) -> Result<()> {
        let mut state = self.broker.state.lock().await;
        state.connect_attempts += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(FerryError::ConnectivityLost("connection refused".into()));
        }
        state.connections += 1;
        let id = state.connections;
        state.live_connection = Some((id, signals));
        self.connection = Some(id);
        self.confirms = false;
        Ok(())
    }

    async fn open_channel(&mut self) -> Result<()> {
        self.live_signals().await.map(|_| ())
    }

    async fn declare_queue(&mut self, queue: &str) -> Result<()> {
        self.live_signals().await?;
        self.broker
            .state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn enable_confirms(&mut self) -> Result<()> {
        self.live_signals().await?;
        self.confirms = true;
        Ok(())
    }

    async fn publish(&mut self, queue: &str, tag: DeliveryTag, payload: &str) -> Result<()> {
        let signals = self.live_signals().await?;
        let mut state = self.broker.state.lock().await;
        let signal = if state.nack_publishes > 0 {
            state.nack_publishes -= 1;
            BrokerSignal::Nack {
                tag,
                reason: "rejected by in-memory broker".into(),
            }
        } else {
            push_message(&mut state, queue, payload.as_bytes().to_vec());
            state.published.push(payload.to_string());
            BrokerSignal::Ack(tag)
        };
        drop(state);
        self.broker.arrivals.notify_waiters();

        if self.confirms {
            let _ = signals.send(signal);
        }
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        self.live_signals().await.map(|_| ())
    }

    async fn close_channel(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close_connection(&mut self) -> Result<()> {
        let ours = self.connection.take();
        let mut state = self.broker.state.lock().await;
        let live = state.live_connection.as_ref().map(|(id, _)| *id);
        if ours.is_some() && live == ours {
            state.live_connection = None;
        }
        Ok(())
    }
}

/// Consumer-side handle onto one queue of an [`InMemoryBroker`].
#[derive(Debug)]
pub struct MemorySource {
    broker: InMemoryBroker,
    queue: String,
}

impl MemorySource {
    async fn try_take(&self) -> Option<Delivery> {
        let mut state = self.broker.state.lock().await;
        let delivery = state.queues.get_mut(&self.queue)?.pop_front()?;
        state
            .unacked
            .insert(delivery.id.clone(), delivery.clone());
        Some(delivery)
    }
}

#[async_trait]
impl NotificationSource for MemorySource {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        let arrival = self.broker.arrivals.notified();
        if let Some(delivery) = self.try_take().await {
            return Ok(Some(delivery));
        }
        let _ = timeout(POLL_WINDOW, arrival).await;
        Ok(self.try_take().await)
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        let mut state = self.broker.state.lock().await;
        if state.unacked.remove(&delivery.id).is_none() {
            return Err(FerryError::Broker(format!(
                "ack for unknown delivery {}",
                delivery.id
            )));
        }
        state.acked.push(delivery.id.clone());
        Ok(())
    }
}
