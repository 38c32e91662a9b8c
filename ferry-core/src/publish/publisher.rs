use std::fmt;

use ferry_model::{DeliveryTag, PendingDelivery};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerSignal, BrokerTransport, SignalReceiver};
use crate::error::{FerryError, Result};
use crate::publish::state::{AfterClose, Confirmation, DeliveryTotals, ShutdownStep};
use crate::publish::{Outbound, PublisherConfig, PublisherMachine, PublisherState};

/// Summary handed back when the publisher stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherReport {
    /// Number of connections that reached the established state.
    pub epochs: u64,
    pub totals: DeliveryTotals,
    /// Deliveries of the last epoch the broker never confirmed.
    pub unconfirmed: Vec<PendingDelivery>,
    /// Notifications still waiting in the outbound queue.
    pub queued: usize,
}

/// Publishes queued notifications to the broker, one per tick, reconnecting
/// forever on failure.
///
/// All state lives in this value and is only touched from [`run`], so the
/// machine needs no locking.
///
/// [`run`]: NotificationPublisher::run
pub struct NotificationPublisher<T: BrokerTransport> {
    transport: T,
    config: PublisherConfig,
    machine: PublisherMachine,
    outbound: Outbound,
    signals: Option<SignalReceiver>,
    reconnect_at: Instant,
}

impl<T: BrokerTransport> fmt::Debug for NotificationPublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationPublisher")
            .field("transport_type", &std::any::type_name::<T>())
            .field("config", &self.config)
            .field("state", &self.machine.state())
            .field("epoch", &self.machine.epoch())
            .field("pending", &self.machine.pending_len())
            .field("queued", &self.outbound.len())
            .finish()
    }
}

impl<T: BrokerTransport> NotificationPublisher<T> {
    pub fn new(transport: T, config: PublisherConfig, outbound: Outbound) -> Self {
        Self {
            transport,
            config,
            machine: PublisherMachine::new(),
            outbound,
            signals: None,
            reconnect_at: Instant::now(),
        }
    }

    pub fn state(&self) -> PublisherState {
        self.machine.state()
    }

    /// Drive the connection until `token` is cancelled, then unwind through
    /// the clean shutdown sequence.
    pub async fn run(mut self, token: CancellationToken) -> Result<PublisherReport> {
        info!(queue = %self.config.queue, "publisher starting");

        while !self.machine.is_stopping() {
            match self.machine.state() {
                PublisherState::Disconnected => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            self.machine.begin_shutdown();
                        }
                        _ = sleep_until(self.reconnect_at) => {
                            tokio::select! {
                                _ = token.cancelled() => {
                                    self.abandon_connect().await;
                                }
                                result = self.establish() => {
                                    if let Err(err) = result {
                                        self.on_connection_lost(&err.to_string()).await;
                                    }
                                }
                            }
                        }
                    }
                }
                PublisherState::Publishing => self.publish_until_interrupted(&token).await,
                other => {
                    // establish() and the close paths always finish in
                    // Disconnected or Publishing.
                    return Err(FerryError::Internal(format!(
                        "publisher loop observed transient state {other}"
                    )));
                }
            }
        }

        self.shutdown().await;
        Ok(self.report())
    }

    /// Walk a fresh connection from `Connecting` up to `Publishing`.
    async fn establish(&mut self) -> Result<()> {
        self.machine.begin_connect().map_err(internal)?;
        info!("Connecting to broker");

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(err) = self.transport.connect(tx).await {
            self.signals = None;
            let after = self.machine.connect_failed().map_err(internal)?;
            self.schedule_after(after, &err);
            return Ok(());
        }
        self.signals = Some(rx);
        let epoch = self.machine.connection_opened().map_err(internal)?;
        info!(epoch, "Connection opened");

        self.machine.open_channel().map_err(internal)?;
        self.transport.open_channel().await?;
        self.machine.channel_opened().map_err(internal)?;
        debug!(epoch, "Channel opened");

        let queue = self.config.queue.clone();
        self.transport.declare_queue(&queue).await?;
        self.machine.queue_declared().map_err(internal)?;
        debug!(epoch, queue = %queue, "Queue declared");

        self.transport.enable_confirms().await?;
        self.machine.confirms_enabled().map_err(internal)?;
        info!(
            epoch,
            interval_ms = self.config.publish_interval_ms,
            queued = self.outbound.len(),
            "publishing enabled"
        );
        Ok(())
    }

    /// Cancellation landed mid-connect; drop whatever half-open connection
    /// exists.
    async fn abandon_connect(&mut self) {
        match self.machine.begin_shutdown() {
            ShutdownStep::AlreadyDisconnected => {}
            ShutdownStep::CloseChannel | ShutdownStep::CloseConnection => {
                if let Err(err) = self.transport.close_connection().await {
                    warn!("error closing half-open connection: {err}");
                }
                let _ = self.machine.connection_closed();
            }
        }
        self.signals = None;
    }

    async fn publish_until_interrupted(&mut self, token: &CancellationToken) {
        let publish_every = self.config.publish_interval();
        let heartbeat_every = self.config.heartbeat_interval();
        let mut publish_tick = interval_at(Instant::now() + publish_every, publish_every);
        publish_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_tick = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.machine.state() == PublisherState::Publishing {
            let Some(signals) = self.signals.as_mut() else {
                self.on_connection_lost("signal channel missing").await;
                return;
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.machine.begin_shutdown();
                    return;
                }
                signal = signals.recv() => match signal {
                    Some(signal) => self.on_signal(signal).await,
                    None => self.on_connection_lost("broker signal channel closed").await,
                },
                _ = publish_tick.tick() => self.publish_next().await,
                _ = heartbeat_tick.tick() => {
                    if let Err(err) = self.transport.heartbeat().await {
                        self.on_connection_lost(&err.to_string()).await;
                    }
                }
            }
        }
    }

    async fn publish_next(&mut self) {
        let Some(notification) = self.outbound.pop() else {
            return;
        };

        let payload = notification.encode();
        let tag = self.machine.upcoming_tag();
        let queue = self.config.queue.clone();

        match self.transport.publish(&queue, tag, &payload).await {
            Ok(()) => match self.machine.record_publish(payload) {
                Ok(tag) => info!(%tag, "Published message # {}", tag),
                Err(err) => error!("publish bookkeeping failed: {err}"),
            },
            Err(err) => {
                // Never reached the broker, so it keeps its place in line.
                self.outbound.requeue(notification);
                self.on_connection_lost(&err.to_string()).await;
            }
        }
    }

    async fn on_signal(&mut self, signal: BrokerSignal) {
        match signal {
            BrokerSignal::Ack(tag) => self.confirm(tag, true, None),
            BrokerSignal::Nack { tag, reason } => self.confirm(tag, false, Some(&reason)),
            BrokerSignal::ChannelClosed(reason) => {
                warn!("Channel was closed: {}", reason);
                if self.machine.channel_closed().is_ok() {
                    if let Err(err) = self.transport.close_connection().await {
                        debug!("close after channel loss failed: {err}");
                    }
                    self.closed(&reason);
                }
            }
            BrokerSignal::ConnectionClosed(reason) => self.closed(&reason),
        }
    }

    fn confirm(&mut self, tag: DeliveryTag, positive: bool, reason: Option<&str>) {
        match self.machine.confirm(tag, positive) {
            Ok(Confirmation::Acked(_)) => {
                info!(%tag, acked = self.machine.acked(), "Received ack for delivery tag {}", tag);
            }
            Ok(Confirmation::Nacked(delivery)) => {
                let err = FerryError::DeliveryRejected {
                    tag: tag.0,
                    reason: reason.unwrap_or("unspecified").to_string(),
                };
                warn!(
                    nacked = self.machine.nacked(),
                    payload = %delivery.payload,
                    "{err}; notification dropped"
                );
            }
            Err(err) => warn!("ignoring confirmation: {err}"),
        }
    }

    /// Unexpected failure on a live connection: tear it down and schedule
    /// the next attempt.
    async fn on_connection_lost(&mut self, reason: &str) {
        if self.machine.state().is_connected() {
            if let Err(err) = self.transport.close_connection().await {
                debug!("close after connection loss failed: {err}");
            }
            self.closed(reason);
        }
    }

    fn closed(&mut self, reason: &str) {
        self.signals = None;
        match self.machine.connection_closed() {
            Ok(after) => {
                let err = FerryError::ConnectivityLost(reason.to_string());
                self.schedule_after(after, &err);
            }
            Err(err) => debug!("close ignored: {err}"),
        }
    }

    fn schedule_after(&mut self, after: AfterClose, err: &FerryError) {
        if after == AfterClose::Reconnect {
            let delay = self.config.reconnect_delay();
            self.reconnect_at = Instant::now() + delay;
            warn!(
                delay_ms = self.config.reconnect_delay_ms,
                queued = self.outbound.len(),
                "{err}; trying again in {:?}",
                delay
            );
        }
    }

    /// Clean shutdown: channel, then connection, then wait for the broker to
    /// confirm before returning.
    async fn shutdown(&mut self) {
        info!("Stopping");
        match self.machine.state() {
            PublisherState::ChannelClosing => {
                info!("Closing channel");
                if let Err(err) = self.transport.close_channel().await {
                    warn!("error closing channel: {err}");
                }
                let _ = self.machine.channel_closed();
                self.close_connection().await;
            }
            PublisherState::ConnectionClosing => self.close_connection().await,
            _ => {}
        }
        info!("Stopped");
    }

    async fn close_connection(&mut self) {
        info!("Closing connection");
        if let Err(err) = self.transport.close_connection().await {
            warn!("error closing connection: {err}");
        }
        // Confirmations that raced the close are still counted.
        if let Some(mut signals) = self.signals.take() {
            while let Ok(signal) = signals.try_recv() {
                match signal {
                    BrokerSignal::Ack(tag) => self.confirm(tag, true, None),
                    BrokerSignal::Nack { tag, reason } => {
                        self.confirm(tag, false, Some(&reason))
                    }
                    BrokerSignal::ChannelClosed(_) | BrokerSignal::ConnectionClosed(_) => {}
                }
            }
        }
        let _ = self.machine.connection_closed();
    }

    fn report(&self) -> PublisherReport {
        PublisherReport {
            epochs: self.machine.epoch(),
            totals: self.machine.totals(),
            unconfirmed: self.machine.pending().cloned().collect(),
            queued: self.outbound.len(),
        }
    }
}

fn internal(err: impl std::fmt::Display) -> FerryError {
    FerryError::Internal(err.to_string())
}
