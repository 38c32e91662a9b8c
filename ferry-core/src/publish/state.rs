//! Connection lifecycle of the notification publisher.
//!
//! ```text
//! Disconnected → Connecting → ConnectionEstablished → ChannelOpening → ChannelOpen
//!      ↑                                                                   │
//!      │                                                              QueueReady
//!      │                                                                   │
//!      └──── ConnectionClosing ←── ChannelClosing ←──────────────── Publishing
//! ```
//!
//! Every successful connect starts a new epoch: delivery tags restart at 1
//! and the pending-delivery list and ack/nack counters are cleared. Lifetime
//! totals survive across epochs.

use std::collections::VecDeque;
use std::fmt;

use ferry_model::{DeliveryTag, PendingDelivery};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublisherState {
    Disconnected,
    Connecting,
    ConnectionEstablished,
    ChannelOpening,
    ChannelOpen,
    QueueReady,
    Publishing,
    ChannelClosing,
    ConnectionClosing,
}

impl PublisherState {
    /// States in which a broker connection exists.
    pub fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting)
    }
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {event} while {from}")]
    Invalid {
        from: PublisherState,
        event: &'static str,
    },

    #[error("no pending delivery with tag {0}")]
    UnknownTag(DeliveryTag),
}

/// What the caller should do after the connection has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterClose {
    /// Unexpected loss: schedule a reconnect after the fixed delay.
    Reconnect,
    /// Deliberate shutdown finished.
    Stop,
}

/// First step of a deliberate shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    CloseChannel,
    CloseConnection,
    AlreadyDisconnected,
}

/// Result of a broker confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Acked(PendingDelivery),
    Nacked(PendingDelivery),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryTotals {
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
}

#[derive(Debug, Clone)]
pub struct PublisherMachine {
    state: PublisherState,
    stopping: bool,
    epoch: u64,
    next_tag: DeliveryTag,
    pending: VecDeque<PendingDelivery>,
    acked: u64,
    nacked: u64,
    totals: DeliveryTotals,
}

impl Default for PublisherMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PublisherMachine {
    pub fn new() -> Self {
        Self {
            state: PublisherState::Disconnected,
            stopping: false,
            epoch: 0,
            next_tag: DeliveryTag::FIRST,
            pending: VecDeque::new(),
            acked: 0,
            nacked: 0,
            totals: DeliveryTotals::default(),
        }
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn acked(&self) -> u64 {
        self.acked
    }

    pub fn nacked(&self) -> u64 {
        self.nacked
    }

    pub fn totals(&self) -> DeliveryTotals {
        self.totals
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingDelivery> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Tag the next successful publish will carry.
    pub fn upcoming_tag(&self) -> DeliveryTag {
        self.next_tag
    }

    fn require(
        &self,
        allowed: &[PublisherState],
        event: &'static str,
    ) -> Result<(), TransitionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TransitionError::Invalid {
                from: self.state,
                event,
            })
        }
    }

    pub fn begin_connect(&mut self) -> Result<(), TransitionError> {
        self.require(&[PublisherState::Disconnected], "connect")?;
        if self.stopping {
            return Err(TransitionError::Invalid {
                from: self.state,
                event: "connect after stop",
            });
        }
        self.state = PublisherState::Connecting;
        Ok(())
    }

    /// Connect attempt failed before a connection existed.
    pub fn connect_failed(&mut self) -> Result<AfterClose, TransitionError> {
        self.require(&[PublisherState::Connecting], "fail connect")?;
        self.state = PublisherState::Disconnected;
        Ok(self.after_close())
    }

    /// Connection is up; a fresh epoch begins.
    pub fn connection_opened(&mut self) -> Result<u64, TransitionError> {
        self.require(&[PublisherState::Connecting], "open connection")?;
        self.epoch += 1;
        self.next_tag = DeliveryTag::FIRST;
        self.pending.clear();
        self.acked = 0;
        self.nacked = 0;
        self.state = PublisherState::ConnectionEstablished;
        Ok(self.epoch)
    }

    pub fn open_channel(&mut self) -> Result<(), TransitionError> {
        self.require(&[PublisherState::ConnectionEstablished], "open channel")?;
        self.state = PublisherState::ChannelOpening;
        Ok(())
    }

    pub fn channel_opened(&mut self) -> Result<(), TransitionError> {
        self.require(&[PublisherState::ChannelOpening], "finish opening channel")?;
        self.state = PublisherState::ChannelOpen;
        Ok(())
    }

    pub fn queue_declared(&mut self) -> Result<(), TransitionError> {
        self.require(&[PublisherState::ChannelOpen], "declare queue")?;
        self.state = PublisherState::QueueReady;
        Ok(())
    }

    /// Delivery confirmations are on; steady-state publishing begins.
    pub fn confirms_enabled(&mut self) -> Result<(), TransitionError> {
        self.require(&[PublisherState::QueueReady], "enable confirms")?;
        self.state = PublisherState::Publishing;
        Ok(())
    }

    /// Record a payload the broker accepted for delivery.
    pub fn record_publish(&mut self, payload: String) -> Result<DeliveryTag, TransitionError> {
        self.require(&[PublisherState::Publishing], "publish")?;
        let tag = self.next_tag;
        self.next_tag = tag.next();
        self.pending.push_back(PendingDelivery { tag, payload });
        self.totals.published += 1;
        Ok(tag)
    }

    /// Apply an ack (`positive`) or nack for `tag`. Nacked payloads are
    /// returned to the caller for logging and are not retried.
    pub fn confirm(
        &mut self,
        tag: DeliveryTag,
        positive: bool,
    ) -> Result<Confirmation, TransitionError> {
        let index = self
            .pending
            .iter()
            .position(|pending| pending.tag == tag)
            .ok_or(TransitionError::UnknownTag(tag))?;
        let Some(delivery) = self.pending.remove(index) else {
            return Err(TransitionError::UnknownTag(tag));
        };

        if positive {
            self.acked += 1;
            self.totals.acked += 1;
            Ok(Confirmation::Acked(delivery))
        } else {
            self.nacked += 1;
            self.totals.nacked += 1;
            Ok(Confirmation::Nacked(delivery))
        }
    }

    /// Start a deliberate shutdown. Publishing stops immediately.
    pub fn begin_shutdown(&mut self) -> ShutdownStep {
        self.stopping = true;
        match self.state {
            PublisherState::Disconnected | PublisherState::Connecting => {
                self.state = PublisherState::Disconnected;
                ShutdownStep::AlreadyDisconnected
            }
            PublisherState::ConnectionEstablished | PublisherState::ConnectionClosing => {
                self.state = PublisherState::ConnectionClosing;
                ShutdownStep::CloseConnection
            }
            PublisherState::ChannelOpening
            | PublisherState::ChannelOpen
            | PublisherState::QueueReady
            | PublisherState::Publishing
            | PublisherState::ChannelClosing => {
                self.state = PublisherState::ChannelClosing;
                ShutdownStep::CloseChannel
            }
        }
    }

    /// The channel is gone, deliberately or not. Either way the connection
    /// is closed next.
    pub fn channel_closed(&mut self) -> Result<(), TransitionError> {
        if !self.state.is_connected() {
            return Err(TransitionError::Invalid {
                from: self.state,
                event: "close channel",
            });
        }
        self.state = PublisherState::ConnectionClosing;
        Ok(())
    }

    /// The connection is gone. Valid from any connected state.
    pub fn connection_closed(&mut self) -> Result<AfterClose, TransitionError> {
        if !self.state.is_connected() {
            return Err(TransitionError::Invalid {
                from: self.state,
                event: "close connection",
            });
        }
        self.state = PublisherState::Disconnected;
        Ok(self.after_close())
    }

    fn after_close(&self) -> AfterClose {
        if self.stopping {
            AfterClose::Stop
        } else {
            AfterClose::Reconnect
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publishing() -> PublisherMachine {
        let mut machine = PublisherMachine::new();
        machine.begin_connect().unwrap();
        machine.connection_opened().unwrap();
        machine.open_channel().unwrap();
        machine.channel_opened().unwrap();
        machine.queue_declared().unwrap();
        machine.confirms_enabled().unwrap();
        machine
    }

    #[test]
    fn walks_the_happy_path() {
        let machine = publishing();
        assert_eq!(machine.state(), PublisherState::Publishing);
        assert_eq!(machine.epoch(), 1);
        assert_eq!(machine.upcoming_tag(), DeliveryTag::FIRST);
    }

    #[test]
    fn rejects_out_of_order_transitions() {
        let mut machine = PublisherMachine::new();
        assert_eq!(
            machine.open_channel(),
            Err(TransitionError::Invalid {
                from: PublisherState::Disconnected,
                event: "open channel",
            })
        );
        assert!(machine.record_publish("x".into()).is_err());
        machine.begin_connect().unwrap();
        assert!(machine.begin_connect().is_err());
    }

    #[test]
    fn tags_are_sequential_within_an_epoch() {
        let mut machine = publishing();
        let tags: Vec<_> = (0..3)
            .map(|i| machine.record_publish(format!("m{i}")).unwrap())
            .collect();
        assert_eq!(tags, vec![DeliveryTag(1), DeliveryTag(2), DeliveryTag(3)]);
        assert_eq!(machine.pending_len(), 3);
    }

    #[test]
    fn ack_removes_exactly_one_pending_delivery() {
        let mut machine = publishing();
        machine.record_publish("a".into()).unwrap();
        machine.record_publish("b".into()).unwrap();
        machine.record_publish("c".into()).unwrap();

        let confirmation = machine.confirm(DeliveryTag(2), true).unwrap();
        assert_eq!(
            confirmation,
            Confirmation::Acked(PendingDelivery {
                tag: DeliveryTag(2),
                payload: "b".into(),
            })
        );
        let remaining: Vec<_> = machine.pending().map(|p| p.tag).collect();
        assert_eq!(remaining, vec![DeliveryTag(1), DeliveryTag(3)]);
        assert_eq!((machine.acked(), machine.nacked()), (1, 0));
    }

    #[test]
    fn nack_removes_and_counts_without_republishing() {
        let mut machine = publishing();
        machine.record_publish("a".into()).unwrap();

        let confirmation = machine.confirm(DeliveryTag(1), false).unwrap();
        assert!(matches!(confirmation, Confirmation::Nacked(_)));
        assert_eq!(machine.pending_len(), 0);
        assert_eq!((machine.acked(), machine.nacked()), (0, 1));
        assert_eq!(machine.upcoming_tag(), DeliveryTag(2));
        assert_eq!(machine.totals().published, 1);
    }

    #[test]
    fn unknown_tag_is_reported() {
        let mut machine = publishing();
        assert_eq!(
            machine.confirm(DeliveryTag(9), true),
            Err(TransitionError::UnknownTag(DeliveryTag(9)))
        );
    }

    #[test]
    fn unexpected_close_asks_for_reconnect_and_new_epoch_resets() {
        let mut machine = publishing();
        machine.record_publish("a".into()).unwrap();
        machine.confirm(DeliveryTag(1), true).unwrap();
        machine.record_publish("b".into()).unwrap();

        assert_eq!(machine.connection_closed(), Ok(AfterClose::Reconnect));
        assert_eq!(machine.state(), PublisherState::Disconnected);

        machine.begin_connect().unwrap();
        assert_eq!(machine.connection_opened(), Ok(2));
        assert_eq!(machine.pending_len(), 0);
        assert_eq!((machine.acked(), machine.nacked()), (0, 0));
        assert_eq!(machine.upcoming_tag(), DeliveryTag::FIRST);
        assert_eq!(machine.totals().acked, 1);
        assert_eq!(machine.totals().published, 2);
    }

    #[test]
    fn failed_connect_schedules_reconnect() {
        let mut machine = PublisherMachine::new();
        machine.begin_connect().unwrap();
        assert_eq!(machine.connect_failed(), Ok(AfterClose::Reconnect));
        assert_eq!(machine.epoch(), 0);
    }

    #[test]
    fn channel_loss_closes_the_connection() {
        let mut machine = publishing();
        machine.channel_closed().unwrap();
        assert_eq!(machine.state(), PublisherState::ConnectionClosing);
        assert_eq!(machine.connection_closed(), Ok(AfterClose::Reconnect));
    }

    #[test]
    fn shutdown_unwinds_channel_then_connection() {
        let mut machine = publishing();
        assert_eq!(machine.begin_shutdown(), ShutdownStep::CloseChannel);
        assert_eq!(machine.state(), PublisherState::ChannelClosing);
        machine.channel_closed().unwrap();
        assert_eq!(machine.connection_closed(), Ok(AfterClose::Stop));
        assert!(machine.begin_connect().is_err());
    }

    #[test]
    fn shutdown_while_disconnected_is_immediate() {
        let mut machine = PublisherMachine::new();
        assert_eq!(machine.begin_shutdown(), ShutdownStep::AlreadyDisconnected);
        assert_eq!(machine.state(), PublisherState::Disconnected);
    }
}
