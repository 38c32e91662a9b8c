//! Reliable hand-off of notifications to the broker queue.
//!
//! [`PublisherMachine`] is the connection state machine with no I/O of its
//! own; [`NotificationPublisher`] drives it against a
//! [`BrokerTransport`](crate::broker::BrokerTransport) from a single task.

pub mod config;
pub mod outbound;
pub mod publisher;
pub mod state;

pub use config::PublisherConfig;
pub use outbound::{NotificationQueue, Outbound};
pub use publisher::{NotificationPublisher, PublisherReport};
pub use state::{
    AfterClose, Confirmation, DeliveryTotals, PublisherMachine, PublisherState, ShutdownStep,
    TransitionError,
};
