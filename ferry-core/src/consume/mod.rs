//! Receiving side: take announcements off the queue and pull each file from
//! its origin.

pub mod config;
pub mod consumer;

pub use config::ConsumerConfig;
pub use consumer::{ConsumerStats, NotificationConsumer, Outcome};
