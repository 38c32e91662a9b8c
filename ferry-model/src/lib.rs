//! Core data model definitions shared across Ferry crates.
#![allow(missing_docs)]

pub mod delivery;
pub mod error;
pub mod notification;
pub mod transfer;
pub mod watch;

pub use delivery::{DeliveryTag, PendingDelivery};
pub use error::{ModelError, Result as ModelResult};
pub use notification::Notification;
pub use transfer::TransferRequest;
pub use watch::{WatchEvent, WatchEventMask};
