//! Filesystem watch pipeline for the producing node.
//!
//! Raw notifications from the OS are translated into [`WatchEvent`]s, run
//! through the [`EventClassifier`], and accepted files are handed to the
//! publisher queue as [`Notification`]s.
//!
//! [`WatchEvent`]: ferry_model::WatchEvent
//! [`Notification`]: ferry_model::Notification

pub mod address;
pub mod classifier;
pub mod config;
#[cfg(feature = "fs-watch")]
pub mod notify_adapter;

pub use address::resolve_node_address;
pub use classifier::{Classification, EventClassifier, RejectReason};
pub use config::WatchConfig;
#[cfg(feature = "fs-watch")]
pub use notify_adapter::{DirectoryWatcher, translate_event};
