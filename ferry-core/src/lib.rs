//! # Ferry Core
//!
//! Moves newly finished files from a watched directory on one host to a
//! destination directory on any number of other hosts.
//!
//! ## Overview
//!
//! A producing node watches a directory. Files that finish being written
//! are announced on a broker queue as `origin_host,origin_path,filename`
//! lines and served over a raw TCP side channel. Consuming nodes take
//! announcements off the queue and pull each file straight from its origin.
//!
//! ## Architecture
//!
//! - [`watch`]: turns filesystem events into at most one announcement per
//!   filename
//! - [`publish`]: connection state machine and the task that drains
//!   announcements into the broker with delivery confirmations
//! - [`broker`]: transport seams plus the in-memory and Redis Streams
//!   implementations
//! - [`transfer`]: the file server and its client
//! - [`consume`]: the receiving side
//!
//! ## Feature Flags
//!
//! - `redis-broker`: Redis Streams transport and source (default)
//! - `fs-watch`: notify-backed directory watcher (default)

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Broker transport and source seams
pub mod broker;
/// Receiving side: queue to local file
pub mod consume;
pub mod error;
/// Outbound queue and broker publisher
pub mod publish;
/// Raw TCP file server and client
pub mod transfer;
/// Filesystem event classification
pub mod watch;

pub use error::{FerryError, Result};
pub use ferry_model::{Notification, TransferRequest, WatchEvent, WatchEventMask};
