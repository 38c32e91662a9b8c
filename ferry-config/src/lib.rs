//! Configuration for Ferry nodes.
//!
//! Settings come from, in increasing precedence: built-in defaults, a TOML
//! file, `.env`, the process environment, and finally command-line flags
//! (applied by the binary). Every section is optional in the file.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod util;

pub use loader::{ConfigLoad, ConfigLoader, ConfigSource, error::ConfigLoadError};
pub use models::{
    BrokerConfig, Config, ConsumerSettings, PublisherSettings, TransferSettings, WatchSettings,
};
