//! Raw TCP side channel for file bodies.
//!
//! The protocol has no framing: the client writes the absolute path as UTF-8
//! once, the server answers with the file's bytes and closes. A missing file
//! is signalled only by an empty response.

pub mod client;
pub mod config;
pub mod server;

pub use client::{FileFetcher, TransferClient};
pub use config::TransferConfig;
pub use server::TransferServer;

/// Port the file server listens on and the client connects to.
pub const DEFAULT_PORT: u16 = 48463;
/// Size of the server's single request read.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 4096;
/// Size of the chunks file bodies are streamed in.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
