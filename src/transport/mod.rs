//! Transport: the message boundary between the server and its client.
//!
//! The server only ever sees whole JSON messages through [`MessageChannel`];
//! framing lives in the channel implementation:
//!
//! - **Line** ([`LineChannel`]): newline-delimited JSON over any async
//!   reader/writer pair, stdin/stdout in production.
//! - **Memory** ([`MemoryChannel`]): an in-process mpsc pair for tests and
//!   embedding.

pub mod line;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

pub use line::LineChannel;
pub use memory::{MemoryChannel, MemoryPeer};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One inbound message could not be decoded. The channel stays usable.
    #[error("undecodable message: {0}")]
    Decode(String),

    #[error("channel closed")]
    Closed,
}

/// A bidirectional channel of JSON messages.
///
/// `receive` must be cancel-safe: the server polls it inside `select!` and
/// drops the future whenever another branch wins.
#[async_trait]
pub trait MessageChannel: Send {
    /// Next inbound message, or `None` once the peer has closed its side.
    async fn receive(&mut self) -> Result<Option<Value>, TransportError>;

    async fn send(&mut self, message: &Value) -> Result<(), TransportError>;

    /// Short label for logs.
    fn describe(&self) -> &str;
}
