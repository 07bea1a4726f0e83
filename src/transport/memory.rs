//! In-process channel pair.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{MessageChannel, TransportError};

/// Server side of an in-process pair.
pub struct MemoryChannel {
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Value>,
}

/// Client side of an in-process pair.
pub struct MemoryPeer {
    to_server: Option<mpsc::UnboundedSender<Value>>,
    from_server: mpsc::UnboundedReceiver<Value>,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryChannel, MemoryPeer) {
        let (to_server, inbound) = mpsc::unbounded_channel();
        let (outbound, from_server) = mpsc::unbounded_channel();
        (
            MemoryChannel { inbound, outbound },
            MemoryPeer {
                to_server: Some(to_server),
                from_server,
            },
        )
    }
}

impl MemoryPeer {
    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        self.to_server
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    /// Next message from the server; `None` once the server side is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.from_server.recv().await
    }

    /// Close the client's sending side; the server then sees end of input.
    pub fn close(&mut self) {
        self.to_server = None;
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn receive(&mut self) -> Result<Option<Value>, TransportError> {
        Ok(self.inbound.recv().await)
    }

    async fn send(&mut self, message: &Value) -> Result<(), TransportError> {
        self.outbound
            .send(message.clone())
            .map_err(|_| TransportError::Closed)
    }

    fn describe(&self) -> &str {
        "memory"
    }
}
