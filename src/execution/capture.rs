//! Bounded output capture.
//!
//! A pump reads a child's stream to EOF so the child never blocks on a full
//! pipe, keeps the first `max_bytes` and counts (but drops) the rest.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8 * 1024;

/// Bytes captured from one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    /// The retained prefix of the stream.
    pub bytes: Vec<u8>,
    /// Total bytes the stream produced, retained or not.
    pub total_bytes: u64,
    /// The pump was stopped before the stream reached EOF.
    pub interrupted: bool,
}

impl Captured {
    /// Whether any output was lost.
    pub fn truncated(&self) -> bool {
        self.interrupted || self.total_bytes > self.bytes.len() as u64
    }
}

/// Capped accumulator shared between a pump task and the adapter.
#[derive(Debug)]
pub struct CaptureBuffer {
    captured: Captured,
    max_bytes: usize,
}

impl CaptureBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            captured: Captured {
                bytes: Vec::with_capacity(max_bytes.min(64 * 1024)),
                ..Captured::default()
            },
            max_bytes,
        }
    }

    /// Append a chunk, keeping only what fits under the cap.
    pub fn push(&mut self, chunk: &[u8]) {
        self.captured.total_bytes += chunk.len() as u64;
        let room = self.max_bytes.saturating_sub(self.captured.bytes.len());
        let keep = room.min(chunk.len());
        self.captured.bytes.extend_from_slice(&chunk[..keep]);
    }

    /// Record that the pump did not reach EOF.
    pub fn mark_interrupted(&mut self) {
        self.captured.interrupted = true;
    }

    pub fn snapshot(&self) -> Captured {
        self.captured.clone()
    }

    pub fn into_captured(self) -> Captured {
        self.captured
    }
}

/// Handle to a buffer being filled by a pump.
pub type SharedCapture = Arc<Mutex<CaptureBuffer>>;

pub fn shared(max_bytes: usize) -> SharedCapture {
    Arc::new(Mutex::new(CaptureBuffer::new(max_bytes)))
}

/// Read `reader` to EOF into `sink`.
///
/// Reading continues past the cap so the writer never stalls; surplus bytes
/// are only counted.
pub async fn pump<R>(mut reader: R, sink: SharedCapture) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        sink.lock().push(&chunk[..n]);
    }
}
