//! Newline-delimited JSON framing.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

use super::{MessageChannel, TransportError};

/// One JSON value per line. Blank lines are skipped; a final line without a
/// terminator is still delivered at end of input.
pub struct LineChannel<R, W> {
    reader: BufReader<R>,
    writer: W,
    /// Bytes of the line being read; survives a cancelled `receive`.
    pending: Vec<u8>,
    label: String,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::labeled(reader, writer, "line")
    }

    pub fn labeled(reader: R, writer: W, label: impl Into<String>) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::new(),
            label: label.into(),
        }
    }
}

impl LineChannel<Stdin, Stdout> {
    /// The process's own stdin/stdout.
    pub fn stdio() -> Self {
        Self::labeled(tokio::io::stdin(), tokio::io::stdout(), "stdio")
    }
}

#[async_trait]
impl<R, W> MessageChannel for LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<Value>, TransportError> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending).await?;
            if read == 0 && self.pending.is_empty() {
                return Ok(None);
            }
            let line = std::mem::take(&mut self.pending);
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_slice(trimmed)
                .map(Some)
                .map_err(|e| TransportError::Decode(e.to_string()));
        }
    }

    async fn send(&mut self, message: &Value) -> Result<(), TransportError> {
        let mut bytes =
            serde_json::to_vec(message).map_err(|e| TransportError::Decode(e.to_string()))?;
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn describe(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_receive_lines() {
        let (mut client, server) = duplex(1024);
        let (read_half, write_half) = split(server);
        let mut channel = LineChannel::new(read_half, write_half);

        client
            .write_all(b"{\"id\":1}\n\n   \nnot json\n{\"id\":2}\r\n{\"id\":3}")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(channel.receive().await.unwrap(), Some(json!({"id": 1})));
        assert!(matches!(channel.receive().await, Err(TransportError::Decode(_))));
        assert_eq!(channel.receive().await.unwrap(), Some(json!({"id": 2})));
        assert_eq!(channel.receive().await.unwrap(), Some(json!({"id": 3})));
        assert_eq!(channel.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decode_error() {
        let (mut client, server) = duplex(1024);
        let (read_half, write_half) = split(server);
        let mut channel = LineChannel::new(read_half, write_half);

        client.write_all(b"\xff\xfe\n{\"ok\":true}\n").await.unwrap();
        drop(client);

        assert!(matches!(channel.receive().await, Err(TransportError::Decode(_))));
        assert_eq!(channel.receive().await.unwrap(), Some(json!({"ok": true})));
        assert_eq!(channel.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_writes_one_line_per_message() {
        let (client, server) = duplex(1024);
        let (read_half, write_half) = split(server);
        let mut channel = LineChannel::new(read_half, write_half);

        channel.send(&json!({"a": 1})).await.unwrap();
        channel.send(&json!({"b": "two\nlines"})).await.unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"a":1}"#);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"b":"two\nlines"}"#);
        assert_eq!(channel.describe(), "line");
    }

    #[tokio::test]
    async fn test_cancelled_receive_keeps_partial_line() {
        let (mut client, server) = duplex(1024);
        let (read_half, write_half) = split(server);
        let mut channel = LineChannel::new(read_half, write_half);

        client.write_all(b"{\"id\":").await.unwrap();
        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            channel.receive(),
        )
        .await;
        assert!(cancelled.is_err());

        client.write_all(b"9}\n").await.unwrap();
        assert_eq!(channel.receive().await.unwrap(), Some(json!({"id": 9})));
    }
}
