//! Tool server: maps JSON-RPC 2.0 onto the dispatch engine.
//!
//! # Methods
//!
//! - `initialize`: protocol version, server info
//! - `notifications/initialized`: acknowledged silently
//! - `ping`: empty result
//! - `tools/list`: descriptors of the active profile
//! - `tools/call`: dispatch one capability call
//!
//! Calls run concurrently; each response is sent when its call completes, so
//! responses may arrive out of request order. On end of input the server
//! stops reading, waits for every in-flight call (each bounded by its own
//! deadline), sends their responses and returns.

pub mod protocol;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dispatch::DispatchEngine;
use crate::transport::{MessageChannel, TransportError};

use protocol::RpcRequest;

pub struct Server {
    engine: DispatchEngine,
}

impl Server {
    pub fn new(engine: DispatchEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    /// Serve `channel` until the peer closes it and all calls have finished.
    ///
    /// A failed send or receive counts as a disconnect: reading stops, later
    /// replies are discarded, and in-flight calls still run to completion
    /// (or their own deadline) before the error is returned.
    pub async fn run<C: MessageChannel>(&self, mut channel: C) -> Result<(), TransportError> {
        info!(
            transport = channel.describe(),
            profile = %self.engine.profile().id(),
            capabilities = self.engine.profile().len(),
            "tool server started"
        );
        let (replies, mut pending_replies) = mpsc::unbounded_channel::<Value>();
        let mut calls: JoinSet<()> = JoinSet::new();
        let mut reading = true;
        let mut failure: Option<TransportError> = None;

        loop {
            let reply = tokio::select! {
                inbound = channel.receive(), if reading => match inbound {
                    Ok(Some(message)) => self.handle(message, &replies, &mut calls),
                    Ok(None) => {
                        info!(in_flight = calls.len(), "end of input, draining calls");
                        reading = false;
                        None
                    }
                    Err(TransportError::Decode(e)) => {
                        warn!(error = %e, "discarding undecodable message");
                        Some(protocol::failure(Value::Null, protocol::PARSE_ERROR, format!("Parse error: {}", e)))
                    }
                    Err(e) => {
                        error!(error = %e, in_flight = calls.len(), "receive failed, draining calls");
                        failure = Some(e);
                        None
                    }
                },
                Some(reply) = pending_replies.recv() => Some(reply),
                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "call task failed");
                    }
                    None
                }
            };
            if let Some(reply) = reply {
                deliver(&mut channel, &reply, &mut failure).await;
            }
            if failure.is_some() {
                reading = false;
            }
            if !reading && calls.is_empty() {
                break;
            }
        }

        while let Ok(reply) = pending_replies.try_recv() {
            deliver(&mut channel, &reply, &mut failure).await;
        }
        match failure {
            Some(e) => Err(e),
            None => {
                info!("tool server stopped");
                Ok(())
            }
        }
    }

    /// Handle one message. Returns the immediate reply, if any; `tools/call`
    /// replies later through `replies`.
    fn handle(
        &self,
        message: Value,
        replies: &mpsc::UnboundedSender<Value>,
        calls: &mut JoinSet<()>,
    ) -> Option<Value> {
        let request = match RpcRequest::parse(message) {
            Ok(request) => request,
            Err(reply) => return Some(reply),
        };
        let Some(id) = request.id else {
            debug!(method = %request.method, "notification");
            return None;
        };

        match request.method.as_str() {
            "initialize" => Some(protocol::success(
                id,
                protocol::initialize_result(self.engine.profile().id()),
            )),
            "ping" => Some(protocol::success(id, json!({}))),
            "tools/list" => Some(protocol::success(
                id,
                protocol::tools_list_result(self.engine.discover()),
            )),
            "tools/call" => match protocol::call_request(&id, &request.params) {
                Ok(call) => {
                    debug!(capability = %call.capability_name, id = %id, "call received");
                    let engine = self.engine.clone();
                    let replies = replies.clone();
                    calls.spawn(async move {
                        let outcome = engine.dispatch(call).await;
                        // The receiver outlives every call task.
                        let _ = replies.send(protocol::success(id, protocol::call_result(&outcome)));
                    });
                    None
                }
                Err(message) => Some(protocol::failure(id, protocol::INVALID_PARAMS, message)),
            },
            method => Some(protocol::failure(
                id,
                protocol::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            )),
        }
    }
}

/// Send `reply` unless the channel already failed; the first send error is
/// kept in `failure`.
async fn deliver<C: MessageChannel>(
    channel: &mut C,
    reply: &Value,
    failure: &mut Option<TransportError>,
) {
    if failure.is_some() {
        debug!(id = %reply["id"], "peer gone, reply discarded");
        return;
    }
    if let Err(e) = channel.send(reply).await {
        error!(error = %e, "send failed, treating peer as disconnected");
        *failure = Some(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::capabilities::{
        ArgSchema, Args, Capability, CapabilityRegistry, Category, InputSchema, ProfileId,
    };
    use crate::execution::{ExecutionPlan, ProcessAdapter, RawResult};
    use crate::normalize::{self, NormalizeError};
    use crate::transport::{LineChannel, MemoryChannel, MemoryPeer};

    fn echo_after(raw: &RawResult, _: &Value) -> Result<Value, NormalizeError> {
        normalize::require_success(raw)?;
        Ok(json!({ "said": normalize::stdout_text(raw)?.trim() }))
    }

    fn test_engine() -> DispatchEngine {
        let mut registry = CapabilityRegistry::new();
        let say = Capability::new(
            "say",
            "Print 'word' after 'delay' seconds",
            Category::UiAutomation,
            InputSchema::new(vec![
                ArgSchema::string("word", "what to print").required(),
                ArgSchema::number("delay", "seconds to wait"),
            ])
            .unwrap(),
            |args| {
                let args = Args::new(args);
                let delay = args.f64("delay").unwrap_or(0.0).to_string();
                Ok(ExecutionPlan::new("/bin/sh")
                    .args(["-c", "sleep \"$1\"; echo \"$2\"", "sh"])
                    .arg(delay)
                    .arg(args.required_str("word")?)
                    .with_timeout(Duration::from_secs(10)))
            },
            echo_after,
        );
        let hidden = Capability::new(
            "hidden",
            "Only in the full profile",
            Category::Performance,
            InputSchema::empty(),
            |_| Ok(ExecutionPlan::new("true")),
            echo_after,
        );
        registry.register(ProfileId::Minimal, say).unwrap();
        registry.register(ProfileId::Full, hidden).unwrap();
        DispatchEngine::new(registry.activate(ProfileId::Minimal), Arc::new(ProcessAdapter::new()))
    }

    fn start() -> (MemoryPeer, tokio::task::JoinHandle<Result<(), TransportError>>) {
        let (channel, peer) = MemoryChannel::pair();
        let server = Server::new(test_engine());
        let handle = tokio::spawn(async move { server.run(channel).await });
        (peer, handle)
    }

    fn call(id: i64, name: &str, arguments: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": "tools/call", "params": {"name": name, "arguments": arguments}})
    }

    #[tokio::test]
    async fn test_initialize_and_ping() {
        let (mut peer, handle) = start();
        peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})).unwrap();
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["protocolVersion"], protocol::PROTOCOL_VERSION);
        assert_eq!(reply["result"]["serverInfo"]["name"], "xcprobe");

        peer.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).unwrap();
        peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})).unwrap();
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 2, "result": {}}));

        peer.close();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tools_list_shows_active_profile_only() {
        let (mut peer, handle) = start();
        peer.send(json!({"jsonrpc": "2.0", "id": "l", "method": "tools/list"})).unwrap();
        let reply = peer.recv().await.unwrap();
        let tools = reply["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "say");
        assert_eq!(tools[0]["inputSchema"]["type"], "object");
        assert_eq!(tools[0]["inputSchema"]["additionalProperties"], false);
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["word"]));

        peer.close();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_call_errors_are_results() {
        let (mut peer, handle) = start();
        peer.send(call(5, "hidden", json!({}))).unwrap();
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["result"]["isError"], true);
        assert_eq!(reply["result"]["structuredContent"]["kind"], "UnknownCapability");
        assert_eq!(reply["result"]["structuredContent"]["requestId"], 5);

        peer.send(call(6, "say", json!({"word": 3}))).unwrap();
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply["result"]["structuredContent"]["kind"], "InvalidArguments");

        peer.close();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let (mut peer, handle) = start();
        peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {}})).unwrap();
        assert_eq!(peer.recv().await.unwrap()["error"]["code"], protocol::INVALID_PARAMS);

        peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "resources/list"})).unwrap();
        assert_eq!(peer.recv().await.unwrap()["error"]["code"], protocol::METHOD_NOT_FOUND);

        peer.send(json!({"jsonrpc": "2.0", "id": 3})).unwrap();
        assert_eq!(peer.recv().await.unwrap()["error"]["code"], protocol::INVALID_REQUEST);

        peer.close();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_parse_error_over_line_channel() {
        use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

        let (client, server_side) = duplex(4096);
        let (read_half, write_half) = split(server_side);
        let server = Server::new(test_engine());
        let handle = tokio::spawn(async move { server.run(LineChannel::new(read_half, write_half)).await });

        let (client_read, mut client_write) = split(client);
        client_write
            .write_all(b"{not json\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let mut lines = BufReader::new(client_read).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["error"]["code"], protocol::PARSE_ERROR);
        assert_eq!(first["id"], Value::Null);
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["id"], 1);

        client_write.shutdown().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_responses_in_completion_order() {
        let (mut peer, handle) = start();
        peer.send(call(1, "say", json!({"word": "slow", "delay": 1}))).unwrap();
        peer.send(call(2, "say", json!({"word": "fast"}))).unwrap();

        let first = peer.recv().await.unwrap();
        let second = peer.recv().await.unwrap();
        assert_eq!(first["id"], 2);
        assert_eq!(first["result"]["structuredContent"]["said"], "fast");
        assert_eq!(second["id"], 1);
        assert_eq!(second["result"]["structuredContent"]["said"], "slow");

        peer.close();
        handle.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_end_of_input_drains_in_flight_calls() {
        let (mut peer, handle) = start();
        peer.send(call(7, "say", json!({"word": "late", "delay": 0.5}))).unwrap();
        peer.close();

        handle.await.unwrap().unwrap();
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["result"]["structuredContent"]["said"], "late");
        assert_eq!(peer.recv().await, None);
    }

    /// Reads from a memory pair but cannot write back.
    struct BrokenPipeChannel(MemoryChannel);

    #[async_trait::async_trait]
    impl MessageChannel for BrokenPipeChannel {
        async fn receive(&mut self) -> Result<Option<Value>, TransportError> {
            self.0.receive().await
        }

        async fn send(&mut self, _: &Value) -> Result<(), TransportError> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into())
        }

        fn describe(&self) -> &str {
            "broken pipe"
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_failure_lets_in_flight_calls_finish() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");

        let mut registry = CapabilityRegistry::new();
        let touch = Capability::new(
            "touch",
            "Create 'path' after a second",
            Category::Performance,
            InputSchema::new(vec![ArgSchema::string("path", "file to create").required()]).unwrap(),
            |args| {
                Ok(ExecutionPlan::new("/bin/sh")
                    .args(["-c", "sleep 1; touch \"$1\"", "sh"])
                    .arg(Args::new(args).required_str("path")?)
                    .with_timeout(Duration::from_secs(10)))
            },
            |raw, _| {
                normalize::require_success(raw)?;
                Ok(json!({}))
            },
        );
        registry.register(ProfileId::Minimal, touch).unwrap();
        let engine =
            DispatchEngine::new(registry.activate(ProfileId::Minimal), Arc::new(ProcessAdapter::new()));

        let (channel, peer) = MemoryChannel::pair();
        peer.send(call(1, "touch", json!({"path": marker.to_string_lossy()}))).unwrap();
        peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})).unwrap();

        let started = std::time::Instant::now();
        let result = Server::new(engine).run(BrokenPipeChannel(channel)).await;

        assert!(matches!(result, Err(TransportError::Io(_))));
        assert!(marker.exists());
        assert!(started.elapsed() >= Duration::from_millis(900));
    }
}
