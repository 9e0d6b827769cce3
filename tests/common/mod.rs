//! Shared helpers for socket-level integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use mcp_context_bridge::host::registry::{ToolDescriptor, handler_fn};
use mcp_context_bridge::host::{HostConfig, McpBridgeHost};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

pub const SECRET: &str = "integration-secret";

/// A started host on a socket inside a fresh temp dir.
pub struct TestHost {
    pub host: McpBridgeHost,
    _dir: TempDir,
}

impl TestHost {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let host = McpBridgeHost::open(HostConfig {
            secret: Some(SECRET.into()),
            socket_path: Some(dir.path().join("host.sock")),
            auto_start: true,
            debug: true,
        })
        .await
        .unwrap();
        Self { host, _dir: dir }
    }

    pub fn register(&self, name: &str, handler: mcp_context_bridge::host::registry::ToolHandler) {
        self.host.register_tool(
            name,
            ToolDescriptor::new(name, format!("{name} tool"), name, json!({"type": "object"})),
            handler,
        );
    }

    pub fn token(&self, context: Value) -> String {
        mcp_context_bridge::host::token::sign(SECRET, &context).unwrap()
    }
}

/// Line-level client speaking raw frames to the host socket.
pub struct RawClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl RawClient {
    pub async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn request(&mut self, id: Value, method: &str, params: Value) {
        let frame = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.send_raw(format!("{frame}\n").as_bytes()).await;
    }

    /// Next response frame, failing the test after five seconds.
    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for a response")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }
}

/// Handler echoing its context and arguments.
pub fn echo_handler() -> mcp_context_bridge::host::registry::ToolHandler {
    handler_fn(|context, args| async move { Ok(json!({"context": context, "args": args})) })
}
