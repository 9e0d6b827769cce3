//! Bridge process: expose host tools over MCP stdio.
//!
//! One bridge serves one context. It holds the token it was started with,
//! connects to the host socket, and registers one MCP tool per entry of its
//! tool subset. A tool call becomes an RPC request named after the entry's
//! function name with params `[token, args]`.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::core::error::BridgeError;
use crate::core::server::{self, AppState, CallToolResult, MCPTool, MCPToolRegistry, text_item};
use crate::core::utils::BridgeConfig;
use crate::host::registry::ToolDescriptor;
use crate::rpc::client::RpcClient;
use crate::schema;

/// Content item types passed through as-is when a handler returns one
const CONTENT_TYPES: &[&str] = &["text", "image", "audio", "resource", "resource_link"];

/// Shape an RPC result as MCP content.
///
/// - a string becomes one text item
/// - an array is used as the content list unchanged
/// - an object with a known content `type` becomes a one-item list
/// - anything else is serialized to JSON text
pub fn normalize_result(result: Value) -> Vec<Value> {
    if is_content_item(&result) {
        return vec![result];
    }
    match result {
        Value::String(text) => vec![text_item(text)],
        Value::Array(items) => items,
        other => vec![text_item(other.to_string())],
    }
}

fn is_content_item(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|item| item.get("type"))
        .and_then(Value::as_str)
        .is_some_and(|kind| CONTENT_TYPES.contains(&kind))
}

/// Text shown to the MCP client when a forwarded call fails.
pub fn error_text(function_name: &str, message: impl std::fmt::Display) -> String {
    format!("Error calling {function_name}: {message}")
}

/// Build the MCP tool and forwarding handler for one descriptor.
pub fn forwarding_tool(
    tool_name: &str,
    descriptor: &ToolDescriptor,
    client: Arc<RpcClient>,
    token: Arc<str>,
) -> (MCPTool, server::ToolHandler) {
    let tool = MCPTool {
        name: tool_name.to_string(),
        title: descriptor.title.clone(),
        description: descriptor.description.clone(),
        input_schema: descriptor.input_schema.clone(),
        validator: schema::to_validator(&descriptor.input_schema),
    };

    let function_name: Arc<str> = descriptor.function_name.as_str().into();
    let handler: server::ToolHandler = Arc::new(move |args: Value| {
        let client = client.clone();
        let token = token.clone();
        let function_name = function_name.clone();
        async move {
            debug!(function = %function_name, "forwarding tool call");
            match client
                .call(&function_name, Value::Array(vec![Value::String(token.to_string()), args]))
                .await
            {
                Ok(result) => CallToolResult {
                    content: normalize_result(result),
                    is_error: false,
                },
                // The MCP client always gets a readable explanation, never a protocol fault
                Err(e) => {
                    warn!(function = %function_name, "tool call failed: {e}");
                    CallToolResult::text(error_text(&function_name, e))
                }
            }
        }
        .boxed()
    });

    (tool, handler)
}

/// MCP tool registry forwarding every configured tool to the host.
pub fn build_registry(
    tools: &BTreeMap<String, ToolDescriptor>,
    client: Arc<RpcClient>,
    token: &str,
) -> MCPToolRegistry {
    let token: Arc<str> = token.into();
    let mut registry = MCPToolRegistry::new();
    for (name, descriptor) in tools {
        let (tool, handler) = forwarding_tool(name, descriptor, client.clone(), token.clone());
        registry.register(tool, handler);
    }
    registry
}

/// Run a bridge until stdin closes or the host connection drops.
///
/// Losing the host connection is fatal; there is no reconnect.
pub async fn run(config: BridgeConfig) -> Result<(), BridgeError> {
    let client = RpcClient::connect(&config.pipe).await?;
    info!(pipe = %config.pipe.display(), tools = config.tools.len(), "connected to host");

    let registry = Arc::new(build_registry(&config.tools, client.clone(), &config.context_token));
    let state = AppState {
        server_name: config.server_name,
        server_version: config.server_version,
    };

    tokio::select! {
        served = server::run_server_stdio(state, registry) => {
            served?;
            info!("stdin closed, bridge exiting");
            Ok(())
        }
        _ = client.closed() => {
            error!("connection to host lost");
            Err(BridgeError::ConnectionLost)
        }
    }
}
