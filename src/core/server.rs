/// MCP Server Implementation
///
/// This module contains the MCP stdio server the bridge exposes its tools
/// through:
/// - Tool registry for the tools this bridge forwards
/// - Line-based stdio loop with concurrent `tools/call` handling
/// - Request handlers for the MCP protocol methods
///
/// Responses are written by a single writer task, so tool calls that
/// finish out of order are still written as whole lines.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::rpc::jsonrpc::{METHOD_NOT_FOUND, RpcError, RpcRequest, RpcResponse};
use crate::schema::Validator;

/// MCP protocol revision this server speaks
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server metadata reported in the initialize response.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server name as reported in MCP initialize responses
    pub server_name: String,
    /// Server version string as reported in MCP initialize responses
    pub server_version: String,
}

/// MCP tool definition structure.
#[derive(Debug, Clone)]
pub struct MCPTool {
    /// Unique tool identifier
    pub name: String,
    pub title: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema reported by tools/list
    pub input_schema: Value,
    /// Argument shape checked before the handler runs
    pub validator: Validator,
}

/// Result of a `tools/call`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CallToolResult {
    /// Content items (`{"type": "text", "text": ...}` and friends)
    pub content: Vec<Value>,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![text_item(text)],
            is_error: false,
        }
    }
}

/// A single text content item.
pub fn text_item(text: impl Into<String>) -> Value {
    json!({ "type": "text", "text": text.into() })
}

/// Tool handler function type definition.
///
/// Handlers receive the validated arguments. They cannot fail at the
/// protocol level; failures are expressed inside the returned content.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, CallToolResult> + Send + Sync>;

/// Registry of tools exposed over MCP.
#[derive(Default)]
pub struct MCPToolRegistry {
    /// List of all registered tools (for tools/list method)
    pub tools: Vec<MCPTool>,
    /// Map of tool names to their handler functions (for tools/call method)
    pub handlers: HashMap<String, ToolHandler>,
}

impl MCPToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any earlier tool of the same name.
    pub fn register(&mut self, tool: MCPTool, handler: ToolHandler) {
        let name = tool.name.clone();
        self.tools.retain(|t| t.name != name);
        self.tools.push(tool);
        self.handlers.insert(name, handler);
    }

    fn tool(&self, name: &str) -> Option<&MCPTool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Run the MCP server on the process's stdin/stdout.
///
/// All logging goes to stderr to avoid interfering with the JSON-RPC
/// protocol stream. Returns when stdin reaches EOF.
pub async fn run_server_stdio(state: AppState, registry: Arc<MCPToolRegistry>) -> std::io::Result<()> {
    info!(
        name = %state.server_name,
        version = %state.server_version,
        tools = registry.tools.len(),
        "MCP server starting (stdio)"
    );
    serve(state, registry, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve MCP over any line-oriented reader/writer pair.
pub async fn serve<R, W>(
    state: AppState,
    registry: Arc<MCPToolRegistry>,
    reader: R,
    writer: W,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // 8KB buffers balance memory usage with I/O efficiency
    let mut lines = BufReader::with_capacity(8192, reader).lines();
    let (tx, rx) = mpsc::unbounded_channel::<RpcResponse>();
    let writer_task = tokio::spawn(write_responses(writer, rx));

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        // Unparseable lines carry no usable id, so there is nothing to answer
        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                warn!("parse error on MCP input: {e}");
                continue;
            }
        };

        let request_id = value.get("id").cloned();
        let request: RpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid request on MCP input: {e}");
                let _ = tx.send(RpcResponse::failure(
                    request_id.unwrap_or(Value::Null),
                    RpcError::invalid_request(e.to_string()),
                ));
                continue;
            }
        };

        let RpcRequest { id, method, params, .. } = request;
        // Notifications are one-way messages that don't require responses
        let Some(id) = id else {
            debug!(method = %method, "notification");
            continue;
        };

        let response = match method.as_str() {
            "initialize" => handle_initialize(&state, id),
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => handle_tools_list(&registry, id),
            "tools/call" => {
                // Calls may overlap; each one answers through the writer task
                let registry = registry.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = handle_tools_call(&registry, id, params).await;
                    let _ = tx.send(response);
                });
                continue;
            }
            _ => RpcResponse::failure(
                id,
                RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {method}")),
            ),
        };
        let _ = tx.send(response);
    }

    // In-flight calls still hold senders; the writer drains them before exiting
    drop(tx);
    writer_task.await.map_err(std::io::Error::other)?
}

async fn write_responses<W>(writer: W, mut rx: mpsc::UnboundedReceiver<RpcResponse>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::with_capacity(8192, writer);
    while let Some(response) = rx.recv().await {
        let response_json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                warn!("error serializing response: {e}");
                continue;
            }
        };
        // Each response must be on a single line followed by newline
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        // Flush after each response for low latency
        writer.flush().await?;
    }
    Ok(())
}

/// Handle MCP initialize method.
///
/// # Arguments
/// * `state` - Application state containing server name and version
/// * `id` - Request ID from the client
fn handle_initialize(state: &AppState, id: Value) -> RpcResponse {
    RpcResponse::success(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": state.server_name,
                "version": state.server_version
            }
        }),
    )
}

/// Handle MCP tools/list method.
///
/// inputSchema must be in camelCase per MCP specification.
fn handle_tools_list(registry: &MCPToolRegistry, id: Value) -> RpcResponse {
    let tools_json: Vec<Value> = registry
        .tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "title": tool.title,
                "description": tool.description,
                "inputSchema": tool.input_schema
            })
        })
        .collect();

    RpcResponse::success(id, json!({ "tools": tools_json }))
}

/// Handle MCP tools/call method.
///
/// Arguments are checked against the tool's validator before the handler
/// runs; a mismatch is an invalid-params error, not a tool result.
///
/// # Arguments
/// * `registry` - Tool registry for looking up tool handlers
/// * `id` - Request ID from the client
/// * `params` - Method parameters containing tool name and arguments
async fn handle_tools_call(registry: &MCPToolRegistry, id: Value, params: Option<Value>) -> RpcResponse {
    let Some(params) = params else {
        return RpcResponse::failure(id, RpcError::invalid_params("Invalid params"));
    };

    let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
    // Extract tool arguments, defaulting to empty object if not provided
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let (Some(tool), Some(handler)) = (registry.tool(tool_name), registry.handlers.get(tool_name)) else {
        return RpcResponse::failure(id, RpcError::invalid_params(format!("Unknown tool: {tool_name}")));
    };

    if let Err(reason) = tool.validator.check(&arguments) {
        return RpcResponse::failure(
            id,
            RpcError::invalid_params(format!("Invalid arguments for tool {tool_name}: {reason}")),
        );
    }

    let result = handler(arguments).await;
    match serde_json::to_value(&result) {
        Ok(result) => RpcResponse::success(id, result),
        Err(e) => RpcResponse::failure(id, RpcError::handler(e.to_string())),
    }
}
