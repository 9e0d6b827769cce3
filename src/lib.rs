//! Context-scoped RPC bridge between MCP clients and a long-running host.
//!
//! The crate has two halves that talk over a local Unix socket using
//! newline-delimited JSON-RPC 2.0:
//!
//! - [`host`]: embedded in the application that owns the tool handlers.
//!   It registers tools, mints signed context tokens, and serves RPC
//!   requests from bridge processes.
//! - [`bridge`]: the child process started by an MCP client. It reads its
//!   token, socket address and tool subset from the environment, exposes
//!   each tool over MCP stdio, and forwards calls back to the host.
//!
//! ```no_run
//! use mcp_context_bridge::host::{HostConfig, McpBridgeHost};
//! use mcp_context_bridge::host::registry::{handler_fn, ToolDescriptor};
//! use mcp_context_bridge::schema::Validator;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), mcp_context_bridge::core::error::HostError> {
//! let host = McpBridgeHost::new(HostConfig::default())?;
//! host.register_tool(
//!     "greet",
//!     ToolDescriptor::new(
//!         "Greet",
//!         "Greets the caller's tenant",
//!         "greet",
//!         Validator::object([("name", Validator::string())]),
//!     ),
//!     handler_fn(|context, args| async move {
//!         Ok(json!(format!("hello {} from {}", args["name"], context["tenant"])))
//!     }),
//! );
//! host.start().await?;
//! let spawn = host.get_spawn_config("tools", &["greet"], &json!({"tenant": "acme"}), None)?;
//! # let _ = spawn;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod core;
pub mod host;
pub mod rpc;
pub mod schema;
