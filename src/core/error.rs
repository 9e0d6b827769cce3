//! Error types shared by the host and the bridge.
//!
//! Only a few of these are allowed to take a whole component down: a bad
//! startup configuration, a failed bind/connect, and a double start. The
//! rest are scoped to one request and end up as JSON-RPC error responses.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::rpc::jsonrpc::RpcError;

/// Missing or invalid bridge startup configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// The TOOLS variable is not a JSON object of tool descriptors
    #[error("Invalid TOOLS JSON: {0}")]
    InvalidTools(#[source] serde_json::Error),
}

/// Socket-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not bind the listening socket
    #[error("Failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not connect to the host socket
    #[error("Failed to connect to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Read or write failure on an open connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Context token verification failed.
///
/// Carries the message of the underlying verification step. Never
/// recovered into a default context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Authentication failed: {0}")]
pub struct AuthenticationError(pub String);

/// Errors surfaced by the host embedding API.
#[derive(Debug, Error)]
pub enum HostError {
    /// `start()` called on a server that is not in the Created state
    #[error("Server already started")]
    AlreadyStarted,

    /// Binding the socket failed; the server is back in Created
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Graceful close did not finish in time; the server is marked stopped anyway
    #[error("Server stop timed out after {0:?}; resources may leak")]
    ShutdownTimeout(Duration),

    /// The system random source failed while generating a secret or socket name
    #[error("Failed to gather randomness")]
    Entropy,

    /// Serializing a context or tool subset failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of an outgoing RPC call made by the bridge.
#[derive(Debug, Error)]
pub enum RpcCallError {
    /// The host answered with a JSON-RPC error object
    #[error("{}", .0.message)]
    Remote(RpcError),

    /// The connection closed before a response arrived
    #[error("Connection to host closed")]
    ConnectionClosed,
}

/// Top-level error of the bridge process.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The host socket closed while the bridge was serving
    #[error("Lost connection to host")]
    ConnectionLost,

    /// Stdio failure on the MCP side
    #[error("MCP stdio error: {0}")]
    Stdio(#[from] std::io::Error),
}
