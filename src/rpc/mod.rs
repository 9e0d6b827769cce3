//! JSON-RPC over a framed local socket, shared by host and bridge.

pub mod client;
pub mod jsonrpc;
pub mod transport;
