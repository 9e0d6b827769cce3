/// Core Server Framework Module
///
/// This module contains the pieces shared by the host and the bridge binary:
/// - server.rs: MCP stdio server the bridge exposes its tools through
/// - utils.rs: Environment variables and bridge configuration
/// - logging.rs: tracing setup (stderr only)
/// - error.rs: Error taxonomy for configuration, transport, auth and shutdown

pub mod error;
pub mod logging;
pub mod server;
pub mod utils;
