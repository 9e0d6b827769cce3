/// Bridge Process Entry Point
///
/// Started by an MCP client as a stdio child process. There are no
/// command-line flags; everything comes from the environment:
///
/// Environment Variables:
/// - CONTEXT_TOKEN: Signed context token issued by the host (required)
/// - PIPE: Host socket address (required)
/// - TOOLS: JSON object of tool name -> descriptor (required)
/// - DEBUG: "1" for verbose logging on stderr
/// - SERVER_NAME: Name reported to the MCP client (default: "mcp-context-bridge")
/// - SERVER_VERSION: Version reported to the MCP client (default: crate version)

use std::process::ExitCode;

use mcp_context_bridge::bridge;
use mcp_context_bridge::core::logging;
use mcp_context_bridge::core::utils::{self, BridgeConfig, ENV_DEBUG};
use tracing::error;

fn main() -> ExitCode {
    // Logging first so configuration errors are reported
    logging::init(utils::debug_enabled(Some(&utils::get_env_var(ENV_DEBUG, ""))));

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(bridge::run(config));
    // The stdin reader sits on a blocking thread that cannot be cancelled;
    // a plain runtime drop would wait for the MCP client to close stdin.
    runtime.shutdown_background();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
