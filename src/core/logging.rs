//! Diagnostic logging.
//!
//! Everything is written to stderr. Stdout belongs to the MCP protocol
//! stream of the bridge process and must never carry log lines.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `debug` when `debug`
/// is true and `warn` when it is not. Calling this more than once is
/// harmless: later calls leave the first subscriber in place.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "warn" }));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .try_init();
}
