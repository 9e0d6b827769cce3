/// Utility Functions for Configuration and Environment Management
///
/// The bridge process is configured only through environment variables.
/// This module names them and parses them into a [`BridgeConfig`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::error::ConfigError;
use crate::host::registry::ToolDescriptor;

/// Signed context token
pub const ENV_CONTEXT_TOKEN: &str = "CONTEXT_TOKEN";
/// Host socket address
pub const ENV_PIPE: &str = "PIPE";
/// JSON object of tool name -> descriptor
pub const ENV_TOOLS: &str = "TOOLS";
/// Verbose stderr logging when "1"
pub const ENV_DEBUG: &str = "DEBUG";

/// Operating parameters of one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Token forwarded with every call
    pub context_token: String,
    /// Host socket to connect to
    pub pipe: PathBuf,
    /// Tools to expose, keyed by tool name
    pub tools: BTreeMap<String, ToolDescriptor>,
    /// Name reported in the MCP initialize response
    pub server_name: String,
    /// Version reported in the MCP initialize response
    pub server_version: String,
}

impl BridgeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variables.
    ///
    /// All three of `CONTEXT_TOKEN`, `PIPE` and `TOOLS` are required.
    /// `DEBUG` is not part of the config: logging is set up from it before
    /// the config is loaded, so that load errors are logged.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::MissingVar(key));

        let context_token = required(ENV_CONTEXT_TOKEN)?;
        let pipe = PathBuf::from(required(ENV_PIPE)?);
        let tools = serde_json::from_str(&required(ENV_TOOLS)?).map_err(ConfigError::InvalidTools)?;

        Ok(Self {
            context_token,
            pipe,
            tools,
            server_name: lookup("SERVER_NAME").unwrap_or_else(|| "mcp-context-bridge".to_string()),
            server_version: lookup("SERVER_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        })
    }
}

/// Whether a `DEBUG` value turns verbose logging on.
pub fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}

/// Get environment variable value with a default fallback.
///
/// # Arguments
/// * `key` - Environment variable name to look up
/// * `default` - Default value to return if the environment variable is not set
pub fn get_env_var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn parses_a_complete_environment() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("CONTEXT_TOKEN", "tok"),
            ("PIPE", "/tmp/host.sock"),
            (
                "TOOLS",
                r#"{"search":{"title":"Search","description":"d","functionName":"doSearch","inputSchema":{"type":"object"}}}"#,
            ),
        ]))
        .unwrap();

        assert_eq!(config.context_token, "tok");
        assert_eq!(config.pipe, PathBuf::from("/tmp/host.sock"));
        assert_eq!(config.tools["search"].function_name, "doSearch");
        assert_eq!(config.server_name, "mcp-context-bridge");
    }

    #[test]
    fn each_missing_variable_is_named() {
        let all = [("CONTEXT_TOKEN", "t"), ("PIPE", "p"), ("TOOLS", "{}")];
        for skip in ["CONTEXT_TOKEN", "PIPE", "TOOLS"] {
            let vars: Vec<_> = all.iter().copied().filter(|(k, _)| *k != skip).collect();
            let err = BridgeConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, ConfigError::MissingVar(name) if name == skip));
        }
    }

    #[test]
    fn malformed_tools_json_fails_fast() {
        let err = BridgeConfig::from_lookup(lookup(&[
            ("CONTEXT_TOKEN", "t"),
            ("PIPE", "p"),
            ("TOOLS", "{not json"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTools(_)));
    }

    #[test]
    fn debug_flag_values() {
        assert!(debug_enabled(Some("1")));
        assert!(debug_enabled(Some("true")));
        assert!(!debug_enabled(Some("0")));
        assert!(!debug_enabled(None));
    }
}
