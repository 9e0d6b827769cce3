//! Host embedding API.
//!
//! [`McpBridgeHost`] is what an application embeds: it owns the tool
//! registry, the signing secret and the RPC server, and it produces the
//! environment a bridge process needs to reach back into it.

pub mod registry;
pub mod server;
pub mod token;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::HostError;
use crate::core::utils::{ENV_CONTEXT_TOKEN, ENV_DEBUG, ENV_PIPE, ENV_TOOLS};
use registry::{ToolDescriptor, ToolHandler, ToolRegistry};
use server::{Dispatcher, HostRpcServer, ServerState};
use token::TokenSigner;

/// Name of the bridge executable
pub const BRIDGE_BINARY: &str = "mcp-context-bridge";

/// Host construction options. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Signing secret; a random one is generated when absent
    pub secret: Option<String>,
    /// Socket address; a random temp path is used when absent
    pub socket_path: Option<PathBuf>,
    /// Start listening as part of [`McpBridgeHost::open`]
    pub auto_start: bool,
    /// Per-request debug traces, and the default `DEBUG` flag for spawned bridges
    pub debug: bool,
}

/// Everything a bridge process reads from its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentBundle {
    #[serde(rename = "CONTEXT_TOKEN")]
    pub context_token: String,
    #[serde(rename = "PIPE")]
    pub pipe: String,
    #[serde(rename = "TOOLS")]
    pub tools: String,
}

impl EnvironmentBundle {
    /// As environment variable pairs.
    pub fn into_env(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ENV_CONTEXT_TOKEN.to_string(), self.context_token),
            (ENV_PIPE.to_string(), self.pipe),
            (ENV_TOOLS.to_string(), self.tools),
        ])
    }
}

/// Overrides for how a bridge process is launched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpawnOptions {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    /// Set `DEBUG=1` in the bridge environment; defaults to the host's flag
    pub debug: Option<bool>,
}

/// MCP client entry for launching one bridge over stdio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpawnConfig {
    #[serde(rename = "type")]
    pub transport: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

pub struct McpBridgeHost {
    registry: Arc<RwLock<ToolRegistry>>,
    signer: Arc<TokenSigner>,
    server: HostRpcServer,
    debug: bool,
}

impl McpBridgeHost {
    /// Build a host in the Created state. Does not bind anything.
    pub fn new(config: HostConfig) -> Result<Self, HostError> {
        let secret = match config.secret {
            Some(secret) => secret,
            None => token::generate_secret()?,
        };
        let socket_path = match config.socket_path {
            Some(path) => path,
            None => default_socket_path()?,
        };

        let registry = Arc::new(RwLock::new(ToolRegistry::new()));
        let signer = Arc::new(TokenSigner::new(secret));
        let dispatcher = Dispatcher::new(registry.clone(), signer.clone(), config.debug);

        Ok(Self {
            registry,
            signer,
            server: HostRpcServer::new(socket_path, dispatcher),
            debug: config.debug,
        })
    }

    /// Build a host and start it when `auto_start` is set.
    pub async fn open(config: HostConfig) -> Result<Self, HostError> {
        let auto_start = config.auto_start;
        let host = Self::new(config)?;
        if auto_start {
            host.start().await?;
        }
        Ok(host)
    }

    /// Register or replace a tool. Safe before or after `start()`.
    pub fn register_tool(
        &self,
        tool_name: impl Into<String>,
        descriptor: ToolDescriptor,
        handler: ToolHandler,
    ) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(tool_name, descriptor, handler);
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tool_names()
    }

    /// Token, socket address and serialized tool subset for one context.
    ///
    /// Names not present in the registry are left out of `TOOLS`.
    pub fn get_environment_bundle<S: AsRef<str>>(
        &self,
        tool_names: &[S],
        context: &Value,
    ) -> Result<EnvironmentBundle, HostError> {
        let tools = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(tool_names);

        Ok(EnvironmentBundle {
            context_token: self.signer.sign(context)?,
            pipe: self.server.socket_path().display().to_string(),
            tools: serde_json::to_string(&tools)?,
        })
    }

    /// MCP client config entry `{name: {type: "stdio", command, args, env}}`.
    pub fn get_spawn_config<S: AsRef<str>>(
        &self,
        name: &str,
        tool_names: &[S],
        context: &Value,
        options: Option<SpawnOptions>,
    ) -> Result<BTreeMap<String, SpawnConfig>, HostError> {
        let options = options.unwrap_or_default();
        let mut env = self.get_environment_bundle(tool_names, context)?.into_env();
        if options.debug.unwrap_or(self.debug) {
            env.insert(ENV_DEBUG.to_string(), "1".to_string());
        }

        let config = SpawnConfig {
            transport: "stdio".to_string(),
            command: options.command.unwrap_or_else(default_bridge_command),
            args: options.args.unwrap_or_default(),
            env,
        };
        Ok(BTreeMap::from([(name.to_string(), config)]))
    }

    pub async fn start(&self) -> Result<(), HostError> {
        self.server.start().await
    }

    pub async fn stop(&self) -> Result<(), HostError> {
        self.server.stop().await
    }

    pub fn state(&self) -> ServerState {
        self.server.state()
    }

    pub fn is_listening(&self) -> bool {
        self.server.state() == ServerState::Listening
    }

    pub fn socket_path(&self) -> &Path {
        self.server.socket_path()
    }
}

fn default_socket_path() -> Result<PathBuf, HostError> {
    let suffix: String = token::random_bytes::<4>()?
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Ok(std::env::temp_dir().join(format!(
        "{BRIDGE_BINARY}-{}-{suffix}.sock",
        std::process::id()
    )))
}

/// The bridge binary next to the current executable, or the bare name.
fn default_bridge_command() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(BRIDGE_BINARY)))
        .filter(|candidate| candidate.is_file())
        .map_or_else(
            || BRIDGE_BINARY.to_string(),
            |path| path.display().to_string(),
        )
}
