/// Tool Registry
///
/// Host-side map from tool name to descriptor, and from RPC function name
/// to handler. Registration can happen before or after the socket starts
/// listening; the server looks handlers up per request, so a newly
/// registered tool is callable by the next request that names it.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::schema;

/// Future returned by a tool handler.
pub type HandlerFuture = BoxFuture<'static, Result<Value, String>>;

/// Tool handler function type definition.
///
/// Handlers receive the verified context and the call arguments. The `Ok`
/// value is sent back as the RPC result unchanged; the `Err` message becomes
/// the JSON-RPC error message.
pub type ToolHandler = Arc<dyn Fn(Value, Value) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`ToolHandler`].
pub fn handler_fn<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    Arc::new(move |context, args| f(context, args).boxed())
}

/// Description of one tool as handed to bridge processes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Display title
    pub title: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// RPC method the bridge calls; need not match the tool name
    pub function_name: String,
    /// JSON Schema of the arguments (validators are converted on registration)
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        function_name: impl Into<String>,
        input_schema: impl Into<Value>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            function_name: function_name.into(),
            input_schema: input_schema.into(),
        }
    }
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    /// Descriptors keyed by tool name
    tools: BTreeMap<String, ToolDescriptor>,
    /// Handlers keyed by function name
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a tool.
    ///
    /// A validator input schema is converted to JSON Schema first; anything
    /// else is stored as given. The handler is keyed by the descriptor's
    /// function name. When a re-registration moves a tool to a different
    /// function, the old handler is dropped unless another tool still uses it.
    pub fn register(
        &mut self,
        tool_name: impl Into<String>,
        mut descriptor: ToolDescriptor,
        handler: ToolHandler,
    ) {
        let tool_name = tool_name.into();
        if schema::is_validator_schema(&descriptor.input_schema) {
            descriptor.input_schema = schema::to_json_schema(&descriptor.input_schema);
        }

        self.handlers
            .insert(descriptor.function_name.clone(), handler);

        if let Some(previous) = self.tools.insert(tool_name.clone(), descriptor) {
            let orphaned = !self
                .tools
                .values()
                .any(|d| d.function_name == previous.function_name);
            if orphaned {
                self.handlers.remove(&previous.function_name);
            }
        }
        debug!(tool = %tool_name, "registered tool");
    }

    /// Handler for an RPC method name.
    pub fn handler(&self, function_name: &str) -> Option<ToolHandler> {
        self.handlers.get(function_name).cloned()
    }

    pub fn descriptor(&self, tool_name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(tool_name)
    }

    /// Descriptors for the requested names that exist; unknown names are skipped.
    pub fn snapshot<S: AsRef<str>>(&self, tool_names: &[S]) -> BTreeMap<String, ToolDescriptor> {
        tool_names
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                self.tools
                    .get(name)
                    .map(|descriptor| (name.to_string(), descriptor.clone()))
            })
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
