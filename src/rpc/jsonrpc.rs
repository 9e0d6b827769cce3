/// JSON-RPC 2.0 Message Types
///
/// The same request/response/error structures are used on the host socket
/// and on the bridge's MCP stdio stream. All messages follow the JSON-RPC
/// 2.0 specification: `jsonrpc` is always "2.0", a request without an `id`
/// is a notification, and a response carries either `result` or `error`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::error::AuthenticationError;

/// JSON-RPC protocol version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Parse error: the line was not valid JSON
pub const PARSE_ERROR: i32 = -32700;
/// Invalid request: valid JSON but not a request object
pub const INVALID_REQUEST: i32 = -32600;
/// Method not found
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid params
pub const INVALID_PARAMS: i32 = -32602;
/// Handler failed
pub const HANDLER_ERROR: i32 = -32000;
/// Context token rejected
pub const AUTHENTICATION_ERROR: i32 = -32001;

/// JSON-RPC 2.0 request structure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcRequest {
    /// JSON-RPC version identifier, must be "2.0"
    pub jsonrpc: String,
    /// Request ID for correlating responses. None indicates a notification;
    /// an explicit `"id": null` is `Some(Value::Null)` and still gets a reply.
    #[serde(
        default,
        deserialize_with = "present_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    /// Method-specific parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Build a request with the given id.
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// A present `id` field is `Some`, even when its value is `null`.
fn present_id<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 response structure.
///
/// `id` is `null` when the request id could not be recovered (parse errors).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcResponse {
    /// JSON-RPC version identifier, always "2.0"
    pub jsonrpc: String,
    /// Request ID from the original request
    #[serde(default)]
    pub id: Value,
    /// Response result, present when request succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error information, present when request failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Successful response carrying `result` verbatim.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_outcome(id: Value, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result),
            Err(error) => Self::failure(id, error),
        }
    }

    /// Collapse into a `Result`. A response with neither field set
    /// (`"result": null` deserializes that way) is a successful `null`.
    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC 2.0 error structure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcError {
    /// JSON-RPC error code
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Parse error with the underlying parser message in `data`.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self {
            code: PARSE_ERROR,
            message: "Parse error".to_string(),
            data: Some(Value::String(detail.into())),
        }
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self {
            code: INVALID_REQUEST,
            message: "Invalid Request".to_string(),
            data: Some(Value::String(detail.into())),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    /// A registered handler failed; the message is passed through unchanged.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(HANDLER_ERROR, message)
    }
}

impl From<AuthenticationError> for RpcError {
    fn from(err: AuthenticationError) -> Self {
        Self::new(AUTHENTICATION_ERROR, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_result_is_a_successful_null() {
        let response: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert_eq!(response.into_outcome(), Ok(Value::Null));
    }

    #[test]
    fn parse_error_serializes_with_null_id() {
        let response = RpcResponse::failure(Value::Null, RpcError::parse_error("expected value"));
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["id"], Value::Null);
        assert_eq!(encoded["error"]["code"], json!(-32700));
        assert_eq!(encoded["error"]["data"], json!("expected value"));
        assert!(encoded.get("result").is_none());
    }

    #[test]
    fn request_without_id_is_a_notification() {
        let request: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notify"}"#).unwrap();
        assert!(request.id.is_none());
        assert!(request.params.is_none());
    }

    #[test]
    fn explicit_null_id_is_not_a_notification() {
        let request: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":null,"method":"call"}"#).unwrap();
        assert_eq!(request.id, Some(Value::Null));

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded.get("id"), Some(&Value::Null));
    }

    #[test]
    fn authentication_error_maps_to_its_own_code() {
        let error = RpcError::from(AuthenticationError("invalid signature".into()));
        assert_eq!(error.code, AUTHENTICATION_ERROR);
        assert!(error.message.contains("invalid signature"));
    }
}
