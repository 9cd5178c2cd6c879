//! JSON-RPC 2.0 message types for MCP protocol.
//!
//! This module defines the envelope types shared by every transport.
//!
//! # Message Types
//!
//! - **Request**: A message with a `method` and an optional `id`
//! - **Response**: A reply to a request (success or error)
//! - **Notification**: A request without `id` (or with `id: null`); unknown
//!   notifications never produce a response
//!
//! Responses always carry an `id`. When the request had none, the `id` is
//! serialised as `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The MCP protocol version this implementation supports.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name for capability negotiation.
pub const SERVER_NAME: &str = "toolrelay";

/// A JSON-RPC 2.0 request ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// Request identifier; absent or `null` for notifications.
    #[serde(default)]
    pub id: Option<RequestId>,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(id: Option<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Whether the request expects no response.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Validates that this is a well-formed JSON-RPC 2.0 request.
    ///
    /// Returns an error message if validation fails.
    #[must_use]
    pub fn validate(&self) -> Option<&'static str> {
        if self.jsonrpc != "2.0" {
            return Some("jsonrpc field must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Some("method field cannot be empty");
        }
        None
    }
}

/// An outgoing JSON-RPC 2.0 notification (server to client).
///
/// Used for transport readiness and progress updates.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutgoingNotification {
    /// Creates a new outgoing notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }

    /// Creates a progress notification.
    #[must_use]
    pub fn progress(
        progress_token: &str,
        progress: u32,
        total: Option<u32>,
        message: Option<&str>,
    ) -> Self {
        let params = serde_json::json!({
            "progressToken": progress_token,
            "progress": progress,
            "total": total,
            "message": message,
        });
        Self::new("notifications/progress", Some(params))
    }

    /// Creates the readiness notice sent when a push channel opens.
    #[must_use]
    pub fn transport_ready(message_endpoint: &str) -> Self {
        let params = serde_json::json!({
            "transport": {
                "type": "sse",
                "messageEndpoint": message_endpoint,
            }
        });
        Self::new("transport/ready", Some(params))
    }

    /// Serialises the notification to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "jsonrpc": self.jsonrpc,
            "method": self.method,
            "params": self.params,
        })
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this response corresponds to.
    pub id: Option<RequestId>,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result,
        }
    }
}

/// JSON-RPC 2.0 error codes, plus the server-defined tool error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// A tool reported a typed failure.
    ToolError,
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ToolError => -32001,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::InvalidRequest => "invalid_request",
            Self::MethodNotFound => "method_not_found",
            Self::InvalidParams => "invalid_params",
            Self::InternalError => "internal_error",
            Self::ToolError => "tool_error",
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this error corresponds to (`null` if unknown).
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            error,
        }
    }

    /// Creates a parse error response (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// Creates an invalid request error response.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorData::from_code(ErrorCode::InvalidRequest))
    }

    /// Creates a method not found error response.
    #[must_use]
    pub fn method_not_found(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorData::from_code(ErrorCode::MethodNotFound))
    }

    /// Creates an invalid params error response.
    #[must_use]
    pub fn invalid_params(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::from_code(ErrorCode::InvalidParams)
                .with_data(serde_json::json!({ "message": message.into() })),
        )
    }

    /// Creates an internal error response.
    #[must_use]
    pub fn internal_error(id: Option<RequestId>, data: Value) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::from_code(ErrorCode::InternalError).with_data(data),
        )
    }

    /// Creates a tool error response; `kind` becomes the message.
    #[must_use]
    pub fn tool_error(id: Option<RequestId>, kind: &str, data: Value) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::ToolError, kind).with_data(data),
        )
    }
}

/// Parses one JSON text into a request envelope.
///
/// # Errors
///
/// Returns a `JsonRpcError` if the JSON is malformed or not a valid request.
pub fn parse_message(json: &str) -> Result<JsonRpcRequest, JsonRpcError> {
    let value: Value = serde_json::from_str(json).map_err(|_| JsonRpcError::parse_error())?;
    parse_value(value)
}

/// Interprets an already-decoded JSON value as a request envelope.
///
/// # Errors
///
/// Returns a `JsonRpcError` if the value is not a valid request.
pub fn parse_value(value: Value) -> Result<JsonRpcRequest, JsonRpcError> {
    let obj = value.as_object().ok_or_else(|| JsonRpcError::invalid_request(None))?;

    let jsonrpc = obj
        .get("jsonrpc")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::invalid_request(None))?;
    if jsonrpc != "2.0" {
        return Err(JsonRpcError::invalid_request(None));
    }

    let request: JsonRpcRequest =
        serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;
    if request.validate().is_some() {
        return Err(JsonRpcError::invalid_request(request.id));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_request() {
        let json = r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}"#;
        let req = parse_message(json).unwrap();
        assert_eq!(req.id, Some(RequestId::Number(1)));
        assert_eq!(req.method, "initialize");
        assert!(!req.is_notification());
    }

    #[test]
    fn parse_valid_notification() {
        let json = r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#;
        let req = parse_message(json).unwrap();
        assert!(req.is_notification());
        assert_eq!(req.method, "notifications/initialized");
    }

    #[test]
    fn null_id_is_notification() {
        let json = r#"{"jsonrpc": "2.0", "id": null, "method": "tools/list"}"#;
        let req = parse_message(json).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn parse_string_id() {
        let json = r#"{"jsonrpc": "2.0", "id": "abc-123", "method": "test"}"#;
        let req = parse_message(json).unwrap();
        assert_eq!(req.id, Some(RequestId::String("abc-123".to_string())));
    }

    #[test]
    fn parse_invalid_json() {
        let json = "not valid json";
        let err = parse_message(json).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::ParseError.code());
    }

    #[test]
    fn parse_missing_jsonrpc() {
        let json = r#"{"id": 1, "method": "test"}"#;
        let err = parse_message(json).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
    }

    #[test]
    fn parse_wrong_jsonrpc_version() {
        let json = r#"{"jsonrpc": "1.0", "id": 1, "method": "test"}"#;
        let err = parse_message(json).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
    }

    #[test]
    fn parse_empty_method() {
        let json = r#"{"jsonrpc": "2.0", "id": 7, "method": ""}"#;
        let err = parse_message(json).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(7)));
    }

    #[test]
    fn serialise_success_response() {
        let response =
            JsonRpcResponse::success(Some(RequestId::Number(1)), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""id":1"#));
        assert!(json.contains(r#""result":{"ok":true}"#));
    }

    #[test]
    fn serialise_null_id() {
        let response = JsonRpcResponse::success(None, serde_json::json!({}));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""id":null"#));
    }

    #[test]
    fn serialise_error_response() {
        let error = JsonRpcError::method_not_found(Some(RequestId::Number(1)));
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""id":1"#));
        assert!(json.contains(r#""code":-32601"#));
        assert!(json.contains("method_not_found"));
    }

    #[test]
    fn tool_error_uses_kind_as_message() {
        let error = JsonRpcError::tool_error(None, "bad_request", serde_json::json!({}));
        assert_eq!(error.error.code, -32001);
        assert_eq!(error.error.message, "bad_request");
    }

    #[test]
    fn transport_ready_names_endpoint() {
        let ready = OutgoingNotification::transport_ready("/messages/abc").to_value();
        assert_eq!(ready["method"], "transport/ready");
        assert_eq!(
            ready["params"]["transport"]["messageEndpoint"],
            "/messages/abc"
        );
    }

    #[test]
    fn request_id_display() {
        assert_eq!(format!("{}", RequestId::Number(42)), "42");
        assert_eq!(format!("{}", RequestId::String("abc".to_string())), "abc");
    }
}
