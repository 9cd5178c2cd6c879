//! Transport-independent method dispatcher.
//!
//! [`handle`] turns one parsed request into at most one response. It reaches
//! the rest of the system only through the three narrow interfaces in
//! [`Dependencies`], holds no mutable state, and can be shared freely across
//! concurrent requests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use crate::catalog::{Arguments, ToolCatalog};
use crate::error::{InvocationFailure, InvokeError};
use crate::executor::{Executor, Invocation};

/// User id attributed to calls arriving over a transport.
pub const TRANSPORT_USER: &str = "default";

/// Where a request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// User the call is attributed to.
    pub user_id: String,
    /// Push session the request arrived on, if any.
    pub session_id: Option<String>,
    /// Transport name (`stdio`, `sse`, `http`).
    pub transport: &'static str,
}

impl RequestContext {
    /// Creates a context for `transport` attributed to [`TRANSPORT_USER`].
    #[must_use]
    pub fn new(transport: &'static str) -> Self {
        Self {
            user_id: TRANSPORT_USER.to_string(),
            session_id: None,
            transport,
        }
    }

    /// The fixed context of the line transport.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new("stdio")
    }

    /// Context for a request routed to push session `session_id`.
    #[must_use]
    pub fn sse(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::new("sse")
        }
    }

    /// Overrides the user id.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// Supplies the `initialize` payload.
pub trait CapabilitiesProvider: Send + Sync {
    /// The capability object returned from `initialize`.
    fn capabilities(&self) -> Value;
}

/// Supplies the `tools/list` schema set.
pub trait ToolLister: Send + Sync {
    /// Current tool schemas, as `{name, description, input_schema}` objects.
    fn list_tools(&self) -> Arc<Vec<Value>>;

    /// The same tools as OpenAI function-calling definitions.
    fn list_openai_tools(&self) -> Vec<Value>;
}

/// Runs `tools/call`.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invokes `name` on behalf of `context`.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure with its masked arguments and audit record.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Arguments,
        context: &RequestContext,
    ) -> Result<Invocation, InvocationFailure>;
}

impl ToolLister for ToolCatalog {
    fn list_tools(&self) -> Arc<Vec<Value>> {
        self.mcp_tools()
    }

    fn list_openai_tools(&self) -> Vec<Value> {
        self.openai_tools()
    }
}

#[async_trait]
impl ToolInvoker for Executor {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Arguments,
        context: &RequestContext,
    ) -> Result<Invocation, InvocationFailure> {
        self.execute(name, arguments, Some(&context.user_id)).await
    }
}

/// Capability payload describing this server and its catalog.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    catalog: Arc<ToolCatalog>,
}

impl ServerCapabilities {
    /// Creates a provider reporting on `catalog`.
    #[must_use]
    pub const fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }
}

impl CapabilitiesProvider for ServerCapabilities {
    fn capabilities(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false, "call": true, "describe": true }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "dependencies": {
                "runtime": ["tokio", "axum"],
                "tools": self.catalog.dependencies(),
            },
        })
    }
}

/// The collaborators the dispatcher calls out to.
#[derive(Clone)]
pub struct Dependencies {
    /// `initialize` payload.
    pub capabilities: Arc<dyn CapabilitiesProvider>,
    /// `tools/list` source.
    pub lister: Arc<dyn ToolLister>,
    /// `tools/call` target.
    pub invoker: Arc<dyn ToolInvoker>,
}

impl Dependencies {
    /// Wires all three interfaces to `executor` and its catalog.
    #[must_use]
    pub fn from_executor(executor: Executor) -> Self {
        let catalog = Arc::clone(executor.catalog());
        Self {
            capabilities: Arc::new(ServerCapabilities::new(Arc::clone(&catalog))),
            lister: catalog,
            invoker: Arc::new(executor),
        }
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies").finish_non_exhaustive()
    }
}

/// Dispatches one request.
///
/// Returns `None` for `notifications/initialized` and for unknown methods
/// sent without an id. Known methods always answer, with a `null` id when
/// the request had none.
pub async fn handle(
    request: &JsonRpcRequest,
    context: &RequestContext,
    deps: &Dependencies,
) -> Option<Value> {
    let id = request.id.clone();
    tracing::debug!(
        method = %request.method,
        transport = context.transport,
        "Dispatching request"
    );

    match request.method.as_str() {
        "initialize" => Some(success(id, deps.capabilities.capabilities())),
        "notifications/initialized" => None,
        "tools/list" => {
            let tools = deps.lister.list_tools();
            Some(success(id, json!({ "tools": tools.as_slice() })))
        }
        "tools/call" => Some(call_tool(id, request.params.as_ref(), context, deps).await),
        method => {
            if id.is_none() {
                tracing::debug!(method, "Ignoring unknown notification");
                return None;
            }
            tracing::debug!(method, "Unknown method");
            Some(encode(&JsonRpcError::method_not_found(id)))
        }
    }
}

async fn call_tool(
    id: Option<RequestId>,
    params: Option<&Value>,
    context: &RequestContext,
    deps: &Dependencies,
) -> Value {
    let (name, arguments) = match call_params(params) {
        Ok(parsed) => parsed,
        Err(message) => return encode(&JsonRpcError::invalid_params(id, message)),
    };

    match deps.invoker.call_tool(&name, arguments, context).await {
        Ok(invocation) => success(id, invocation.to_result()),
        Err(failure) => {
            let data = failure.error_data();
            match &failure.error {
                InvokeError::Tool(tool) => encode(&JsonRpcError::tool_error(id, &tool.kind, data)),
                InvokeError::NotFound(_) | InvokeError::Internal(_) => {
                    encode(&JsonRpcError::internal_error(id, data))
                }
            }
        }
    }
}

fn call_params(params: Option<&Value>) -> Result<(String, Arguments), &'static str> {
    let params = params.and_then(Value::as_object);
    let name = params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or("params.name must be a non-empty string")?;

    let arguments = match params.and_then(|p| p.get("arguments")) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args.clone(),
        Some(_) => return Err("params.arguments must be an object"),
    };
    Ok((name.to_string(), arguments))
}

fn success(id: Option<RequestId>, result: Value) -> Value {
    encode(&JsonRpcResponse::success(id, result))
}

fn encode(message: &impl Serialize) -> Value {
    serde_json::to_value(message).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to encode response");
        Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ToolDescriptor, ToolHandler};
    use crate::error::ToolError;
    use crate::ledger::FailureLedger;
    use crate::runtime::RetryPolicy;

    fn deps_with_ledger() -> (Dependencies, Arc<FailureLedger>) {
        let catalog = Arc::new(ToolCatalog::new());
        catalog
            .register_tool(
                ToolDescriptor::new("echo", "Echo arguments"),
                ToolHandler::sync(|args| Ok(Value::Object(args.clone()))),
            )
            .unwrap();
        catalog
            .register_tool(
                ToolDescriptor::new("reject", "Always rejects"),
                ToolHandler::sync(|_| {
                    Err(ToolError::new("bad_request", "nope")
                        .with_data(json!({"field": "x"}))
                        .into())
                }),
            )
            .unwrap();
        catalog
            .register_tool(
                ToolDescriptor::new("explode", "Always breaks"),
                ToolHandler::sync(|_| Err(InvokeError::internal("boom"))),
            )
            .unwrap();

        let ledger = Arc::new(FailureLedger::in_memory(0.9, 20));
        let executor = Executor::new(catalog)
            .with_ledger(Arc::clone(&ledger))
            .with_retry_policy(RetryPolicy::none());
        (Dependencies::from_executor(executor), ledger)
    }

    fn deps() -> Dependencies {
        deps_with_ledger().0
    }

    fn request(id: Option<i64>, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(id.map(RequestId::Number), method, params)
    }

    #[tokio::test]
    async fn initialize_reports_capabilities() {
        let response = handle(&request(Some(1), "initialize", None), &RequestContext::stdio(), &deps())
            .await
            .unwrap();

        assert_eq!(response["id"], 1);
        let result = &response["result"];
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["capabilities"]["tools"]["call"], true);
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(result["dependencies"]["tools"][0], json!({"name": "echo", "kind": "tool"}));
    }

    #[tokio::test]
    async fn initialized_notification_is_silent() {
        let response = handle(
            &request(None, "notifications/initialized", None),
            &RequestContext::stdio(),
            &deps(),
        )
        .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn tools_list_matches_catalog() {
        let response = handle(&request(Some(2), "tools/list", None), &RequestContext::stdio(), &deps())
            .await
            .unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["echo", "reject", "explode"]);
        assert!(tools[0]["input_schema"].is_object());
    }

    #[tokio::test]
    async fn tools_call_masks_arguments() {
        let params = json!({"name": "echo", "arguments": {"a": 1, "apiKey": "secret"}});
        let response = handle(
            &request(Some(3), "tools/call", Some(params)),
            &RequestContext::stdio(),
            &deps(),
        )
        .await
        .unwrap();

        let result = &response["result"];
        assert_eq!(result["arguments"], json!({"a": 1, "apiKey": "***MASKED***"}));
        assert_eq!(result["audit"]["user"], TRANSPORT_USER);
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["meta"]["contentType"], "application/json");
    }

    #[tokio::test]
    async fn tool_error_maps_to_tool_code() {
        let (deps, ledger) = deps_with_ledger();
        let params = json!({"name": "reject", "arguments": {"token_key": "s"}});
        let response = handle(
            &request(Some(4), "tools/call", Some(params)),
            &RequestContext::stdio(),
            &deps,
        )
        .await
        .unwrap();

        let error = &response["error"];
        assert_eq!(error["code"], -32001);
        assert_eq!(error["message"], "bad_request");
        assert_eq!(error["data"]["message"], "nope");
        assert_eq!(error["data"]["details"], json!({"field": "x"}));
        assert_eq!(error["data"]["arguments"]["token_key"], "***MASKED***");
        assert_eq!(ledger.get("reject").unwrap().count, 1);
    }

    #[tokio::test]
    async fn other_failures_map_to_internal_error() {
        let (deps, ledger) = deps_with_ledger();
        for name in ["explode", "missing"] {
            let params = json!({"name": name, "arguments": {}});
            let response = handle(
                &request(Some(5), "tools/call", Some(params)),
                &RequestContext::stdio(),
                &deps,
            )
            .await
            .unwrap();
            assert_eq!(response["error"]["code"], -32603);
            assert_eq!(response["error"]["message"], "internal_error");
            assert!(response["error"]["data"].get("message").is_none());
        }
        assert_eq!(ledger.get("explode").unwrap().count, 1);
    }

    #[tokio::test]
    async fn missing_tool_name_is_invalid_params() {
        let response = handle(
            &request(Some(6), "tools/call", Some(json!({"arguments": {}}))),
            &RequestContext::stdio(),
            &deps(),
        )
        .await
        .unwrap();
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn unknown_method_with_id_is_not_found() {
        let response = handle(&request(Some(7), "tools/nope", None), &RequestContext::stdio(), &deps())
            .await
            .unwrap();
        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn unknown_method_without_id_is_silent() {
        let response =
            handle(&request(None, "tools/nope", None), &RequestContext::stdio(), &deps()).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn known_method_without_id_answers_with_null_id() {
        let response = handle(&request(None, "tools/list", None), &RequestContext::stdio(), &deps())
            .await
            .unwrap();
        assert!(response["id"].is_null());
        assert!(response["result"]["tools"].is_array());
    }

    #[test]
    fn sse_context_carries_session() {
        let ctx = RequestContext::sse("abc").with_user("alice");
        assert_eq!(ctx.session_id.as_deref(), Some("abc"));
        assert_eq!(ctx.transport, "sse");
        assert_eq!(ctx.user_id, "alice");
    }
}
