//! HTTP routes: push sessions, message posting and direct invocation.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /`, `GET /health` | liveness |
//! | `GET /tools` | tool schemas |
//! | `GET /tools/openai` | tool schemas as OpenAI function definitions |
//! | `GET /sse` | opens a push session |
//! | `POST /messages/{id}`, `POST /messages?session_id=` | dispatches into a session |
//! | `POST /invoke` | direct `tools/call` without a session |
//! | `POST /invoke/stream` | the same, streamed with progress events |

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use super::sessions::{SessionGuard, SessionRegistry};
use crate::catalog::Arguments;
use crate::error::InvokeError;
use crate::mcp::core::{handle, Dependencies, RequestContext, ToolInvoker};
use crate::mcp::protocol::{parse_value, OutgoingNotification};

/// Shortest interval accepted between `ping` events.
const MIN_KEEPALIVE: Duration = Duration::from_secs(1);

/// Shared state behind every route.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Protocol core collaborators.
    pub deps: Dependencies,
    /// Live push sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Interval between `ping` events on idle push sessions.
    pub keepalive: Duration,
}

impl AppState {
    /// Creates state with an empty session registry.
    #[must_use]
    pub fn new(deps: Dependencies, keepalive: Duration) -> Self {
        Self {
            deps,
            sessions: Arc::new(SessionRegistry::new()),
            keepalive,
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/openai", get(list_openai_tools))
        .route("/sse", get(open_session))
        .route("/messages", post(post_message_by_query))
        .route("/messages/{session_id}", post(post_message))
        .route("/invoke", post(invoke))
        .route("/invoke/stream", post(invoke_stream))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

fn message_event(message: &Value) -> Event {
    Event::default().event("message").data(message.to_string())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found")
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools = state.deps.lister.list_tools();
    Json(json!({ "tools": tools.as_slice() }))
}

async fn list_openai_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.deps.lister.list_openai_tools() }))
}

async fn open_session(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session, mut receiver) = state.sessions.open();
    let id = session.id().to_string();
    let ready = OutgoingNotification::transport_ready(&format!("/messages/{id}")).to_value();
    let guard = SessionGuard::new(Arc::clone(&state.sessions), id);
    let keepalive = state.keepalive.max(MIN_KEEPALIVE);

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(message_event(&ready));

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);
        loop {
            let event = tokio::select! {
                () = session.closed() => break,
                message = receiver.recv() => match message {
                    Some(message) => message_event(&message),
                    None => break,
                },
                _ = ticker.tick() => Event::default().event("ping").data("{}"),
            };
            yield Ok(event);
        }
        tracing::debug!(session_id = %session.id(), "Push stream ended");
    };

    Sse::new(stream)
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

async fn post_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Response {
    route_message(&state, Some(session_id), &body).await
}

async fn post_message_by_query(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    route_message(&state, query.session_id, &body).await
}

async fn route_message(state: &AppState, session_id: Option<String>, body: &[u8]) -> Response {
    let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing_session_id");
    };
    if state.sessions.get(&session_id).is_none() {
        return error_response(StatusCode::NOT_FOUND, "session_not_found");
    }

    let Ok(payload) = serde_json::from_slice::<Value>(body) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_json");
    };
    let request = match parse_value(payload) {
        Ok(request) => request,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_request"),
    };

    let context = RequestContext::sse(&session_id);
    if let Some(response) = handle(&request, &context, &state.deps).await {
        if let Err(e) = state.sessions.push(&session_id, response).await {
            tracing::warn!(session_id = %session_id, error = %e, "Response not delivered");
        }
    }

    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
}

/// Body of `/invoke` and `/invoke/stream`.
#[derive(Debug)]
struct InvokeRequest {
    name: String,
    arguments: Arguments,
}

impl InvokeRequest {
    fn parse(body: &[u8]) -> Result<Self, Response> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid_json"))?;

        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "missing_name"))?;

        let arguments = match payload.get("arguments") {
            None | Some(Value::Null) => Arguments::new(),
            Some(Value::Object(args)) => args.clone(),
            Some(_) => return Err(error_response(StatusCode::BAD_REQUEST, "invalid_arguments")),
        };

        Ok(Self {
            name: name.to_string(),
            arguments,
        })
    }
}

/// Runs one invocation and maps it to a status and JSON body.
async fn run_invocation(invoker: &dyn ToolInvoker, request: InvokeRequest) -> (StatusCode, Value) {
    let context = RequestContext::new("http");
    match invoker
        .call_tool(&request.name, request.arguments, &context)
        .await
    {
        Ok(invocation) => (
            StatusCode::OK,
            json!({
                "name": request.name,
                "result": invocation.raw,
                "arguments": invocation.arguments,
                "audit": invocation.audit,
            }),
        ),
        Err(failure) => {
            let data = failure.error_data();
            match &failure.error {
                InvokeError::Tool(tool) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    json!({ "error": tool.kind, "data": data }),
                ),
                InvokeError::NotFound(_) => (
                    StatusCode::NOT_FOUND,
                    json!({ "error": "not_found", "data": data }),
                ),
                InvokeError::Internal(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error", "data": data }),
                ),
            }
        }
    }
}

async fn invoke(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match InvokeRequest::parse(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (status, body) = run_invocation(state.deps.invoker.as_ref(), request).await;
    (status, Json(body)).into_response()
}

async fn invoke_stream(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match InvokeRequest::parse(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let invoker = Arc::clone(&state.deps.invoker);
    let token = uuid::Uuid::new_v4().simple().to_string();

    let stream = async_stream::stream! {
        let progress = |step: u32, message: &str| {
            let notice = OutgoingNotification::progress(&token, step, Some(3), Some(message));
            Ok::<_, Infallible>(message_event(&notice.to_value()))
        };

        yield progress(1, "start");
        let (status, body) = run_invocation(invoker.as_ref(), request).await;
        yield progress(2, "tool_complete");
        yield progress(3, "done");

        let outcome = json!({ "status": status.as_u16(), "body": body });
        yield Ok(Event::default().event("result").data(outcome.to_string()));
    };

    Sse::new(stream).into_response()
}
