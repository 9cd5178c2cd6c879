//! Connection self-test.
//!
//! Runs `initialize`, `tools/list` and one `tools/call` against a server and
//! reports each step with its timing. The stdio check drives an in-process
//! line server over an in-memory pipe; the HTTP check opens `/sse` and posts
//! to the advertised message endpoint.
//!
//! A step that fails does not stop later steps; they fail in turn with their
//! own error so the report shows everything that is broken.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf};

use crate::builtin::PING_TOOL;
use crate::mcp::core::Dependencies;
use crate::mcp::server::McpServer;
use crate::mcp::transport::LineTransport;

/// Default per-message timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    /// The step succeeded.
    Pass,
    /// The step failed.
    Fail,
}

/// Report for one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Step name.
    pub name: String,
    /// Outcome.
    pub status: StepStatus,
    /// Duration in milliseconds, rounded to two decimals.
    pub duration_ms: f64,
    /// What went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How to fix it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Step-specific details.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl StepReport {
    fn finish(name: &str, started: Instant, result: Result<Value, StepFailure>) -> Self {
        let duration_ms = round_ms(started.elapsed());
        match result {
            Ok(details) => Self {
                name: name.to_string(),
                status: StepStatus::Pass,
                duration_ms,
                error: None,
                suggestion: None,
                details: into_map(details),
            },
            Err(failure) => {
                tracing::error!(step = name, error = %failure, "Doctor step failed");
                Self {
                    name: name.to_string(),
                    status: StepStatus::Fail,
                    duration_ms,
                    error: Some(failure.message),
                    suggestion: failure.suggestion,
                    details: into_map(failure.details),
                }
            }
        }
    }
}

/// Report for a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    /// `stdio` or `http`.
    pub mode: String,
    /// What was tested, if known.
    pub target: Option<String>,
    /// Total duration in milliseconds, rounded to two decimals.
    pub duration_ms: f64,
    /// Whether every step passed.
    pub ok: bool,
    /// Per-step reports, in order.
    pub steps: Vec<StepReport>,
}

impl ConnectionReport {
    fn new(mode: &str, target: Option<String>, started: Instant, steps: Vec<StepReport>) -> Self {
        Self {
            mode: mode.to_string(),
            target,
            duration_ms: round_ms(started.elapsed()),
            ok: steps.iter().all(|s| s.status == StepStatus::Pass),
            steps,
        }
    }

    /// A pre-flight failure reported before any connection is attempted.
    #[must_use]
    pub fn config_error(mode: &str, message: &str, suggestion: &str) -> Self {
        Self {
            mode: mode.to_string(),
            target: None,
            duration_ms: 0.0,
            ok: false,
            steps: vec![StepReport {
                name: "config".to_string(),
                status: StepStatus::Fail,
                duration_ms: 0.0,
                error: Some(message.to_string()),
                suggestion: Some(suggestion.to_string()),
                details: Map::new(),
            }],
        }
    }
}

/// Renders a report as human-readable text.
#[must_use]
pub fn render_report(report: &ConnectionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Connection Tester ({})", report.mode);
    let _ = writeln!(out, "Target: {}", report.target.as_deref().unwrap_or("N/A"));
    let _ = writeln!(out, "Total: {:.2}ms", report.duration_ms);
    out.push('\n');

    for step in &report.steps {
        let status = match step.status {
            StepStatus::Pass => "PASS",
            StepStatus::Fail => "FAIL",
        };
        let _ = writeln!(out, "- {}: {status} ({:.2}ms)", step.name, step.duration_ms);
        if let Some(error) = &step.error {
            let _ = writeln!(out, "  - error: {error}");
        }
        if let Some(suggestion) = &step.suggestion {
            let _ = writeln!(out, "  - suggestion: {suggestion}");
        }
        if !step.details.is_empty() {
            let _ = writeln!(out, "  - details: {}", Value::Object(step.details.clone()));
        }
    }
    out.trim_end().to_string()
}

/// Which server to test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoctorTarget {
    /// The in-process line server.
    Stdio,
    /// An HTTP server at this base URL.
    Http(String),
}

/// Picks the target from the CLI flags.
///
/// # Errors
///
/// Returns a config failure report if both or neither of `stdio` and `url`
/// are given.
pub fn resolve_target(stdio: bool, url: Option<&str>) -> Result<DoctorTarget, ConnectionReport> {
    match (stdio, url) {
        (true, None) => Ok(DoctorTarget::Stdio),
        (false, Some(url)) => Ok(DoctorTarget::Http(url.to_string())),
        (true, Some(_)) => Err(ConnectionReport::config_error(
            "unknown",
            "--stdio and --url are mutually exclusive",
            "pick one transport to test",
        )),
        (false, None) => Err(ConnectionReport::config_error(
            "unknown",
            "no transport selected",
            "pass --stdio or --url <URL>",
        )),
    }
}

/// A failed step.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StepFailure {
    message: String,
    suggestion: Option<String>,
    details: Value,
}

impl StepFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: Value::Null,
        }
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    fn no_transport() -> Self {
        Self::new("transport not established").suggest("fix the transport step first")
    }

    fn timeout() -> Self {
        Self::new("timed out waiting for a response").suggest("check the server is answering")
    }
}

/// Sends one request and returns its response.
#[async_trait]
trait RpcClient: Send {
    async fn send(&mut self, request: Value) -> Result<Value, StepFailure>;
}

/// Runs connection checks.
#[derive(Debug, Clone)]
pub struct ConnectionTester {
    timeout: Duration,
}

impl Default for ConnectionTester {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ConnectionTester {
    /// Creates a tester with a per-message timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs the checks selected by `target`.
    pub async fn run(&self, target: &DoctorTarget, deps: Dependencies) -> ConnectionReport {
        match target {
            DoctorTarget::Stdio => self.run_stdio(deps).await,
            DoctorTarget::Http(url) => self.run_http(url).await,
        }
    }

    /// Checks the line transport served in-process over `deps`.
    pub async fn run_stdio(&self, deps: Dependencies) -> ConnectionReport {
        let started = Instant::now();
        let step_start = Instant::now();

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut server = McpServer::new(
            LineTransport::new(BufReader::new(server_read), server_write),
            deps,
        );
        let task = tokio::spawn(async move { server.serve().await });

        let (client_read, client_write) = tokio::io::split(client_io);
        let mut client = StdioClient {
            transport: LineTransport::new(BufReader::new(client_read), client_write),
            timeout: self.timeout,
        };
        let mut steps = vec![StepReport::finish(
            "transport",
            step_start,
            Ok(json!({ "mode": "in-process" })),
        )];

        run_protocol_steps(Some(&mut client), &mut steps).await;

        drop(client);
        if let Ok(Err(e)) = task.await {
            tracing::warn!(error = %e, "In-process server ended with an error");
        }

        ConnectionReport::new("stdio", Some("in-process".to_string()), started, steps)
    }

    /// Checks an HTTP server at `url`.
    pub async fn run_http(&self, url: &str) -> ConnectionReport {
        let started = Instant::now();
        let step_start = Instant::now();

        let (mut client, transport) = match self.connect_http(url).await {
            Ok(client) => {
                let details = json!({ "message_endpoint": client.endpoint });
                (Some(client), Ok(details))
            }
            Err(failure) => (None, Err(failure)),
        };
        let mut steps = vec![StepReport::finish("transport", step_start, transport)];

        run_protocol_steps(client.as_mut(), &mut steps).await;

        ConnectionReport::new("http", Some(url.to_string()), started, steps)
    }

    async fn connect_http(&self, url: &str) -> Result<HttpClient, StepFailure> {
        let base = url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| StepFailure::new("could not build HTTP client").details(json!({"exception": e.to_string()})))?;

        let health = http
            .get(format!("{base}/health"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                StepFailure::new("HTTP connection failed")
                    .suggest("check the URL and that the server is running")
                    .details(json!({ "reason": e.to_string() }))
            })?;
        if !health.status().is_success() {
            return Err(StepFailure::new("health check failed")
                .suggest("check that /health is served")
                .details(json!({ "status": health.status().as_u16() })));
        }

        let stream = http
            .get(format!("{base}/sse"))
            .send()
            .await
            .map_err(|e| {
                StepFailure::new("SSE connection failed")
                    .suggest("check that /sse is served")
                    .details(json!({ "exception": e.to_string() }))
            })?;

        let mut client = HttpClient {
            http,
            stream,
            buffer: SseBuffer::default(),
            endpoint: String::new(),
            timeout: self.timeout,
        };

        let ready = client.next_message().await?;
        let endpoint = ready
            .pointer("/params/transport/messageEndpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StepFailure::new("no message endpoint advertised")
                    .suggest("check the /sse ready message format")
                    .details(json!({ "payload": ready }))
            })?;
        client.endpoint = if endpoint.starts_with('/') {
            format!("{base}{endpoint}")
        } else {
            endpoint.to_string()
        };
        Ok(client)
    }
}

async fn run_protocol_steps<C: RpcClient>(mut client: Option<&mut C>, steps: &mut Vec<StepReport>) {
    let started = Instant::now();
    let result = match client.as_deref_mut() {
        Some(c) => call(c, 1, "initialize", None).await.map(|_| json!({})),
        None => Err(StepFailure::no_transport()),
    };
    steps.push(StepReport::finish("initialize", started, result));

    let started = Instant::now();
    let mut tools = Vec::new();
    let result = match client.as_deref_mut() {
        Some(c) => call(c, 2, "tools/list", None).await.map(|result| {
            tools = result
                .get("tools")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            json!({ "tools_count": tools.len() })
        }),
        None => Err(StepFailure::no_transport()),
    };
    steps.push(StepReport::finish("tools/list", started, result));

    let started = Instant::now();
    let result = match (client, pick_callable_tool(&tools)) {
        (None, _) => Err(StepFailure::no_transport()),
        (Some(_), None) => Err(StepFailure::new("no tool can be called without arguments")
            .suggest(format!("register {PING_TOOL} or a tool with no required parameters"))),
        (Some(c), Some(name)) => {
            let params = json!({ "name": name, "arguments": {} });
            call(c, 3, "tools/call", Some(params))
                .await
                .map(|_| json!({ "tool": name }))
        }
    };
    steps.push(StepReport::finish("tools/call", started, result));
}

async fn call<C: RpcClient>(
    client: &mut C,
    id: i64,
    method: &str,
    params: Option<Value>,
) -> Result<Value, StepFailure> {
    let mut request = json!({ "jsonrpc": "2.0", "id": id, "method": method });
    if let Some(params) = params {
        request["params"] = params;
    }
    let response = client.send(request).await?;
    validate_response(response, id)
}

fn validate_response(response: Value, id: i64) -> Result<Value, StepFailure> {
    if response.get("id").and_then(Value::as_i64) != Some(id) {
        return Err(StepFailure::new("response id mismatch")
            .suggest("check the JSON-RPC response format")
            .details(json!({ "response": response })));
    }
    if let Some(error) = response.get("error") {
        return Err(StepFailure::new("server returned an error")
            .suggest("check that the server supports this method")
            .details(json!({ "error": error })));
    }
    Ok(response.get("result").cloned().unwrap_or_else(|| json!({})))
}

/// Prefers the ping tool, then any tool without required parameters.
fn pick_callable_tool(tools: &[Value]) -> Option<String> {
    let name = |tool: &Value| tool.get("name").and_then(Value::as_str).map(str::to_string);

    if tools.iter().any(|t| name(t).as_deref() == Some(PING_TOOL)) {
        return Some(PING_TOOL.to_string());
    }
    tools
        .iter()
        .find(|t| {
            t.pointer("/input_schema/required")
                .and_then(Value::as_array)
                .map_or(true, Vec::is_empty)
        })
        .and_then(name)
}

struct StdioClient {
    transport: LineTransport<BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>>,
    timeout: Duration,
}

#[async_trait]
impl RpcClient for StdioClient {
    async fn send(&mut self, request: Value) -> Result<Value, StepFailure> {
        self.transport.write_json(&request).await.map_err(|e| {
            StepFailure::new("failed to write request")
                .details(json!({ "exception": e.to_string() }))
        })?;

        let line = tokio::time::timeout(self.timeout, self.transport.read_line())
            .await
            .map_err(|_| StepFailure::timeout())?
            .map_err(|e| StepFailure::new("failed to read response").details(json!({ "exception": e.to_string() })))?
            .ok_or_else(|| StepFailure::new("server closed the connection"))?;

        serde_json::from_str(&line).map_err(|_| {
            StepFailure::new("response is not valid JSON")
                .suggest("check the server writes JSON-RPC lines")
                .details(json!({ "raw": line }))
        })
    }
}

struct HttpClient {
    http: reqwest::Client,
    stream: reqwest::Response,
    buffer: SseBuffer,
    endpoint: String,
    timeout: Duration,
}

impl HttpClient {
    /// Next `message` event's JSON payload, skipping pings.
    async fn next_message(&mut self) -> Result<Value, StepFailure> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            while let Some(block) = self.buffer.next_block() {
                if let Some(payload) = parse_sse_block(&block) {
                    return Ok(payload);
                }
            }

            let chunk = tokio::time::timeout_at(deadline, self.stream.chunk())
                .await
                .map_err(|_| StepFailure::timeout())?
                .map_err(|e| StepFailure::new("SSE stream failed").details(json!({ "exception": e.to_string() })))?
                .ok_or_else(|| StepFailure::new("SSE stream closed"))?;
            self.buffer.push(&chunk);
        }
    }
}

/// Raw SSE bytes; decoded only once a whole event block has arrived.
#[derive(Debug, Default)]
struct SseBuffer {
    bytes: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
    }

    fn next_block(&mut self) -> Option<String> {
        let end = self.bytes.windows(2).position(|w| w == b"\n\n")?;
        let block: Vec<u8> = self.bytes.drain(..end + 2).collect();
        Some(String::from_utf8_lossy(&block).into_owned())
    }
}

/// Parses one SSE event block; `None` for non-`message` events.
fn parse_sse_block(block: &str) -> Option<Value> {
    let mut event = "message";
    let mut data = Vec::new();
    for line in block.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event = name.trim();
        } else if let Some(chunk) = line.strip_prefix("data:") {
            data.push(chunk.trim());
        }
    }
    if event != "message" || data.is_empty() {
        return None;
    }
    serde_json::from_str(&data.join("\n")).ok()
}

#[async_trait]
impl RpcClient for HttpClient {
    async fn send(&mut self, request: Value) -> Result<Value, StepFailure> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                StepFailure::new("HTTP connection failed")
                    .details(json!({ "reason": e.to_string() }))
            })?;
        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(StepFailure::new("HTTP request failed")
                .suggest("check the message endpoint is served")
                .details(json!({ "status": response.status().as_u16() })));
        }
        self.next_message().await
    }
}

fn round_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
