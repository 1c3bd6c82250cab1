//! MCP (Model Context Protocol) tool gateway over streamable HTTP.
//!
//! Handshake: `initialize` → `notifications/initialized` → `tools/list`.
//! Every request is a JSON-RPC 2.0 POST; the server may answer with plain
//! JSON or an SSE body. The `Mcp-Session-Id` header is captured from any
//! response and replayed on every later request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use learnpath_core::error::{ConnectionError, ToolError};
use learnpath_core::tool::{
    ToolCatalog, ToolDescriptor, ToolGateway, ToolInvocation, ToolInvocationResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::schema;

const PROTOCOL_VERSION: &str = "2025-03-26";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_HEADER: &str = "Mcp-Session-Id";

// --- JSON-RPC types ---

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    id: u64,
}

#[derive(Debug, Serialize)]
struct JsonRpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

// --- MCP types ---

#[derive(Debug, Deserialize)]
struct McpToolsListResult {
    tools: Vec<ToolDescriptor>,
}

/// `content` is either a bare string or a list of typed blocks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum McpContent {
    Text(String),
    Blocks(Vec<McpContentBlock>),
}

#[derive(Debug, Deserialize)]
struct McpContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpCallToolResult {
    content: McpContent,
    #[serde(default)]
    is_error: bool,
}

/// Failure of one JSON-RPC exchange. Mapped to a [`ConnectionError`] during
/// the handshake and to a [`ToolError`] during tool calls.
#[derive(Debug, thiserror::Error)]
enum McpError {
    #[error("{0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("{0}")]
    Protocol(String),
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        McpError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::Protocol(format!("malformed JSON-RPC payload: {e}"))
    }
}

// --- Pure helper functions ---

/// Parse all SSE data payloads from a `text/event-stream` body.
///
/// Multi-line `data:` fields are joined with `\n`. Events come back in order.
fn extract_sse_events(body: &str) -> Result<Vec<String>, McpError> {
    let mut events: Vec<String> = Vec::new();
    let mut current_lines: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.trim().is_empty() {
            if !current_lines.is_empty() {
                events.push(current_lines.join("\n"));
                current_lines.clear();
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            // Strip exactly one leading space after the colon
            let data = rest.strip_prefix(' ').unwrap_or(rest);
            current_lines.push(data);
        }
    }

    if !current_lines.is_empty() {
        events.push(current_lines.join("\n"));
    }

    if events.is_empty() {
        return Err(McpError::Protocol("No data field in SSE response".into()));
    }
    Ok(events)
}

/// Find the JSON-RPC response matching `expected_id` in a list of SSE payloads.
///
/// Falls back to the last event when no ID matches (servers that null the ID
/// in error responses).
fn find_rpc_response(events: &[String], expected_id: u64) -> Result<String, McpError> {
    for event in events {
        if let Ok(value) = serde_json::from_str::<Value>(event)
            && value.get("id").and_then(Value::as_u64) == Some(expected_id)
        {
            return Ok(event.clone());
        }
    }
    events
        .last()
        .cloned()
        .ok_or_else(|| McpError::Protocol("No events in SSE response".into()))
}

/// Flatten a `tools/call` result into one text, text blocks joined as-is.
fn normalize_result(id: &str, result: McpCallToolResult) -> ToolInvocationResult {
    let text = match result.content {
        McpContent::Text(text) => text,
        McpContent::Blocks(blocks) => blocks
            .into_iter()
            .filter(|b| b.content_type == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""),
    };

    if result.is_error {
        ToolInvocationResult::error(id, text)
    } else {
        ToolInvocationResult::success(id, text)
    }
}

// --- McpSession ---

struct McpSession {
    client: reqwest::Client,
    endpoint: String,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl McpSession {
    fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self {
            client,
            endpoint,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn read_session_id(&self) -> Option<String> {
        self.session_id.read().ok().and_then(|sid| sid.clone())
    }

    /// Update session ID from response header if the server provides one.
    fn update_session_id(&self, response: &reqwest::Response) {
        if let Some(new_sid) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            && let Ok(mut sid) = self.session_id.write()
        {
            *sid = Some(new_sid.to_string());
        }
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json, text/event-stream");
        match self.read_session_id() {
            Some(sid) => builder.header(SESSION_HEADER, sid),
            None => builder,
        }
    }

    async fn rpc(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let response = self.post().json(&request).send().await?;
        self.update_session_id(&response);

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(McpError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let json_str = if content_type.contains("text/event-stream") {
            let events = extract_sse_events(&body)?;
            find_rpc_response(&events, id)?
        } else {
            body
        };

        let rpc_response: JsonRpcResponse = serde_json::from_str(&json_str)?;

        if let Some(err) = rpc_response.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        rpc_response
            .result
            .ok_or_else(|| McpError::Protocol("Response missing both result and error".into()))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method,
            params,
        };

        let response = self.post().json(&notification).send().await?;
        self.update_session_id(&response);

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(McpError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpCallToolResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let result_value = self.rpc("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result_value)?)
    }

    /// Ask the server to drop the session. Best effort.
    async fn terminate(&self) {
        let Some(sid) = self.read_session_id() else {
            return;
        };
        if let Err(e) = self
            .client
            .delete(&self.endpoint)
            .header(SESSION_HEADER, sid)
            .send()
            .await
        {
            debug!(error = %e, "MCP session termination failed");
        }
    }
}

/// A live channel: the session plus the catalog it advertised.
struct McpConnection {
    session: McpSession,
    catalog: ToolCatalog,
}

// --- McpGateway ---

/// [`ToolGateway`] backed by an MCP server.
///
/// The connection is shared read-mostly state; only `connect()` and
/// `close()` replace it. Calls clone the `Arc` out of the lock, so the lock
/// is never held across an `.await`.
pub struct McpGateway {
    endpoint: String,
    client: reqwest::Client,
    state: RwLock<Option<Arc<McpConnection>>>,
}

impl McpGateway {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create with a per-request HTTP timeout.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: endpoint.into(),
            client,
            state: RwLock::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connection(&self) -> Option<Arc<McpConnection>> {
        self.state.read().ok().and_then(|s| s.clone())
    }

    fn handshake_error(&self, e: McpError) -> ConnectionError {
        match e {
            McpError::Transport(reason) => ConnectionError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason,
            },
            McpError::Http { .. } | McpError::Rpc { .. } => {
                ConnectionError::Handshake(e.to_string())
            }
            McpError::Protocol(msg) => ConnectionError::Protocol(msg),
        }
    }

    async fn execute(
        &self,
        connection: &McpConnection,
        invocation: &ToolInvocation,
    ) -> Result<ToolInvocationResult, ToolError> {
        let tool = connection
            .catalog
            .get(&invocation.name)
            .ok_or_else(|| ToolError::NotFound(invocation.name.clone()))?;

        // MCP servers expect arguments to be an object, never null
        let arguments = if invocation.arguments.is_null() {
            serde_json::json!({})
        } else {
            invocation.arguments.clone()
        };

        let violations = schema::validate(&tool.input_schema, &arguments);
        if !violations.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool_name: invocation.name.clone(),
                violations,
            });
        }

        let result = connection
            .session
            .call_tool(&invocation.name, arguments)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: invocation.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(normalize_result(&invocation.id, result))
    }
}

#[async_trait]
impl ToolGateway for McpGateway {
    fn name(&self) -> &str {
        "mcp"
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        let session = McpSession::new(self.client.clone(), self.endpoint.clone());

        session
            .rpc(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "learnpath",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await
            .map_err(|e| self.handshake_error(e))?;

        session
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| self.handshake_error(e))?;

        let tools_result = session
            .rpc("tools/list", None)
            .await
            .map_err(|e| self.handshake_error(e))?;
        let tools_list: McpToolsListResult = serde_json::from_value(tools_result)
            .map_err(|e| ConnectionError::Protocol(format!("invalid tools/list result: {e}")))?;

        let catalog = ToolCatalog::new(tools_list.tools);
        info!(
            endpoint = %self.endpoint,
            tools = ?catalog.names(),
            "Connected to tool server"
        );

        let previous = match self.state.write() {
            Ok(mut state) => state.replace(Arc::new(McpConnection { session, catalog })),
            Err(_) => {
                return Err(ConnectionError::Protocol("gateway state lock poisoned".into()));
            }
        };
        if let Some(previous) = previous {
            previous.session.terminate().await;
        }
        Ok(())
    }

    fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ConnectionError> {
        self.connection()
            .map(|c| c.catalog.descriptors().to_vec())
            .ok_or(ConnectionError::NotConnected)
    }

    async fn call_tool(&self, invocation: &ToolInvocation) -> ToolInvocationResult {
        let Some(connection) = self.connection() else {
            return ToolInvocationResult::error(
                &invocation.id,
                format!("Error: {}", ConnectionError::NotConnected),
            );
        };

        debug!(tool = %invocation.name, id = %invocation.id, "Calling MCP tool");

        match self.execute(&connection, invocation).await {
            Ok(result) => {
                if result.is_error {
                    warn!(tool = %invocation.name, "MCP tool reported an error");
                }
                result
            }
            Err(e) => {
                warn!(tool = %invocation.name, error = %e, "MCP tool call failed");
                ToolInvocationResult::from_error(&invocation.id, &e)
            }
        }
    }

    async fn close(&self) {
        let taken = self.state.write().ok().and_then(|mut s| s.take());
        if let Some(connection) = taken {
            connection.session.terminate().await;
            info!(endpoint = %self.endpoint, "Closed tool server channel");
        }
    }
}
