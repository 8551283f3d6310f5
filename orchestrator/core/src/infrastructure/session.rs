// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool-Server Session Manager: a persistent, resumable client for the
//! JSON-RPC-over-HTTP+SSE protocol described in spec.md §4.2. Built from
//! the original `mcp_session_manager.py`, generalised from
//! synchronous-per-call Python to `tokio`/`reqwest`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::mcp::{
    ClientInfo, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MCPSession, SessionError,
    TimeoutPolicy, ToolCallResult, ToolDescriptor, DEFAULT_PROTOCOL_VERSION,
};

const MAX_CALL_ATTEMPTS: u32 = 3;
const CANCEL_NOTIFICATION_BUDGET: Duration = Duration::from_secs(5);

/// Per-endpoint state: the negotiated session plus the two locks spec.md
/// §4.2 requires — one serialising `initialize`, one serialising
/// `call_tool` (but never `list_tools`, which takes no lock at all).
struct EndpointState {
    session: RwLock<Option<MCPSession>>,
    init_lock: Mutex<()>,
    call_lock: Mutex<()>,
}

impl EndpointState {
    fn new() -> Self {
        Self { session: RwLock::new(None), init_lock: Mutex::new(()), call_lock: Mutex::new(()) }
    }
}

pub struct SessionManager {
    http: Client,
    endpoints: RwLock<HashMap<String, Arc<EndpointState>>>,
    request_id_counter: AtomicU64,
    client_info: ClientInfo,
    timeouts: TimeoutPolicy,
}

impl SessionManager {
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        Self {
            http: Client::builder().build().expect("reqwest client builder"),
            endpoints: RwLock::new(HashMap::new()),
            request_id_counter: AtomicU64::new(1),
            client_info: ClientInfo::default(),
            timeouts,
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn endpoint_state(&self, endpoint: &str) -> Arc<EndpointState> {
        if let Some(state) = self.endpoints.read().await.get(endpoint) {
            return state.clone();
        }
        let mut map = self.endpoints.write().await;
        map.entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(EndpointState::new()))
            .clone()
    }

    /// Ensure a Ready session exists for `endpoint`, initialising it if
    /// needed. Double-checked locking: the fast path takes only the read
    /// lock on the cached session; the slow path takes the init lock and
    /// re-checks before issuing the handshake, so a concurrent first-use
    /// burst produces exactly one `initialize` request (spec.md §8 property 9).
    async fn ensure_session(&self, endpoint: &str) -> Result<(), SessionError> {
        let state = self.endpoint_state(endpoint).await;
        if state.session.read().await.is_some() {
            return Ok(());
        }
        let _guard = state.init_lock.lock().await;
        if state.session.read().await.is_some() {
            return Ok(());
        }
        let session = self.initialise(endpoint).await?;
        *state.session.write().await = Some(session);
        Ok(())
    }

    async fn initialise(&self, endpoint: &str) -> Result<MCPSession, SessionError> {
        let params = json!({
            "protocolVersion": DEFAULT_PROTOCOL_VERSION,
            "clientInfo": { "name": self.client_info.name, "version": self.client_info.version },
            "capabilities": {},
        });
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, "initialize", params);

        let response = self
            .http
            .post(endpoint)
            .timeout(self.timeouts.initialise)
            .header("Accept", "application/json, text/event-stream")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| SessionError::Initialisation { endpoint: endpoint.to_string(), reason: e.to_string() })?;

        let session_id = response
            .headers()
            .get("MCP-Session-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let (rpc_response, last_event_id, retry_delay) = read_body_as_rpc(response, &self.timeouts).await?;

        let result = rpc_response.result.ok_or_else(|| SessionError::Initialisation {
            endpoint: endpoint.to_string(),
            reason: "initialize response carried no result".to_string(),
        })?;

        let protocol_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION)
            .to_string();
        let server_capabilities = result.get("capabilities").cloned().unwrap_or(Value::Null);

        let mut session = MCPSession::new(endpoint, protocol_version);
        session.session_id = session_id;
        session.server_capabilities = server_capabilities;
        session.client_capabilities = json!({});
        session.last_event_id = last_event_id;
        session.retry_delay = retry_delay;

        self.send_initialized(endpoint, &session).await;

        info!(endpoint = %endpoint, "tool server session initialised");
        Ok(session)
    }

    async fn send_initialized(&self, endpoint: &str, session: &MCPSession) {
        let notification = JsonRpcNotification::new("notifications/initialized", json!({}));
        let mut req = self.http.post(endpoint).header("Content-Type", "application/json");
        req = apply_session_headers(req, session);
        match req.json(&notification).send().await {
            Ok(resp) if resp.status() == StatusCode::ACCEPTED => {}
            Ok(resp) => warn!(endpoint = %endpoint, status = %resp.status(), "non-202 response to initialized notification (warning only)"),
            Err(e) => warn!(endpoint = %endpoint, error = %e, "failed to send initialized notification"),
        }
    }

    /// `tools/list` — takes no per-endpoint lock; it does not serialise
    /// against itself, only against `call_tool` by virtue of sharing the
    /// endpoint's session state (spec.md §5).
    pub async fn list_tools(&self, endpoint: &str) -> Result<Vec<ToolDescriptor>, SessionError> {
        self.ensure_session(endpoint).await?;
        let state = self.endpoint_state(endpoint).await;
        let session = state.session.read().await.clone().ok_or_else(|| SessionError::UnknownEndpoint(endpoint.to_string()))?;

        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, "tools/list", json!({}));
        let mut req = self
            .http
            .post(endpoint)
            .timeout(self.timeouts.list)
            .header("Accept", "application/json, text/event-stream")
            .header("Content-Type", "application/json");
        req = apply_session_headers(req, &session);

        let response = req
            .json(&request)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            *state.session.write().await = None;
            return Err(SessionError::Expired { endpoint: endpoint.to_string() });
        }

        let (rpc_response, _, _) = read_body_as_rpc(response, &self.timeouts).await?;
        if let Some(error) = rpc_response.error {
            return Err(SessionError::ToolServer { message: error.message, data: error.data });
        }
        let result = rpc_response.result.unwrap_or(Value::Null);
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools).map_err(|e| SessionError::Protocol { endpoint: endpoint.to_string(), reason: e.to_string() })
    }

    /// `tools/call` — strictly serialised per endpoint via `call_lock`.
    /// Up to three attempts; between attempts wait the server-supplied
    /// retry delay if present, else exponential backoff from 1s. A mid-call
    /// 404 drops the session and retries immediately without counting
    /// against the attempt budget (spec.md §4.2).
    pub async fn call_tool(&self, endpoint: &str, name: &str, arguments: Value) -> Result<ToolCallResult, SessionError> {
        let state = self.endpoint_state(endpoint).await;
        let _call_guard = state.call_lock.lock().await;

        let mut attempt = 0u32;
        let mut backoff = Duration::from_secs(1);
        let mut last_event_id: Option<String> = None;
        let mut last_error = None;

        loop {
            self.ensure_session(endpoint).await?;
            let session = state.session.read().await.clone().ok_or_else(|| SessionError::UnknownEndpoint(endpoint.to_string()))?;
            let request_id = self.next_request_id();
            let request = JsonRpcRequest::new(request_id, "tools/call", json!({ "name": name, "arguments": arguments }));

            let mut req = self
                .http
                .post(endpoint)
                .timeout(self.timeouts.call)
                .header("Accept", "application/json, text/event-stream")
                .header("Content-Type", "application/json");
            req = apply_session_headers(req, &session);
            if let Some(ref event_id) = last_event_id.clone().or_else(|| session.last_event_id.clone()) {
                req = req.header("Last-Event-ID", event_id.clone());
            }

            let sent = req.json(&request).send().await;

            match sent {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    *state.session.write().await = None;
                    // Not counted against the attempt budget.
                    continue;
                }
                Ok(response) => match read_body_as_rpc(response, &self.timeouts).await {
                    Ok((rpc_response, event_id, retry_delay)) => {
                        if let Some(event_id) = event_id {
                            last_event_id = Some(event_id.clone());
                            if let Some(mut s) = state.session.write().await.take() {
                                s.last_event_id = Some(event_id);
                                if retry_delay.is_some() {
                                    s.retry_delay = retry_delay;
                                }
                                *state.session.write().await = Some(s);
                            }
                        }
                        if let Some(error) = rpc_response.error {
                            return Err(SessionError::ToolServer { message: error.message, data: error.data });
                        }
                        let result = rpc_response.result.unwrap_or(Value::Null);
                        return Ok(parse_tool_result(result));
                    }
                    Err(e) => {
                        last_error = Some(e);
                    }
                },
                Err(e) => {
                    last_error = Some(SessionError::Transport(e.to_string()));
                }
            }

            attempt += 1;
            if attempt >= MAX_CALL_ATTEMPTS {
                self.best_effort_cancel(endpoint, &state, request_id).await;
                return Err(last_error.unwrap_or(SessionError::Timeout { endpoint: endpoint.to_string(), attempts: attempt }));
            }

            let delay = state
                .session
                .read()
                .await
                .as_ref()
                .and_then(|s| s.retry_delay)
                .unwrap_or(backoff);
            tokio::time::sleep(delay).await;
            backoff *= 2;
        }
    }

    async fn best_effort_cancel(&self, endpoint: &str, state: &EndpointState, request_id: u64) {
        let session = state.session.read().await.clone();
        let Some(session) = session else { return };
        let notification = JsonRpcNotification::new("notifications/cancelled", json!({ "requestId": request_id }));
        let mut req = self.http.post(endpoint).timeout(CANCEL_NOTIFICATION_BUDGET).header("Content-Type", "application/json");
        req = apply_session_headers(req, &session);
        match req.json(&notification).send().await {
            Ok(_) => debug!(endpoint = %endpoint, "best-effort cancel notification sent"),
            Err(e) => debug!(endpoint = %endpoint, error = %e, "best-effort cancel notification failed"),
        }
    }

    /// Releases pooled HTTP connections and drops all sessions.
    pub async fn close(&self) {
        self.endpoints.write().await.clear();
    }
}

fn apply_session_headers(mut req: reqwest::RequestBuilder, session: &MCPSession) -> reqwest::RequestBuilder {
    req = req.header("MCP-Protocol-Version", session.protocol_version.clone());
    if let Some(ref session_id) = session.session_id {
        req = req.header("MCP-Session-Id", session_id.clone());
    }
    req
}

fn parse_tool_result(result: Value) -> ToolCallResult {
    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
    let text = result
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str);

    let content = match text {
        Some(text) => serde_json::from_str(text).unwrap_or(Value::String(text.to_string())),
        None => result.get("content").cloned().unwrap_or(Value::Null),
    };
    ToolCallResult { is_error, content }
}


/// Accept either a plain JSON response or an SSE stream; for SSE,
/// reassemble per the line-based event-stream format (spec.md §4.2): lines
/// beginning with `id:`, `data:`, `retry:`, and `:` comments; a blank line
/// dispatches. Returns the JSON-RPC response plus the last seen event id
/// and any `retry:` delay.
async fn read_body_as_rpc(
    response: reqwest::Response,
    timeouts: &TimeoutPolicy,
) -> Result<(JsonRpcResponse, Option<String>, Option<Duration>), SessionError> {
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.contains("text/event-stream") {
        read_sse_response(response, timeouts).await
    } else {
        let body: Value = response.json().await.map_err(|e| SessionError::Protocol { endpoint: String::new(), reason: e.to_string() })?;
        let rpc: JsonRpcResponse = serde_json::from_value(body).map_err(|e| SessionError::Protocol { endpoint: String::new(), reason: e.to_string() })?;
        Ok((rpc, None, None))
    }
}

async fn read_sse_response(
    response: reqwest::Response,
    timeouts: &TimeoutPolicy,
) -> Result<(JsonRpcResponse, Option<String>, Option<Duration>), SessionError> {
    use futures::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut data_lines: Vec<String> = Vec::new();
    let mut current_id: Option<String> = None;
    let mut last_event_id: Option<String> = None;
    let mut retry_delay: Option<Duration> = None;

    let deadline = tokio::time::Instant::now() + timeouts.call;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(SessionError::Timeout { endpoint: String::new(), attempts: 1 });
        }
        let chunk = match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(e))) => return Err(SessionError::Transport(e.to_string())),
            Ok(None) => return Err(SessionError::Protocol { endpoint: String::new(), reason: "SSE stream ended without a dispatched response".to_string() }),
            Err(_) => return Err(SessionError::Timeout { endpoint: String::new(), attempts: 1 }),
        };

        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline_pos) = buffer.find('\n') {
            let line = buffer[..newline_pos].trim_end_matches('\r').to_string();
            buffer.drain(..=newline_pos);

            if line.is_empty() {
                // Blank line dispatches the accumulated event.
                if !data_lines.is_empty() {
                    let data = data_lines.join("\n");
                    data_lines.clear();
                    if let Ok(parsed) = serde_json::from_str::<Value>(&data) {
                        if parsed.get("result").is_some() || parsed.get("error").is_some() {
                            if let Some(id) = current_id.take() {
                                last_event_id = Some(id);
                            }
                            let rpc: JsonRpcResponse = serde_json::from_value(parsed)
                                .map_err(|e| SessionError::Protocol { endpoint: String::new(), reason: e.to_string() })?;
                            return Ok((rpc, last_event_id, retry_delay));
                        }
                        // method-without-id: server notification, continue reading.
                    }
                }
                continue;
            }
            if line.starts_with(':') {
                continue; // comment
            }
            if let Some(rest) = line.strip_prefix("id:") {
                current_id = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.trim_start().to_string());
            } else if let Some(rest) = line.strip_prefix("retry:") {
                if let Ok(ms) = rest.trim().parse::<u64>() {
                    retry_delay = Some(Duration::from_millis(ms));
                }
            }
        }
    }
}
