// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain types for the tool-server wire protocol (JSON-RPC 2.0 over
//! HTTPS, optionally SSE-streamed). A [`MCPSession`] is the orchestrator's
//! view of one negotiated connection to a tool server, keyed by endpoint
//! URL. Sessions are never exposed by reference outside the Session
//! Manager — infrastructure::session owns the maps and locks; this module
//! only owns the value types.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Negotiated state of one tool-server connection.
///
/// Tracks `last_event_id`/`retry_delay` per endpoint rather than on the
/// owning manager: the original implementation kept these on the manager
/// singleton, which meant a slow-resuming stream on one endpoint could
/// poison the `Last-Event-ID` sent to an unrelated endpoint. That is
/// corrected here by hanging both fields off the session itself.
#[derive(Debug, Clone)]
pub struct MCPSession {
    pub endpoint: String,
    pub protocol_version: String,
    pub session_id: Option<String>,
    pub server_capabilities: Value,
    pub client_capabilities: Value,
    pub initialized_at: DateTime<Utc>,
    pub last_event_id: Option<String>,
    pub retry_delay: Option<Duration>,
}

impl MCPSession {
    pub fn new(endpoint: impl Into<String>, protocol_version: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            protocol_version: protocol_version.into(),
            session_id: None,
            server_capabilities: Value::Null,
            client_capabilities: Value::Null,
            initialized_at: Utc::now(),
            last_event_id: None,
            retry_delay: None,
        }
    }
}

/// Descriptor for one callable tool, as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Process-wide entry in the Tool Descriptor Registry (spec.md §4.4):
/// maps a tool-server *name* to the endpoint the Container Manager
/// provisioned for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerInfo {
    pub name: String,
    pub endpoint: String,
    pub description: Option<String>,
    pub version: Option<String>,
}

/// Outcome of a `tools/call` JSON-RPC invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub is_error: bool,
    /// Raw text payload; the Workflow Engine attempts to parse this as JSON
    /// and falls back to the raw string when parsing fails (spec.md §4.3.1).
    pub content: Value,
}

/// A single outbound JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0", id, method: method.into(), params }
    }
}

/// A JSON-RPC 2.0 notification (no `id`, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0", method: method.into(), params }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Error taxonomy for the Session Manager, spec.md §7.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session initialisation failed for {endpoint}: {reason}")]
    Initialisation { endpoint: String, reason: String },
    #[error("session for {endpoint} expired (404)")]
    Expired { endpoint: String },
    #[error("protocol error talking to {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },
    #[error("tool server returned an error: {message}")]
    ToolServer { message: String, data: Option<Value> },
    #[error("request to {endpoint} timed out after {attempts} attempt(s)")]
    Timeout { endpoint: String, attempts: u32 },
    #[error("unknown tool server: {0}")]
    UnknownEndpoint(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    pub initialise: Duration,
    pub list: Duration,
    pub call: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            initialise: Duration::from_secs(30),
            list: Duration::from_secs(10),
            call: Duration::from_secs(300),
        }
    }
}

/// Client identity advertised on `initialize`.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "aegis-tool-orchestrator".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

pub type ToolDescriptorMap = HashMap<String, ToolServerInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_policy_default_matches_documented_thresholds() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.initialise, Duration::from_secs(30));
        assert_eq!(policy.list, Duration::from_secs(10));
        assert_eq!(policy.call, Duration::from_secs(300));
    }

    #[test]
    fn client_info_default_advertises_crate_version() {
        let info = ClientInfo::default();
        assert_eq!(info.name, "aegis-tool-orchestrator");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn mcp_session_new_starts_with_no_negotiated_session_id() {
        let session = MCPSession::new("http://localhost:9001", DEFAULT_PROTOCOL_VERSION);
        assert_eq!(session.endpoint, "http://localhost:9001");
        assert!(session.session_id.is_none());
        assert!(session.last_event_id.is_none());
    }
}
