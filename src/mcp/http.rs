//! Plain JSON-RPC-over-HTTP transport
//!
//! Some MCP servers (notably Go implementations) answer a single JSON object
//! per POST instead of the SSE/streamable responses the richer transport
//! expects. This transport bridges that gap: request-id sequencing, the
//! `Mcp-Session-Id` correlation header, and the initialize handshake.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::TransportError;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// JSON-RPC 2.0 client over plain HTTP POST.
///
/// Request ids are transport-local and strictly increasing from 1. The
/// session token assigned by the server on handshake is attached to every
/// subsequent request and notification; a response may rotate it.
pub struct HttpJsonRpcTransport {
    url: String,
    client: reqwest::Client,
    request_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl HttpJsonRpcTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
            request_id: AtomicU64::new(0),
            session_id: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Perform the MCP handshake: `initialize` request, then the
    /// `notifications/initialized` notification.
    pub async fn initialize(&self) -> Result<(), TransportError> {
        let result = self
            .send_request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "inkpost",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;

        let result = result.ok_or_else(|| {
            TransportError::Handshake("initialize response contained no result".into())
        })?;

        let server_name = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let server_version = result
            .pointer("/serverInfo/version")
            .and_then(Value::as_str)
            .unwrap_or("?");
        tracing::info!("MCP handshake successful: {} v{}", server_name, server_version);

        self.send_notification("notifications/initialized", json!({}))
            .await;
        Ok(())
    }

    /// List available tools. An absent `tools` member is an empty list.
    pub async fn list_tools(&self) -> Result<Vec<Value>, TransportError> {
        let result = self.send_request("tools/list", json!({})).await?;
        Ok(result
            .and_then(|r| r.get("tools").cloned())
            .and_then(|t| t.as_array().cloned())
            .unwrap_or_default())
    }

    /// Call a tool and return the raw result value.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Option<Value>, TransportError> {
        self.send_request(
            "tools/call",
            json!({
                "name": tool_name,
                "arguments": arguments,
            }),
        )
        .await
    }

    /// Release the transport. Idempotent; no second teardown is attempted.
    pub fn cleanup(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("HTTP transport to {} closed", self.url);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current session token, if the server has assigned one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().expect("session lock poisoned").clone()
    }

    async fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<Value>, TransportError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&payload);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        self.capture_session(&response);

        let status = response.status();
        if !status.is_success() {
            tracing::error!("MCP HTTP error: {} for {}", status, method);
            return Err(TransportError::Status {
                status,
                method: method.to_string(),
            });
        }

        let body: Value = response.json().await?;
        parse_rpc_response(method, body)
    }

    /// Fire-and-forget notification. Failures are logged, never fatal.
    async fn send_notification(&self, method: &str, params: Value) {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&payload);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        match request.send().await {
            Ok(response) => {
                self.capture_session(&response);
                let status = response.status().as_u16();
                if !matches!(status, 200 | 202 | 204) {
                    tracing::warn!("Notification {} returned: {}", method, status);
                }
            }
            Err(e) => tracing::warn!("Notification {} failed: {}", method, e),
        }
    }

    /// Store the session token from a response header; the server may rotate
    /// it at any time.
    fn capture_session(&self, response: &reqwest::Response) {
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut guard = self.session_id.lock().expect("session lock poisoned");
            *guard = Some(session.to_string());
        }
    }
}

/// Extract the `result` member from a JSON-RPC response body, mapping an
/// `error` member to [`TransportError::Rpc`].
fn parse_rpc_response(method: &str, body: Value) -> Result<Option<Value>, TransportError> {
    if !body.is_object() {
        return Err(TransportError::Malformed {
            method: method.to_string(),
            detail: "response body is not a JSON object".into(),
        });
    }

    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(TransportError::Rpc { code, message });
    }

    Ok(body.get("result").cloned())
}
