//! Provider connections
//!
//! `ProviderTransport` is the capability-uniform seam between the pool and
//! the two concrete transports (plain JSON-RPC HTTP, streaming child
//! process). The pool holds trait objects and never inspects the concrete
//! type.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ProviderError;

use super::http::HttpJsonRpcTransport;
use super::types::ToolDescriptor;

/// Capability set shared by every transport: handshake, discovery,
/// invocation, release.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// List tools. The `provider` field of returned descriptors is filled in
    /// by the owning connection.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError>;

    /// Invoke a tool, returning its result rendered as text.
    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<String, ProviderError>;

    async fn cleanup(&self) -> Result<(), ProviderError>;
}

#[async_trait]
impl ProviderTransport for HttpJsonRpcTransport {
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(HttpJsonRpcTransport::initialize(self).await?)
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        let raw = HttpJsonRpcTransport::list_tools(self).await?;
        Ok(raw
            .into_iter()
            .filter_map(|t| {
                let name = t.get("name")?.as_str()?.to_string();
                Some(ToolDescriptor {
                    provider: String::new(),
                    name,
                    description: t
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    input_schema: t.get("inputSchema").cloned(),
                })
            })
            .collect())
    }

    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<String, ProviderError> {
        let result = HttpJsonRpcTransport::call_tool(self, tool_name, arguments).await?;
        Ok(render_result_value(result))
    }

    async fn cleanup(&self) -> Result<(), ProviderError> {
        HttpJsonRpcTransport::cleanup(self);
        Ok(())
    }
}

/// Flatten a `tools/call` result value into text: join the text items of a
/// `content` array, otherwise serialize the whole value.
fn render_result_value(result: Option<Value>) -> String {
    let Some(result) = result else {
        return String::new();
    };

    if let Some(content) = result.get("content").and_then(Value::as_array) {
        let mut output = String::new();
        for item in content {
            if let Some(text) = item.get("text").and_then(Value::as_str) {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(text);
            }
        }
        if !output.is_empty() {
            return output;
        }
    }

    result.to_string()
}

/// Connection lifecycle. A connection only answers calls while Ready;
/// Closed releases the transport exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Ready,
    Failed,
    Closed,
}

/// A named provider connection with a cached tool catalog.
pub struct ProviderConnection {
    name: String,
    transport: Box<dyn ProviderTransport>,
    state: Mutex<ConnectionState>,
    tools: Mutex<Option<Vec<ToolDescriptor>>>,
}

impl ProviderConnection {
    pub fn new(name: &str, transport: Box<dyn ProviderTransport>) -> Self {
        Self {
            name: name.to_string(),
            transport,
            state: Mutex::new(ConnectionState::Uninitialized),
            tools: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Perform the transport handshake. Failure leaves the connection in the
    /// Failed state; it will refuse tool calls from then on.
    pub async fn initialize(&self) -> Result<(), ProviderError> {
        {
            let state = self.state.lock().await;
            if *state != ConnectionState::Uninitialized {
                return Err(ProviderError::NotReady(self.name.clone()));
            }
        }

        match self.transport.initialize().await {
            Ok(()) => {
                *self.state.lock().await = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                *self.state.lock().await = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    async fn require_ready(&self) -> Result<(), ProviderError> {
        if *self.state.lock().await != ConnectionState::Ready {
            return Err(ProviderError::NotReady(self.name.clone()));
        }
        Ok(())
    }

    /// Cached tool catalog; fetched once and cheap to call repeatedly.
    pub async fn cached_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        self.require_ready().await?;

        let mut cache = self.tools.lock().await;
        if let Some(tools) = cache.as_ref() {
            return Ok(tools.clone());
        }

        let mut tools = self.transport.list_tools().await?;
        for tool in &mut tools {
            tool.provider = self.name.clone();
        }
        tracing::info!("Provider '{}': {} tools (cached)", self.name, tools.len());
        *cache = Some(tools.clone());
        Ok(tools)
    }

    /// Drop the cache and re-list on next use.
    pub async fn invalidate_tools(&self) {
        *self.tools.lock().await = None;
    }

    pub async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<String, ProviderError> {
        self.require_ready().await?;
        self.transport.call_tool(tool_name, arguments).await
    }

    /// Release the transport. The teardown runs at most once; repeated calls
    /// are no-ops.
    pub async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        if *state == ConnectionState::Closed {
            return;
        }
        *state = ConnectionState::Closed;
        drop(state);

        if let Err(e) = self.transport.cleanup().await {
            tracing::warn!("Cleanup warning for '{}': {}", self.name, e);
        }
    }
}
