//! Child-process MCP transport (streaming)
//!
//! Most providers speak the richer streaming transport through a spawned
//! process. Connections are spawn-per-call: each operation spawns the server,
//! serves the handshake, performs the call and cancels. This keeps the
//! transport Send-safe at the cost of process startup per call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, RawContent},
    transport::TokioChildProcess,
    ServiceExt,
};
use serde_json::Value;
use tokio::process::Command;

use crate::config::SpawnProviderConfig;
use crate::error::ProviderError;

use super::connection::ProviderTransport;
use super::types::ToolDescriptor;

/// Transport backed by a spawned MCP server process.
pub struct ChildProcessTransport {
    config: SpawnProviderConfig,
}

impl ChildProcessTransport {
    pub fn new(config: SpawnProviderConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.command);
        if !self.config.args.is_empty() {
            cmd.args(&self.config.args);
        }
        for (key, value) in &self.config.env {
            let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
            cmd.env(key, expanded.as_ref());
        }
        cmd
    }

    async fn list_tools_once(&self) -> Result<Vec<ToolDescriptor>> {
        let transport = TokioChildProcess::new(self.command())?;
        let service = ().serve(transport).await?;

        let response = service
            .list_tools(Default::default())
            .await
            .context("Failed to list tools")?;

        let tools = response
            .tools
            .into_iter()
            .map(|t| ToolDescriptor {
                provider: String::new(),
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()),
                input_schema: Some(serde_json::to_value(&t.input_schema).unwrap_or_default()),
            })
            .collect();

        service.cancel().await?;
        Ok(tools)
    }

    async fn call_tool_once(&self, tool_name: &str, arguments: Value) -> Result<CallToolResult> {
        let transport = TokioChildProcess::new(self.command())?;
        let service = ().serve(transport).await?;

        let args = arguments.as_object().cloned();
        let result = service
            .call_tool(CallToolRequestParam {
                name: tool_name.to_string().into(),
                arguments: args,
                task: None,
            })
            .await
            .context("Failed to call tool")?;

        service.cancel().await?;
        Ok(result)
    }
}

/// Flatten a CallToolResult into plain text for the conversation.
pub(crate) fn render_call_result(result: &CallToolResult) -> String {
    let mut output = String::new();
    for content in &result.content {
        if !output.is_empty() {
            output.push('\n');
        }
        match &content.raw {
            RawContent::Text(text) => output.push_str(&text.text),
            other => output.push_str(&format!("{:?}", other)),
        }
    }
    output
}

#[async_trait]
impl ProviderTransport for ChildProcessTransport {
    /// Probe the server once so pool initialization can isolate providers
    /// that fail to start or hang on first-run setup.
    async fn initialize(&self) -> Result<(), ProviderError> {
        let transport = TokioChildProcess::new(self.command())
            .context("Failed to spawn MCP server process")?;
        let service = ().serve(transport).await.context("MCP handshake failed")?;
        service.cancel().await.context("Failed to close probe connection")?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        Ok(self.list_tools_once().await?)
    }

    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<String, ProviderError> {
        let result = self.call_tool_once(tool_name, arguments).await?;
        Ok(render_call_result(&result))
    }

    async fn cleanup(&self) -> Result<(), ProviderError> {
        // Nothing persistent to tear down in spawn-per-call mode.
        Ok(())
    }
}
