//! Local tools
//!
//! In-process tools that sit alongside provider tools in the unified
//! catalog. They carry the synthetic provider name "local" and shadow any
//! provider tool with the same name.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::mcp::ToolDescriptor;

pub const LOCAL_PROVIDER: &str = "local";

/// A tool executed inside the process instead of over a transport.
#[async_trait]
pub trait LocalTool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn execute(&self, arguments: Value) -> Result<String>;
}

type BlockingToolFn = dyn Fn(Value) -> Result<String> + Send + Sync;

/// Local tool wrapping a blocking function, run on the blocking pool so it
/// never stalls the executor.
pub struct FnTool {
    descriptor: ToolDescriptor,
    func: Arc<BlockingToolFn>,
}

impl FnTool {
    pub fn new(
        name: &str,
        description: &str,
        input_schema: Value,
        func: impl Fn(Value) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptor: ToolDescriptor {
                provider: LOCAL_PROVIDER.to_string(),
                name: name.to_string(),
                description: Some(description.to_string()),
                input_schema: Some(input_schema),
            },
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl LocalTool for FnTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        let func = self.func.clone();
        tokio::task::spawn_blocking(move || func(arguments))
            .await
            .map_err(|e| anyhow::anyhow!("Local tool panicked: {}", e))?
    }
}

/// Local tools the binary registers by default. Deployments without the
/// paper toolchain still expose both tools in the catalog; they answer with
/// a clear not-configured message so the model falls back to web search
/// instead of inventing results.
pub fn builtin_tools() -> Vec<Arc<dyn LocalTool>> {
    vec![
        Arc::new(FnTool::new(
            "search_latest_papers",
            "Search arXiv for recent papers matching a query",
            paper_search_schema(),
            |_args| {
                Ok("Error: paper search is not configured in this deployment; \
                    use the web search tools instead."
                    .to_string())
            },
        )),
        Arc::new(FnTool::new(
            "download_and_process_paper",
            "Download a paper PDF and extract its content",
            paper_fetch_schema(),
            |_args| {
                Ok("Error: paper processing is not configured in this deployment; \
                    work from the paper's abstract and web sources instead."
                    .to_string())
            },
        )),
    ]
}

/// Schema for the paper-search tool shipped as a local tool in research
/// deployments.
pub fn paper_search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Search query for recent papers"
            },
            "max_results": {
                "type": "integer",
                "description": "Maximum number of papers to return"
            }
        },
        "required": ["query"]
    })
}

/// Schema for the paper download-and-extract tool.
pub fn paper_fetch_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "url": {
                "type": "string",
                "description": "URL of the paper PDF to download and extract"
            }
        },
        "required": ["url"]
    })
}
