//! Model access: conversation wire types, tool-catalog rendering and the
//! `ModelClient` seam the orchestration loop drives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;
use crate::mcp::ToolDescriptor;

mod openai;
pub use openai::OpenAiClient;

/// A role-tagged message in the conversation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Assistant turn that proposed tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    /// Tool result correlated to the proposing call.
    pub fn tool_result(call_id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: call_id,
        }
    }

    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// A tool invocation proposed by the model. Arguments arrive as a JSON
/// string per the function-call schema.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Parse the argument string, tolerating empty or malformed payloads.
    pub fn parsed_arguments(&self) -> Value {
        if self.function.arguments.trim().is_empty() {
            return Value::Object(Default::default());
        }
        serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// A tool rendered in the provider-neutral function-call schema.
#[derive(Debug, Serialize, Clone)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub spec_type: String,
    pub function: ToolSpecFunction,
}

#[derive(Debug, Serialize, Clone)]
pub struct ToolSpecFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The model's answer for one round: free text, tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Model-access client. `propose` opens a round with the tool catalog;
/// `decide_next` is the follow-up call after tool results are appended, to
/// decide continue-vs-stop; `complete` is a plain chat turn used for
/// auxiliary work (summaries, title rewrites).
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn propose(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, AgentError>;

    async fn decide_next(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, AgentError>;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AgentError>;
}

/// Strip schema fields that confuse function-calling endpoints
/// ($schema, title, additionalProperties), recursively.
pub fn clean_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => {
            let mut cleaned = serde_json::Map::new();
            for (key, value) in obj {
                if key == "$schema" || key == "title" || key == "additionalProperties" {
                    continue;
                }
                cleaned.insert(key.clone(), clean_schema(value));
            }
            Value::Object(cleaned)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(clean_schema).collect()),
        other => other.clone(),
    }
}

/// Render a tool catalog in the function-call schema.
pub fn render_tool_specs(tools: &[ToolDescriptor]) -> Vec<ToolSpec> {
    tools
        .iter()
        .map(|tool| {
            let parameters = tool
                .input_schema
                .as_ref()
                .map(clean_schema)
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));

            ToolSpec {
                spec_type: "function".to_string(),
                function: ToolSpecFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone().unwrap_or_default(),
                    parameters,
                },
            }
        })
        .collect()
}
