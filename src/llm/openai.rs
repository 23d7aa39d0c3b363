//! OpenAI-compatible chat-completions client
//!
//! Talks to any endpoint that speaks the `/chat/completions` shape. The base
//! URL and model come from configuration, so the same client covers OpenAI,
//! Anthropic-compatible gateways and local servers.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::LlmConfig;
use crate::error::AgentError;

use super::{AssistantTurn, ChatMessage, ModelClient, ToolCall, ToolSpec};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, AgentError> {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            payload["tools"] = serde_json::to_value(tools).context("Failed to encode tools")?;
        }

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!("Chat request to {} ({} messages)", url, messages.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("Chat request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Model(format!(
                "Chat endpoint returned {}: {}",
                status,
                truncate_for_log(&body)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat response")?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Model("Chat response contained no choices".into()))?;

        Ok(AssistantTurn {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
        })
    }
}

fn truncate_for_log(body: &str) -> String {
    if body.chars().count() > 500 {
        let cut: String = body.chars().take(500).collect();
        format!("{}...", cut)
    } else {
        body.to_string()
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn propose(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, AgentError> {
        self.chat(messages, tools).await
    }

    async fn decide_next(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, AgentError> {
        self.chat(messages, tools).await
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let turn = self.chat(messages, &[]).await?;
        Ok(turn.content)
    }
}
