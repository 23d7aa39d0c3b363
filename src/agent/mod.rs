//! Orchestration loop
//!
//! `StepRunner` drives one plan step through a bounded tool-calling loop:
//! ask the model, execute every proposed call in order, feed the results
//! back, and repeat until the model answers without tool calls or the
//! iteration ceiling is hit. Tool failures become result text the model can
//! react to; only quota exhaustion escapes the loop, so the plan runner can
//! rotate credentials and retry the same step.

pub mod extract;
pub mod local;
pub mod plan;
pub mod publish;

use std::sync::Arc;

use serde_json::Value;

use crate::error::AgentError;
use crate::images::ImageChecker;
use crate::llm::{render_tool_specs, ChatMessage, ModelClient, ToolSpec};
use crate::mcp::ProviderPool;

use extract::{extract_topics, Topic};
use plan::{published_content, Plan, PlanReport, PlanStep, StepReport, StepStatus, ToolCallRecord};

/// Tool results longer than this are summarized before re-entering the
/// conversation, to keep the context under control.
const RESULT_SUMMARIZE_THRESHOLD: usize = 20_000;
/// Summarization input cap.
const SUMMARIZE_INPUT_CAP: usize = 50_000;
/// Summarization output target, in characters.
const SUMMARIZE_TARGET: usize = 5_000;
/// Appended when summarization fails and the result is hard-truncated.
const TRUNCATION_MARKER: &str = "...(content truncated)";

/// Prior-step summaries injected into dependent steps are bounded to this.
const PRIOR_SUMMARY_CHARS: usize = 1000;
/// A quota-limited step is retried after rotation at most this many times.
const MAX_ROTATIONS: usize = 2;
/// Plan-level error detail is capped at this many characters.
const ERROR_DETAIL_CHARS: usize = 500;
/// Topic discovery uses a tighter ceiling than content steps.
const DISCOVERY_MAX_ITERATIONS: usize = 5;

/// Rate-limit signature of the web-search provider: the plan-usage-limit
/// phrase together with its numeric code.
const QUOTA_PHRASE: &str = "exceeds your plan's set usage limit";
const QUOTA_CODE: &str = "432";

#[derive(Debug, Clone)]
pub struct StepLimits {
    pub max_iterations: usize,
    /// Lowercase tool-name substring whose results are checked for the quota
    /// signature. Empty disables detection.
    pub quota_tool_marker: String,
}

impl Default for StepLimits {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            quota_tool_marker: "tavily".to_string(),
        }
    }
}

/// Detect the provider's rate-limit signature in a tool result.
pub fn is_quota_signature(result: &str) -> bool {
    let lower = result.to_lowercase();
    lower.contains(QUOTA_PHRASE) && lower.contains(QUOTA_CODE)
}

/// Runs plan steps against a provider pool.
pub struct StepRunner {
    model: Arc<dyn ModelClient>,
    pool: Arc<ProviderPool>,
    images: Arc<dyn ImageChecker>,
    limits: StepLimits,
}

impl StepRunner {
    pub fn new(
        model: Arc<dyn ModelClient>,
        pool: Arc<ProviderPool>,
        images: Arc<dyn ImageChecker>,
        limits: StepLimits,
    ) -> Self {
        Self {
            model,
            pool,
            images,
            limits,
        }
    }

    /// Execute one step's tool-calling loop.
    ///
    /// Returns `Err` only for failures that must abort the step: quota
    /// exhaustion and model-access failures. Tool execution errors are fed
    /// back to the model as result text.
    pub async fn execute_step(
        &self,
        step: &PlanStep,
        prior: &[StepReport],
        topic: &str,
    ) -> Result<StepReport, AgentError> {
        tracing::info!("Executing step: {} - {}", step.id, step.title);

        let tools = self.pool.get_available_tools().await;
        let specs = render_tool_specs(&tools);
        tracing::debug!("{} tools available for step {}", specs.len(), step.id);

        let mut messages = vec![
            ChatMessage::system(self.system_prompt(step, prior, topic)),
            ChatMessage::user(step.description.clone()),
        ];

        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut publish_success = false;
        let mut publish_error: Option<String> = None;

        let mut turn = self.model.propose(&messages, &specs).await?;
        let mut iterations = 0;
        let mut final_content: Option<String> = None;
        let mut status = StepStatus::Completed;

        for iteration in 1..=self.limits.max_iterations {
            if turn.tool_calls.is_empty() {
                tracing::info!("Step {} finished after {} tool rounds", step.id, iterations);
                final_content = Some(turn.content.clone());
                break;
            }
            iterations = iteration;

            let calls = turn.tool_calls.clone();
            messages.push(ChatMessage::assistant_with_calls(turn.content.clone(), calls.clone()));

            for call in &calls {
                let name = call.function.name.clone();
                let mut arguments = call.parsed_arguments();
                tracing::info!("Executing tool: {} (iteration {})", name, iteration);

                let result = self.run_tool_call(&name, &mut arguments).await;

                if self.quota_applies(&name) && is_quota_signature(&result) {
                    tracing::warn!("Quota signature detected in '{}' result", name);
                    return Err(AgentError::QuotaExceeded(format!(
                        "provider quota exhausted while running '{}'",
                        name
                    )));
                }

                if publish::is_publish_tool(&name) {
                    if publish::is_publish_success(&result) {
                        tracing::info!("Publish succeeded, stopping after this round");
                        publish_success = true;
                    } else {
                        tracing::error!("Publish failed: {}", result);
                        publish_error = Some(result.clone());
                    }
                }

                records.push(ToolCallRecord {
                    iteration,
                    name: name.clone(),
                    arguments,
                    result: result.clone(),
                });

                let bounded = self.bound_result(&name, result).await;
                messages.push(ChatMessage::tool_result(call.id.clone(), bounded));
            }

            if publish_success {
                final_content = Some("Content published successfully".to_string());
                break;
            }

            turn = self.model.decide_next(&messages, &specs).await?;
        }

        let response = match final_content {
            Some(content) => content,
            // The ceiling round ended with a final answer rather than more
            // tool calls.
            None if turn.tool_calls.is_empty() => turn.content,
            None => {
                tracing::warn!(
                    "Step {} hit the iteration ceiling ({})",
                    step.id,
                    self.limits.max_iterations
                );
                status = StepStatus::MaxIterationsExceeded;
                if turn.content.is_empty() {
                    "Stopped: tool-calling iteration limit reached".to_string()
                } else {
                    turn.content
                }
            }
        };

        Ok(StepReport {
            step_id: step.id.clone(),
            step_title: step.title.clone(),
            tool_calls: records,
            iterations,
            response,
            status,
            publish_success,
            publish_error,
        })
    }

    /// Execute ordered steps, retrying a quota-limited step after credential
    /// rotation (at most twice). The report never carries an `Err` across
    /// this boundary.
    pub async fn run_plan(&self, plan: &Plan) -> PlanReport {
        let mut reports: Vec<StepReport> = Vec::new();

        for step in &plan.steps {
            let mut rotations = 0;
            loop {
                match self.execute_step(step, &reports, &plan.topic).await {
                    Ok(report) => {
                        tracing::info!("Step {} completed", step.id);
                        reports.push(report);
                        break;
                    }
                    Err(e) if e.is_quota_exceeded() => {
                        rotations += 1;
                        if rotations > MAX_ROTATIONS {
                            tracing::error!("Step {} still quota-limited after {} rotations", step.id, MAX_ROTATIONS);
                            return failed_plan(
                                format!(
                                    "step {} failed: rotated all credentials but the quota limit persists",
                                    step.id
                                ),
                                Some(step.id.clone()),
                                reports,
                            );
                        }
                        tracing::warn!(
                            "Step {} quota-limited (attempt {}), rotating credential",
                            step.id,
                            rotations
                        );
                        match self.pool.rotate_credential().await {
                            Ok(true) => {
                                tracing::info!("Credential rotated, retrying step {}", step.id);
                                continue;
                            }
                            Ok(false) => {
                                return failed_plan(
                                    format!(
                                        "step {} failed: provider quota exhausted, no more keys",
                                        step.id
                                    ),
                                    Some(step.id.clone()),
                                    reports,
                                );
                            }
                            Err(e) => {
                                return failed_plan(
                                    format!(
                                        "step {} failed: credential rotation error: {}",
                                        step.id,
                                        truncate_chars(&e.to_string(), ERROR_DETAIL_CHARS)
                                    ),
                                    Some(step.id.clone()),
                                    reports,
                                );
                            }
                        }
                    }
                    Err(e) => {
                        return failed_plan(
                            format!(
                                "step {} failed: {}",
                                step.id,
                                truncate_chars(&e.to_string(), ERROR_DETAIL_CHARS)
                            ),
                            Some(step.id.clone()),
                            reports,
                        );
                    }
                }
            }
        }

        // Publishing only counts with an explicit success marker; a step that
        // merely finished without errors is not a successful publish.
        if !reports.iter().any(|r| r.publish_success) {
            let mut error = "Content generated, but publishing failed.".to_string();
            if let Some(detail) = reports.iter().rev().find_map(|r| r.publish_error.clone()) {
                error.push_str("\n\nDetail: ");
                error.push_str(&truncate_chars(detail.trim(), ERROR_DETAIL_CHARS));
            } else {
                error.push_str(" Check the publisher provider connection and retry.");
            }
            let failed_step = reports.last().map(|r| r.step_id.clone());
            return failed_plan(error, failed_step, reports);
        }

        let published = published_content(&reports);
        PlanReport {
            success: true,
            error: None,
            failed_step: None,
            published,
            steps: reports,
        }
    }

    /// Discover candidate topics in a domain by driving a short research
    /// loop and extracting the structured list from the final answer. A
    /// quota signature triggers one rotation and retry.
    pub async fn discover_topics(&self, domain: &str) -> Result<Vec<Topic>, AgentError> {
        let step = discovery_step(
            format!("Topic discovery: {}", domain),
            format!(
                "Search for topics currently trending in \"{}\" and pick up to 10 \
                 worth writing about. Respond with only a JSON array of objects, each \
                 with a \"title\" and a one-sentence \"summary\".",
                domain
            ),
        );
        self.run_discovery(&step, domain).await
    }

    /// Same discovery loop, seeded with a page URL instead of a domain.
    pub async fn topics_from_url(&self, url: &str) -> Result<Vec<Topic>, AgentError> {
        let step = discovery_step(
            format!("Topic discovery from {}", url),
            format!(
                "Fetch the page at {} and identify up to 10 topics it suggests. \
                 Respond with only a JSON array of objects, each with a \"title\" and \
                 a one-sentence \"summary\".",
                url
            ),
        );
        self.run_discovery(&step, url).await
    }

    async fn run_discovery(&self, step: &PlanStep, topic: &str) -> Result<Vec<Topic>, AgentError> {
        let runner = StepRunner {
            model: self.model.clone(),
            pool: self.pool.clone(),
            images: self.images.clone(),
            limits: StepLimits {
                max_iterations: DISCOVERY_MAX_ITERATIONS,
                ..self.limits.clone()
            },
        };

        let report = match runner.execute_step(step, &[], topic).await {
            Ok(report) => report,
            Err(e) if quota_like(&e) => {
                tracing::warn!("Discovery quota-limited, rotating credential once");
                if !self.pool.rotate_credential().await? {
                    return Err(e);
                }
                runner.execute_step(step, &[], topic).await?
            }
            Err(e) => return Err(e),
        };

        Ok(extract_topics(&report.response))
    }

    /// Route one proposed call: local tools first, then the publish
    /// interception, then plain pool dispatch. Execution failures come back
    /// as result text.
    async fn run_tool_call(&self, name: &str, arguments: &mut Value) -> String {
        if let Some(tool) = self.pool.local_tool(name) {
            tracing::info!("Running local tool: {}", name);
            return match tool.execute(arguments.clone()).await {
                Ok(result) => result,
                Err(e) => format!("Error: {}", e),
            };
        }

        if publish::is_publish_tool(name) {
            if let Err(substitute) =
                publish::prepare_publish_arguments(&self.model, &self.images, arguments).await
            {
                return substitute;
            }
        }

        match self.pool.execute_tool(name, arguments.clone()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Tool {} failed: {}", name, e);
                format!("Error: {}", e)
            }
        }
    }

    fn quota_applies(&self, tool_name: &str) -> bool {
        !self.limits.quota_tool_marker.is_empty()
            && tool_name
                .to_lowercase()
                .contains(&self.limits.quota_tool_marker)
    }

    /// Keep oversized tool results out of the context: summarize with an
    /// auxiliary model call, fall back to hard truncation.
    async fn bound_result(&self, tool_name: &str, result: String) -> String {
        let length = result.chars().count();
        if length <= RESULT_SUMMARIZE_THRESHOLD {
            return result;
        }
        tracing::info!(
            "Tool {} result is {} chars, summarizing before re-entry",
            tool_name,
            length
        );

        let input: String = result.chars().take(SUMMARIZE_INPUT_CAP).collect();
        let prompt = format!(
            "Summarize the following tool output in at most {} characters. Keep the \
             key facts, figures, quotes and every URL (image URLs especially).\n\n{}",
            SUMMARIZE_TARGET, input
        );
        match self.model.complete(&[ChatMessage::user(prompt)]).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) | Err(_) => {
                tracing::error!("Summarization failed, falling back to truncation");
                let cut: String = result.chars().take(RESULT_SUMMARIZE_THRESHOLD).collect();
                format!("{}{}", cut, TRUNCATION_MARKER)
            }
        }
    }

    fn system_prompt(&self, step: &PlanStep, prior: &[StepReport], topic: &str) -> String {
        let mut prompt = format!(
            "You are a content creation agent researching \"{topic}\" and publishing \
             the result as a social-media post. Today is {date}; prefer recent \
             material. Use the available tools to carry out the current step.\n\n\
             Current step: {id} - {title}\n",
            topic = topic,
            date = chrono::Local::now().format("%Y-%m-%d"),
            id = step.id,
            title = step.title,
        );

        if prior.is_empty() {
            prompt.push_str(
                "\nThis step does not depend on earlier results. Gather everything it \
                 needs with the available tools.\n",
            );
        } else {
            prompt.push_str("\nResults of earlier steps:\n");
            for report in prior {
                prompt.push_str(&format!(
                    "- {} - {}:\n{}\n\n",
                    report.step_id,
                    report.step_title,
                    report.summary(PRIOR_SUMMARY_CHARS)
                ));
            }
            prompt.push_str(
                "Build on these results instead of repeating the work. If this is a \
                 writing step, draft from the collected material; if it is a publish \
                 step, format and publish the drafted content.\n",
            );
        }
        prompt
    }
}

/// Discovery rotates on the distinguished quota variant but also on the
/// looser rate-limit markers some providers surface as plain errors.
fn quota_like(error: &AgentError) -> bool {
    if error.is_quota_exceeded() {
        return true;
    }
    let text = error.to_string().to_lowercase();
    text.contains("429") || text.contains("quota") || text.contains("unauthorized") || text.contains("403")
}

fn discovery_step(title: String, description: String) -> PlanStep {
    PlanStep {
        id: "discover".to_string(),
        title,
        description,
        depends_on: vec![],
    }
}

fn failed_plan(error: String, failed_step: Option<String>, steps: Vec<StepReport>) -> PlanReport {
    tracing::error!("{}", error);
    PlanReport {
        success: false,
        error: Some(error),
        failed_step,
        published: None,
        steps,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::llm::{AssistantTurn, ToolCall, ToolCallFunction};
    use crate::mcp::{ProviderConnection, ProviderTransport, ToolDescriptor};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // Model that replays a fixed sequence of turns.
    struct ScriptedModel {
        turns: Mutex<VecDeque<AssistantTurn>>,
        completion: String,
        completions: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(turns: Vec<AssistantTurn>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                completion: "summary text".to_string(),
                completions: AtomicUsize::new(0),
            }
        }

        fn next_turn(&self) -> AssistantTurn {
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| AssistantTurn {
                    content: "final answer".into(),
                    tool_calls: vec![],
                })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn propose(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<AssistantTurn, AgentError> {
            Ok(self.next_turn())
        }

        async fn decide_next(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<AssistantTurn, AgentError> {
            Ok(self.next_turn())
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, AgentError> {
            self.completions.fetch_add(1, Ordering::SeqCst);
            Ok(self.completion.clone())
        }
    }

    struct RecordingTransport {
        tools: Vec<&'static str>,
        reply: String,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ProviderTransport for RecordingTransport {
        async fn initialize(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
            Ok(self
                .tools
                .iter()
                .map(|name| ToolDescriptor {
                    provider: String::new(),
                    name: name.to_string(),
                    description: None,
                    input_schema: None,
                })
                .collect())
        }

        async fn call_tool(&self, tool_name: &str, _arguments: Value) -> Result<String, ProviderError> {
            self.calls.lock().unwrap().push(tool_name.to_string());
            Ok(self.reply.clone())
        }

        async fn cleanup(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct AllowAllImages;

    #[async_trait]
    impl ImageChecker for AllowAllImages {
        async fn filter_valid(&self, urls: &[String]) -> Vec<String> {
            urls.to_vec()
        }
    }

    struct DenyAllImages;

    #[async_trait]
    impl ImageChecker for DenyAllImages {
        async fn filter_valid(&self, _urls: &[String]) -> Vec<String> {
            Vec::new()
        }
    }

    fn tool_call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: Some(format!("call_{}", name)),
            call_type: "function".into(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    fn calls_turn(calls: Vec<ToolCall>) -> AssistantTurn {
        AssistantTurn {
            content: String::new(),
            tool_calls: calls,
        }
    }

    fn final_turn(content: &str) -> AssistantTurn {
        AssistantTurn {
            content: content.into(),
            tool_calls: vec![],
        }
    }

    async fn pool_with(
        tools: Vec<&'static str>,
        reply: &str,
    ) -> (Arc<ProviderPool>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let conn = Arc::new(ProviderConnection::new(
            "test-provider",
            Box::new(RecordingTransport {
                tools,
                reply: reply.to_string(),
                calls: calls.clone(),
            }),
        ));
        conn.initialize().await.unwrap();
        let pool = Arc::new(ProviderPool::for_tests(
            vec![conn],
            vec![],
            crate::config::RotationConfig::default(),
        ));
        (pool, calls)
    }

    fn runner(
        model: Arc<ScriptedModel>,
        pool: Arc<ProviderPool>,
        images: Arc<dyn ImageChecker>,
    ) -> StepRunner {
        StepRunner::new(model, pool, images, StepLimits::default())
    }

    fn step(description: &str) -> PlanStep {
        PlanStep {
            id: "step1".into(),
            title: "test step".into(),
            description: description.into(),
            depends_on: vec![],
        }
    }

    #[tokio::test]
    async fn no_tool_calls_terminates_immediately() {
        let model = Arc::new(ScriptedModel::new(vec![final_turn("all done")]));
        let (pool, calls) = pool_with(vec!["web_search"], "ok").await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let report = runner.execute_step(&step("just answer"), &[], "topic").await.unwrap();
        assert_eq!(report.status, StepStatus::Completed);
        assert_eq!(report.response, "all done");
        assert_eq!(report.iterations, 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_round_then_final_answer() {
        let model = Arc::new(ScriptedModel::new(vec![
            calls_turn(vec![tool_call("web_search", r#"{"query": "rust"}"#)]),
            final_turn("wrote the post"),
        ]));
        let (pool, calls) = pool_with(vec!["web_search"], "search results").await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let report = runner.execute_step(&step("research"), &[], "topic").await.unwrap();
        assert_eq!(report.status, StepStatus::Completed);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.tool_calls.len(), 1);
        assert_eq!(report.tool_calls[0].name, "web_search");
        assert_eq!(report.tool_calls[0].result, "search results");
        assert_eq!(calls.lock().unwrap().as_slice(), ["web_search"]);
    }

    #[tokio::test]
    async fn iteration_ceiling_is_reported() {
        // The model proposes a call on every round, forever.
        let turns: Vec<AssistantTurn> = (0..20)
            .map(|_| calls_turn(vec![tool_call("web_search", "{}")]))
            .collect();
        let model = Arc::new(ScriptedModel::new(turns));
        let (pool, _calls) = pool_with(vec!["web_search"], "more results").await;
        let mut runner = runner(model, pool, Arc::new(AllowAllImages));
        runner.limits.max_iterations = 3;

        let report = runner.execute_step(&step("loop"), &[], "topic").await.unwrap();
        assert_eq!(report.status, StepStatus::MaxIterationsExceeded);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.tool_calls.len(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_failure_becomes_result_text() {
        let model = Arc::new(ScriptedModel::new(vec![
            calls_turn(vec![tool_call("nonexistent", "{}")]),
            final_turn("recovered"),
        ]));
        let (pool, _calls) = pool_with(vec!["web_search"], "ok").await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let report = runner.execute_step(&step("x"), &[], "topic").await.unwrap();
        assert_eq!(report.status, StepStatus::Completed);
        assert!(report.tool_calls[0].result.starts_with("Error:"));
        assert_eq!(report.response, "recovered");
    }

    #[tokio::test]
    async fn publish_success_stops_the_loop() {
        let model = Arc::new(ScriptedModel::new(vec![
            calls_turn(vec![tool_call(
                "publish_content",
                r#"{"title": "短标题", "content": "正文", "images": ["https://cdn.io/a.jpg"]}"#,
            )]),
            // Would keep looping if the success marker were ignored.
            calls_turn(vec![tool_call("web_search", "{}")]),
        ]));
        let (pool, calls) = pool_with(vec!["publish_content", "web_search"], "发布成功").await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let report = runner.execute_step(&step("publish"), &[], "topic").await.unwrap();
        assert!(report.publish_success);
        assert_eq!(report.status, StepStatus::Completed);
        assert_eq!(calls.lock().unwrap().as_slice(), ["publish_content"]);
    }

    #[tokio::test]
    async fn zero_valid_images_never_invokes_publish() {
        let model = Arc::new(ScriptedModel::new(vec![
            calls_turn(vec![tool_call(
                "publish_content",
                r#"{"title": "ok", "content": "c", "images": ["https://example.com/x.jpg"]}"#,
            )]),
            final_turn("gave up"),
        ]));
        let (pool, calls) = pool_with(vec!["publish_content"], "发布成功").await;
        let runner = runner(model, pool, Arc::new(DenyAllImages));

        let report = runner.execute_step(&step("publish"), &[], "topic").await.unwrap();
        assert!(calls.lock().unwrap().is_empty());
        assert!(!report.publish_success);
        assert_eq!(report.tool_calls[0].result, publish::NO_VALID_IMAGES_ERROR);
        assert_eq!(report.publish_error.as_deref(), Some(publish::NO_VALID_IMAGES_ERROR));
    }

    #[tokio::test]
    async fn quota_signature_escapes_the_loop() {
        let model = Arc::new(ScriptedModel::new(vec![calls_turn(vec![tool_call(
            "tavily_search",
            "{}",
        )])]));
        let quota_reply = "This request exceeds your plan's set usage limit. (status 432)";
        let (pool, _calls) = pool_with(vec!["tavily_search"], quota_reply).await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let err = runner.execute_step(&step("search"), &[], "topic").await.unwrap_err();
        assert!(err.is_quota_exceeded());
    }

    #[tokio::test]
    async fn quota_signature_on_other_tools_is_ignored() {
        let model = Arc::new(ScriptedModel::new(vec![
            calls_turn(vec![tool_call("fetch_page", "{}")]),
            final_turn("done"),
        ]));
        let quota_reply = "This request exceeds your plan's set usage limit. (status 432)";
        let (pool, _calls) = pool_with(vec!["fetch_page"], quota_reply).await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        assert!(runner.execute_step(&step("x"), &[], "topic").await.is_ok());
    }

    #[tokio::test]
    async fn oversized_results_are_summarized() {
        let model = Arc::new(ScriptedModel::new(vec![
            calls_turn(vec![tool_call("web_search", "{}")]),
            final_turn("done"),
        ]));
        let huge = "x".repeat(25_000);
        let (pool, _calls) = pool_with(vec!["web_search"], &huge).await;
        let model_ref = model.clone();
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let report = runner.execute_step(&step("x"), &[], "topic").await.unwrap();
        // The raw record keeps the full result; the summarizer ran once for
        // the conversation copy.
        assert_eq!(report.tool_calls[0].result.len(), 25_000);
        assert_eq!(model_ref.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plan_reports_quota_exhaustion_distinctly() {
        // Rotation is unconfigured, so the first quota hit is terminal.
        let model = Arc::new(ScriptedModel::new(vec![calls_turn(vec![tool_call(
            "tavily_search",
            "{}",
        )])]));
        let quota_reply = "This request exceeds your plan's set usage limit. (status 432)";
        let (pool, _calls) = pool_with(vec!["tavily_search"], quota_reply).await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let plan = Plan {
            topic: "t".into(),
            steps: vec![step("search")],
        };
        let report = runner.run_plan(&plan).await;
        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("no more keys"));
        assert_eq!(report.failed_step.as_deref(), Some("step1"));
    }

    #[tokio::test]
    async fn plan_without_publish_marker_fails() {
        let model = Arc::new(ScriptedModel::new(vec![final_turn("looks done")]));
        let (pool, _calls) = pool_with(vec!["web_search"], "ok").await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let plan = Plan {
            topic: "t".into(),
            steps: vec![step("answer")],
        };
        let report = runner.run_plan(&plan).await;
        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("publishing failed"));
    }

    #[tokio::test]
    async fn successful_plan_echoes_published_content() {
        let model = Arc::new(ScriptedModel::new(vec![calls_turn(vec![tool_call(
            "publish_content",
            r#"{"title": "标题", "content": "正文", "tags": ["t1"], "images": ["https://cdn.io/a.jpg"]}"#,
        )])]));
        let (pool, _calls) = pool_with(vec!["publish_content"], "published ok").await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let plan = Plan {
            topic: "t".into(),
            steps: vec![step("publish")],
        };
        let report = runner.run_plan(&plan).await;
        assert!(report.success);
        let published = report.published.unwrap();
        assert_eq!(published.title, "标题");
        assert_eq!(published.tags, vec!["t1"]);
    }

    #[tokio::test]
    async fn discovery_extracts_topics_from_final_answer() {
        let model = Arc::new(ScriptedModel::new(vec![final_turn(
            r#"Here you go:
```json
[{"title": "A", "summary": "B"}]
```"#,
        )]));
        let (pool, _calls) = pool_with(vec!["web_search"], "ok").await;
        let runner = runner(model, pool, Arc::new(AllowAllImages));

        let topics = runner.discover_topics("rust").await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "A");
        assert_eq!(topics[0].summary, "B");
    }

    #[test]
    fn quota_signature_requires_both_markers() {
        assert!(is_quota_signature(
            "This request exceeds your plan's set usage limit. Please upgrade. HTTP 432"
        ));
        assert!(!is_quota_signature("exceeds your plan's set usage limit"));
        assert!(!is_quota_signature("error 432: bad request"));
    }

    #[test]
    fn error_detail_truncation_is_char_safe() {
        let long = "错".repeat(600);
        let cut = truncate_chars(&long, 500);
        assert_eq!(cut.chars().count(), 503);
        assert_eq!(truncate_chars("short", 500), "short");
    }
}
