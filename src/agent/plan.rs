//! Plans and step reports
//!
//! A plan is an ordered list of steps; each step runs one bounded
//! tool-calling loop and produces a report. Dependent steps receive bounded
//! summaries of their predecessors, never full transcripts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::publish::PUBLISH_TOOL;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub topic: String,
    pub steps: Vec<PlanStep>,
}

/// Default three-step research workflow: gather material, draft, publish.
pub fn research_plan(topic: &str) -> Plan {
    Plan {
        topic: topic.to_string(),
        steps: vec![
            PlanStep {
                id: "step1".into(),
                title: format!("Research: {}", topic),
                description: format!(
                    "Search for the latest information about \"{}\", focusing on \
                     developments from the last 24-48 hours. Collect concrete recent \
                     events, real user reactions, points of controversy, and at least \
                     10 relevant HTTPS image links.",
                    topic
                ),
                depends_on: vec![],
            },
            PlanStep {
                id: "step2".into(),
                title: format!("Draft: {}", topic),
                description: format!(
                    "Based on the research results, write a social-media post about \
                     \"{}\". Write in flowing paragraphs with a concrete opening, a \
                     plain-spoken middle that explains what matters, and a closing that \
                     invites interaction.",
                    topic
                ),
                depends_on: vec!["step1".into()],
            },
            PlanStep {
                id: "step3".into(),
                title: "Format and publish".into(),
                description: "Finalize and publish the post. Produce an informative \
                     title of at most 20 characters, clean up paragraph breaks, pick \
                     the 5 images from the research step that best match the content, \
                     generate 5 relevant tags, then call the publish_content tool."
                    .into(),
                depends_on: vec!["step1".into(), "step2".into()],
            },
        ],
    }
}

/// How a step's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// The model returned a final answer with no further tool calls.
    Completed,
    /// The iteration ceiling was hit before a final answer.
    MaxIterationsExceeded,
}

/// One executed tool call, recorded for the step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub iteration: usize,
    pub name: String,
    pub arguments: Value,
    pub result: String,
}

/// Outcome of a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step_id: String,
    pub step_title: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub iterations: usize,
    pub response: String,
    pub status: StepStatus,
    pub publish_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
}

impl StepReport {
    /// Bounded preview of the step's final response, for feeding into
    /// dependent steps.
    pub fn summary(&self, max_chars: usize) -> String {
        let count = self.response.chars().count();
        if count <= max_chars {
            self.response.clone()
        } else {
            let cut: String = self.response.chars().take(max_chars).collect();
            format!("{}...", cut)
        }
    }
}

/// Content actually submitted to the publish tool, recovered from the
/// recorded call arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishedContent {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub images: Vec<String>,
}

/// Final plan outcome. Errors are reported here, never propagated past the
/// plan runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishedContent>,
    pub steps: Vec<StepReport>,
}

/// Recover the published content echo from the last recorded publish call.
pub fn published_content(reports: &[StepReport]) -> Option<PublishedContent> {
    let call = reports
        .iter()
        .rev()
        .flat_map(|r| r.tool_calls.iter().rev())
        .find(|c| c.name == PUBLISH_TOOL)?;

    let args = &call.arguments;
    Some(PublishedContent {
        title: args
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        content: args
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        tags: string_list(args.get("tags")),
        images: string_list(args.get("images")),
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
