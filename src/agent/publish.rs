//! Publish-tool interception
//!
//! The publish tool has platform limits the model routinely violates: a
//! 20-character title cap, a 2000-character body cap and a requirement for
//! at least one real, reachable image. Arguments are repaired here before
//! the tool runs; an argument set with zero usable images never reaches the
//! tool at all.

use serde_json::Value;
use std::sync::Arc;

use crate::images::ImageChecker;
use crate::llm::{ChatMessage, ModelClient};

pub const PUBLISH_TOOL: &str = "publish_content";

/// Platform limit on title length, in characters.
pub const MAX_TITLE_CHARS: usize = 20;
/// Platform limit on body length, in characters.
pub const MAX_BODY_CHARS: usize = 2000;
/// Hard-truncation point for oversized bodies, leaving room under the cap.
const BODY_CUT_CHARS: usize = 1995;
/// Prefer cutting at a newline as long as it falls past this point.
const BODY_NEWLINE_FLOOR: usize = 1800;
/// Posts carry at most this many images.
pub const MAX_IMAGES: usize = 5;

/// Result text substituted when no image URL survives validation. The tool
/// is not invoked; the model is told to search for real images instead of
/// inventing URLs.
pub const NO_VALID_IMAGES_ERROR: &str = "Error: all image URLs are invalid, cannot publish. \
    Search again for images (include_images=true) and use real image URLs from the results; \
    do not invent URLs. Avoid anti-hotlink hosts such as gtimg.com, sinaimg.cn and freepik.com.";

pub fn is_publish_tool(tool_name: &str) -> bool {
    tool_name == PUBLISH_TOOL
}

/// Repair publish arguments in place. Returns `Err` with the substitute
/// result text when the call must not be dispatched.
pub async fn prepare_publish_arguments(
    model: &Arc<dyn ModelClient>,
    images: &Arc<dyn ImageChecker>,
    arguments: &mut Value,
) -> Result<(), String> {
    if let Some(title) = arguments.get("title").and_then(Value::as_str) {
        let fitted = fit_title(model, title).await;
        if fitted != title {
            arguments["title"] = Value::String(fitted);
        }
    }

    if let Some(content) = arguments.get("content").and_then(Value::as_str) {
        let clamped = clamp_body(content);
        if clamped.len() != content.len() {
            arguments["content"] = Value::String(clamped);
        }
    }

    let candidates = image_candidates(arguments.get("images"));
    tracing::info!("Validating {} image URLs before publish", candidates.len());
    let valid = images.filter_valid(&candidates).await;
    if valid.len() < candidates.len() {
        tracing::warn!("{} image URLs filtered out as invalid", candidates.len() - valid.len());
    }

    if valid.is_empty() {
        tracing::error!("Image validation failed: no usable image URLs");
        return Err(NO_VALID_IMAGES_ERROR.to_string());
    }

    let selected: Vec<Value> = valid
        .into_iter()
        .take(MAX_IMAGES)
        .map(Value::String)
        .collect();
    tracing::info!("Publishing with {} images", selected.len());
    arguments["images"] = Value::Array(selected);
    Ok(())
}

/// A publish result only counts as success when its text says so; the
/// absence of an error is not enough.
pub fn is_publish_success(result: &str) -> bool {
    let lower = result.to_lowercase();
    lower.contains("success") || lower.contains("published") || result.contains("成功")
}

/// Titles over the cap are rewritten by the model; if the rewrite is still
/// too long or fails, hard-truncate instead.
async fn fit_title(model: &Arc<dyn ModelClient>, title: &str) -> String {
    let length = title.chars().count();
    if length <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    tracing::warn!("Title length {} exceeds limit {}, shortening", length, MAX_TITLE_CHARS);

    let prompt = format!(
        "Shorten the following post title to at most 18 characters.\n\
         Requirements:\n\
         1. Keep the original meaning and appeal\n\
         2. Output only the shortened title, no explanation\n\
         3. Keep the key terms\n\n\
         Original title:\n{}",
        title
    );
    match model.complete(&[ChatMessage::user(prompt)]).await {
        Ok(shortened) => {
            let shortened = shortened.trim().to_string();
            if !shortened.is_empty() && shortened.chars().count() <= MAX_TITLE_CHARS {
                tracing::info!("Title shortened to {} chars", shortened.chars().count());
                shortened
            } else {
                tracing::warn!("Shortened title still too long, hard-truncating");
                hard_truncate_title(&shortened)
            }
        }
        Err(e) => {
            tracing::error!("Title rewrite failed: {}", e);
            hard_truncate_title(title)
        }
    }
}

fn hard_truncate_title(title: &str) -> String {
    let cut: String = title.chars().take(MAX_TITLE_CHARS - 2).collect();
    format!("{}...", cut)
}

/// Truncate an oversized body, preferring the last paragraph boundary that
/// still leaves most of the text intact.
fn clamp_body(content: &str) -> String {
    if content.chars().count() <= MAX_BODY_CHARS {
        return content.to_string();
    }

    let truncated: String = content.chars().take(BODY_CUT_CHARS).collect();
    if let Some(pos) = truncated.rfind('\n') {
        let chars_before = truncated[..pos].chars().count();
        if chars_before > BODY_NEWLINE_FLOOR {
            tracing::warn!("Body truncated at paragraph boundary ({} chars)", chars_before);
            return truncated[..pos].to_string();
        }
    }
    tracing::warn!("Body truncated to {} chars", BODY_CUT_CHARS);
    truncated
}

/// The images argument may arrive as a list, a single string, or be absent.
fn image_candidates(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::llm::{AssistantTurn, ToolSpec};
    use async_trait::async_trait;
    use serde_json::json;

    struct ScriptedModel {
        completion: Result<String, ()>,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn propose(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<AssistantTurn, AgentError> {
            unreachable!("publish repair never opens a tool round")
        }

        async fn decide_next(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<AssistantTurn, AgentError> {
            unreachable!()
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, AgentError> {
            match &self.completion {
                Ok(text) => Ok(text.clone()),
                Err(()) => Err(AgentError::Model("model offline".into())),
            }
        }
    }

    struct AllowAll;

    #[async_trait]
    impl ImageChecker for AllowAll {
        async fn filter_valid(&self, urls: &[String]) -> Vec<String> {
            urls.to_vec()
        }
    }

    struct DenyAll;

    #[async_trait]
    impl ImageChecker for DenyAll {
        async fn filter_valid(&self, _urls: &[String]) -> Vec<String> {
            Vec::new()
        }
    }

    fn model(completion: Result<String, ()>) -> Arc<dyn ModelClient> {
        Arc::new(ScriptedModel { completion })
    }

    #[tokio::test]
    async fn short_title_passes_unmodified() {
        let model = model(Ok("unused".into()));
        let images: Arc<dyn ImageChecker> = Arc::new(AllowAll);
        let mut args = json!({
            "title": "这是一个测试",
            "content": "body",
            "images": ["https://cdn.io/a.jpg"]
        });

        prepare_publish_arguments(&model, &images, &mut args).await.unwrap();
        assert_eq!(args["title"], "这是一个测试");
    }

    #[tokio::test]
    async fn long_title_uses_model_rewrite() {
        let model = model(Ok("Rust 异步编程速成".into()));
        let images: Arc<dyn ImageChecker> = Arc::new(AllowAll);
        let long_title = "超".repeat(25);
        let mut args = json!({
            "title": long_title,
            "images": ["https://cdn.io/a.jpg"]
        });

        prepare_publish_arguments(&model, &images, &mut args).await.unwrap();
        assert_eq!(args["title"], "Rust 异步编程速成");
    }

    #[tokio::test]
    async fn long_title_hard_truncates_when_rewrite_fails() {
        let model = model(Err(()));
        let images: Arc<dyn ImageChecker> = Arc::new(AllowAll);
        let long_title: String = "字".repeat(30);
        let mut args = json!({
            "title": long_title,
            "images": ["https://cdn.io/a.jpg"]
        });

        prepare_publish_arguments(&model, &images, &mut args).await.unwrap();
        let fitted = args["title"].as_str().unwrap();
        assert!(fitted.chars().count() <= MAX_TITLE_CHARS + 1);
        assert!(fitted.ends_with("..."));
    }

    #[tokio::test]
    async fn oversized_body_cuts_at_paragraph_boundary() {
        let model = model(Ok("unused".into()));
        let images: Arc<dyn ImageChecker> = Arc::new(AllowAll);
        let body = format!("{}\n{}", "a".repeat(1900), "b".repeat(500));
        let mut args = json!({
            "title": "ok",
            "content": body,
            "images": ["https://cdn.io/a.jpg"]
        });

        prepare_publish_arguments(&model, &images, &mut args).await.unwrap();
        let clamped = args["content"].as_str().unwrap();
        assert_eq!(clamped.chars().count(), 1900);
        assert!(!clamped.contains('\n'));
    }

    #[tokio::test]
    async fn zero_valid_images_substitutes_guidance_error() {
        let model = model(Ok("unused".into()));
        let images: Arc<dyn ImageChecker> = Arc::new(DenyAll);
        let mut args = json!({
            "title": "ok",
            "images": ["https://example.com/fake.jpg"]
        });

        let err = prepare_publish_arguments(&model, &images, &mut args)
            .await
            .unwrap_err();
        assert_eq!(err, NO_VALID_IMAGES_ERROR);
    }

    #[tokio::test]
    async fn image_list_is_capped() {
        let model = model(Ok("unused".into()));
        let images: Arc<dyn ImageChecker> = Arc::new(AllowAll);
        let urls: Vec<String> = (0..8).map(|i| format!("https://cdn.io/{}.jpg", i)).collect();
        let mut args = json!({ "title": "ok", "images": urls });

        prepare_publish_arguments(&model, &images, &mut args).await.unwrap();
        assert_eq!(args["images"].as_array().unwrap().len(), MAX_IMAGES);
    }

    #[tokio::test]
    async fn single_string_image_argument_is_accepted() {
        let model = model(Ok("unused".into()));
        let images: Arc<dyn ImageChecker> = Arc::new(AllowAll);
        let mut args = json!({ "title": "ok", "images": "https://cdn.io/a.jpg" });

        prepare_publish_arguments(&model, &images, &mut args).await.unwrap();
        assert_eq!(args["images"], json!(["https://cdn.io/a.jpg"]));
    }

    #[test]
    fn success_markers() {
        assert!(is_publish_success("Published successfully"));
        assert!(is_publish_success("发布成功"));
        assert!(is_publish_success("SUCCESS: note id 42"));
        assert!(!is_publish_success("error: login required"));
        assert!(!is_publish_success(""));
    }
}
