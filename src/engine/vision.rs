//! Shared plumbing for cloud vision adapters.
//!
//! The gemini and mistral adapters differ only in provider name, model,
//! cost, and which environment variables carry credentials. Everything
//! else — lazy provider construction, message layout, figure-JSON parsing —
//! lives here.

use std::sync::Arc;

use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::EngineError;
use crate::pipeline::encode::{encode_error, encode_image};
use crate::prompts::{figure_prompt, OCR_SYSTEM_PROMPT};

use super::{FigureDescription, Recognition};

/// A lazily constructed provider handle for one cloud backend.
///
/// Construction reads API keys from the environment and can fail; deferring
/// it to first use lets a registry be built (and other engines probed) on
/// machines where this backend has no credentials.
pub(crate) struct VisionBackend {
    engine: &'static str,
    provider_name: &'static str,
    model: String,
    provider: OnceCell<Arc<dyn LLMProvider>>,
}

impl VisionBackend {
    pub(crate) fn new(engine: &'static str, provider_name: &'static str, model: String) -> Self {
        Self {
            engine,
            provider_name,
            model,
            provider: OnceCell::new(),
        }
    }

    fn provider(&self) -> Result<&Arc<dyn LLMProvider>, EngineError> {
        self.provider.get_or_try_init(|| {
            ProviderFactory::create_llm_provider(self.provider_name, &self.model).map_err(|e| {
                EngineError::Auth {
                    engine: self.engine.to_string(),
                    detail: format!("provider '{}' unavailable: {e}", self.provider_name),
                }
            })
        })
    }

    /// One OCR call: system prompt + the page image as the user turn.
    ///
    /// The empty user text is intentional — the API requires a user turn,
    /// but the image carries all the content.
    pub(crate) async fn recognize(
        &self,
        image: &DynamicImage,
        page_num: usize,
    ) -> Result<Recognition, EngineError> {
        let provider = self.provider()?;
        let image_data = encode_image(image).map_err(|e| encode_error(self.engine, e))?;

        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![image_data]),
        ];
        let options = completion_options();

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| EngineError::Backend {
                engine: self.engine.to_string(),
                detail: e.to_string(),
            })?;

        debug!(
            engine = self.engine,
            page_num,
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "vision OCR call complete"
        );

        Ok(Recognition {
            text: response.content.trim().to_string(),
            confidence: None,
        })
    }

    /// One figure-description call against a cropped region.
    pub(crate) async fn describe(
        &self,
        image: &DynamicImage,
        context: &str,
    ) -> Result<FigureDescription, EngineError> {
        let provider = self.provider()?;
        let image_data = encode_image(image).map_err(|e| encode_error(self.engine, e))?;

        let messages = vec![
            ChatMessage::system(figure_prompt(context)),
            ChatMessage::user_with_images("", vec![image_data]),
        ];
        let options = completion_options();

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| EngineError::Backend {
                engine: self.engine.to_string(),
                detail: e.to_string(),
            })?;

        if response.content.trim().is_empty() {
            return Err(EngineError::MalformedResponse {
                engine: self.engine.to_string(),
                detail: "empty figure response".to_string(),
            });
        }
        Ok(parse_figure_response(&response.content))
    }
}

fn completion_options() -> CompletionOptions {
    // Low temperature: transcription and description should be faithful,
    // not creative.
    CompletionOptions {
        temperature: Some(0.1),
        max_tokens: Some(4096),
        ..Default::default()
    }
}

/// Parse a figure-description reply.
///
/// Models are asked for strict JSON but frequently wrap it in prose or
/// fences. Three attempts, strictest first:
/// 1. the whole reply as JSON,
/// 2. the first embedded `{...}` object that parses,
/// 3. treat the raw reply as the description with type `unknown`.
pub(crate) fn parse_figure_response(content: &str) -> FigureDescription {
    if let Some(desc) = figure_from_json(content) {
        return desc;
    }
    for (start, _) in content.match_indices('{') {
        if let Some(end) = matching_brace(&content[start..]) {
            if let Some(desc) = figure_from_json(&content[start..start + end + 1]) {
                return desc;
            }
        }
    }
    FigureDescription {
        figure_type: "unknown".to_string(),
        description: content.trim().chars().take(500).collect(),
    }
}

fn figure_from_json(s: &str) -> Option<FigureDescription> {
    let value: serde_json::Value = serde_json::from_str(s.trim()).ok()?;
    let obj = value.as_object()?;
    let figure_type = obj
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let description = obj
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if description.is_empty() {
        return None;
    }
    Some(FigureDescription {
        figure_type,
        description,
    })
}

/// Byte offset of the `}` closing the `{` at position 0, if balanced.
/// String-literal contents are skipped so braces inside values don't count.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// True when any of the given environment variables is set and non-empty.
pub(crate) fn any_env_set(vars: &[&str]) -> bool {
    vars.iter()
        .any(|v| std::env::var(v).map(|s| !s.is_empty()).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json() {
        let d = parse_figure_response(r#"{"type": "chart", "description": "a bar chart"}"#);
        assert_eq!(d.figure_type, "chart");
        assert_eq!(d.description, "a bar chart");
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let d = parse_figure_response(
            "Sure! Here is the analysis:\n{\"type\": \"table\", \"description\": \"a 3x3 grid of {values}\"}\nHope that helps.",
        );
        assert_eq!(d.figure_type, "table");
        assert_eq!(d.description, "a 3x3 grid of {values}");
    }

    #[test]
    fn falls_back_to_raw_text_as_unknown() {
        let d = parse_figure_response("This looks like a photograph of a mountain.");
        assert_eq!(d.figure_type, "unknown");
        assert!(d.description.contains("photograph"));
    }

    #[test]
    fn missing_description_falls_through() {
        let d = parse_figure_response(r#"{"type": "chart"}"#);
        assert_eq!(d.figure_type, "unknown");
    }

    #[test]
    fn matching_brace_skips_string_braces() {
        let s = r#"{"a": "}", "b": {"c": 1}}"#;
        assert_eq!(matching_brace(s), Some(s.len() - 1));
    }
}
