//! Local Ollama vision adapter.
//!
//! Talks to an Ollama instance serving a vision-capable OCR model. Free and
//! private, so the router tries it first for primary OCR. The availability
//! probe hits `/api/tags` and checks the configured model is actually
//! pulled — a running Ollama without the model would fail every page.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use serde::Deserialize;
use tracing::debug;

use crate::config::DeepseekConfig;
use crate::error::EngineError;
use crate::pipeline::encode::{encode_error, encode_png_base64};
use crate::prompts::{figure_prompt, OCR_SYSTEM_PROMPT};

use super::vision::parse_figure_response;
use super::{EngineAdapter, EngineCapabilities, EngineKind, FigureDescription, Recognition};

const ENGINE: &str = "deepseek";

pub struct DeepseekEngine {
    host: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: String,
}

impl DeepseekEngine {
    pub fn new(config: &DeepseekConfig) -> Self {
        Self {
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn generate(&self, prompt: &str, image_b64: String) -> Result<String, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "images": [image_b64],
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Backend {
                engine: ENGINE.to_string(),
                detail: format!("ollama request failed: {e}"),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EngineError::Auth {
                engine: ENGINE.to_string(),
                detail: format!("ollama returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(EngineError::Backend {
                engine: ENGINE.to_string(),
                detail: format!("ollama returned {status}"),
            });
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| EngineError::MalformedResponse {
                engine: ENGINE.to_string(),
                detail: format!("invalid ollama response: {e}"),
            })?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl EngineAdapter for DeepseekEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Deepseek
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            is_local: true,
            supports_figures: true,
            cost_per_page: 0.0,
        }
    }

    async fn probe_available(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(Duration::from_secs(5));

        let Ok(response) = request.send().await else {
            return false;
        };
        if !response.status().is_success() {
            return false;
        }
        let Ok(tags) = response.json::<TagsResponse>().await else {
            return false;
        };

        // Match on the base model name; "deepseek-ocr" should accept the
        // tag "deepseek-ocr:latest".
        let wanted = self.model.split(':').next().unwrap_or(&self.model);
        let found = tags
            .models
            .iter()
            .any(|m| m.name.split(':').next() == Some(wanted));
        debug!(model = %self.model, found, "probed ollama tags");
        found
    }

    async fn recognize_page(
        &self,
        image: &DynamicImage,
        page_num: usize,
    ) -> Result<Recognition, EngineError> {
        let b64 = encode_png_base64(image).map_err(|e| encode_error(ENGINE, e))?;
        let text = self.generate(OCR_SYSTEM_PROMPT, b64).await?;
        debug!(page_num, bytes = text.len(), "ollama OCR call complete");
        Ok(Recognition {
            text: text.trim().to_string(),
            confidence: None,
        })
    }

    async fn describe_figure(
        &self,
        image: &DynamicImage,
        context: &str,
    ) -> Result<FigureDescription, EngineError> {
        let b64 = encode_png_base64(image).map_err(|e| encode_error(ENGINE, e))?;
        let reply = self.generate(&figure_prompt(context), b64).await?;
        if reply.trim().is_empty() {
            return Err(EngineError::MalformedResponse {
                engine: ENGINE.to_string(),
                detail: "empty figure response".to_string(),
            });
        }
        Ok(parse_figure_response(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_trailing_slash_is_stripped() {
        let engine = DeepseekEngine::new(&DeepseekConfig {
            enabled: true,
            host: "http://localhost:11434/".into(),
            model: "deepseek-ocr".into(),
        });
        assert_eq!(engine.host, "http://localhost:11434");
    }

    #[test]
    fn capabilities_are_local_and_free() {
        let engine = DeepseekEngine::new(&DeepseekConfig::default());
        let caps = engine.capabilities();
        assert!(caps.is_local);
        assert_eq!(caps.cost_per_page, 0.0);
    }
}
