//! Google Gemini vision adapter.
//!
//! Cheapest of the cloud backends and the preferred fallback when local
//! engines produce poor output. Availability means a Google API key is in
//! the environment; the actual connection is only opened on first use.

use async_trait::async_trait;
use image::DynamicImage;

use crate::config::CloudEngineConfig;
use crate::error::EngineError;

use super::vision::{any_env_set, VisionBackend};
use super::{EngineAdapter, EngineCapabilities, EngineKind, FigureDescription, Recognition};

const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

pub struct GeminiEngine {
    backend: VisionBackend,
}

impl GeminiEngine {
    pub fn new(config: &CloudEngineConfig) -> Self {
        Self {
            backend: VisionBackend::new("gemini", "gemini", config.model.clone()),
        }
    }
}

#[async_trait]
impl EngineAdapter for GeminiEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Gemini
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            is_local: false,
            supports_figures: true,
            cost_per_page: 0.0002,
        }
    }

    async fn probe_available(&self) -> bool {
        any_env_set(API_KEY_VARS)
    }

    async fn recognize_page(
        &self,
        image: &DynamicImage,
        page_num: usize,
    ) -> Result<Recognition, EngineError> {
        self.backend.recognize(image, page_num).await
    }

    async fn describe_figure(
        &self,
        image: &DynamicImage,
        context: &str,
    ) -> Result<FigureDescription, EngineError> {
        self.backend.describe(image, context).await
    }
}
