//! Mistral vision adapter.
//!
//! The most expensive rung of the cascade, used when everything cheaper has
//! failed or been rejected by the quality gate.

use async_trait::async_trait;
use image::DynamicImage;

use crate::config::CloudEngineConfig;
use crate::error::EngineError;

use super::vision::{any_env_set, VisionBackend};
use super::{EngineAdapter, EngineCapabilities, EngineKind, FigureDescription, Recognition};

const API_KEY_VARS: &[&str] = &["MISTRAL_API_KEY"];

pub struct MistralEngine {
    backend: VisionBackend,
}

impl MistralEngine {
    pub fn new(config: &CloudEngineConfig) -> Self {
        Self {
            backend: VisionBackend::new("mistral", "mistral", config.model.clone()),
        }
    }
}

#[async_trait]
impl EngineAdapter for MistralEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mistral
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            is_local: false,
            supports_figures: true,
            cost_per_page: 0.001,
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
