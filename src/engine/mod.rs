//! The engine adapter layer: a uniform async interface over heterogeneous
//! OCR backends (local Ollama vision model, CLI subprocess, cloud vision
//! providers).
//!
//! The set of engines is closed — [`EngineKind`] enumerates them — so
//! routing tables, CLI flags, and serialised results can all name engines
//! without stringly-typed drift. The registry caches availability per run:
//! probing a backend (HTTP round trip or `--help` subprocess) is too
//! expensive to repeat per page, and a backend flapping mid-run would make
//! routing nondeterministic.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{EngineError, OcrError};

pub mod deepseek;
pub mod gemini;
pub mod mistral;
pub mod nougat;
pub mod vision;

pub use deepseek::DeepseekEngine;
pub use gemini::GeminiEngine;
pub use mistral::MistralEngine;
pub use nougat::NougatEngine;

// ── Engine identity ──────────────────────────────────────────────────────

/// The closed set of OCR engines this crate knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Local Ollama vision model. Free, private, usually first choice.
    Deepseek,
    /// Local `nougat` CLI, strong on academic layouts and math.
    Nougat,
    /// Google Gemini vision via the provider layer.
    Gemini,
    /// Mistral vision via the provider layer.
    Mistral,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Deepseek,
        EngineKind::Nougat,
        EngineKind::Gemini,
        EngineKind::Mistral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deepseek => "deepseek",
            Self::Nougat => "nougat",
            Self::Gemini => "gemini",
            Self::Mistral => "mistral",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deepseek" => Ok(Self::Deepseek),
            "nougat" => Ok(Self::Nougat),
            "gemini" => Ok(Self::Gemini),
            "mistral" => Ok(Self::Mistral),
            other => Err(OcrError::UnknownEngine(other.to_string())),
        }
    }
}

// ── Adapter contract ─────────────────────────────────────────────────────

/// Static facts about an engine, used for routing and cost attribution.
#[derive(Debug, Clone, Copy)]
pub struct EngineCapabilities {
    /// Runs on this machine (no API key, no billing, no data egress).
    pub is_local: bool,
    /// Can describe cropped figure regions, not just transcribe text.
    pub supports_figures: bool,
    /// Nominal cost per page in USD. A ranking signal between engines,
    /// not a billing figure.
    pub cost_per_page: f64,
}

/// Text recognised from one page.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub text: String,
    /// Self-reported confidence, when the backend provides one.
    pub confidence: Option<f32>,
}

/// A described figure region.
#[derive(Debug, Clone)]
pub struct FigureDescription {
    /// One of: chart, table, diagram, photo, map, equation, unknown.
    pub figure_type: String,
    pub description: String,
}

/// Uniform async interface every OCR backend implements.
///
/// Adapters are stateless beyond their connection settings and are shared
/// across pages behind `Arc`, so all methods take `&self`.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn capabilities(&self) -> EngineCapabilities;

    /// Cheap liveness probe. Must not mutate backend state; called at most
    /// once per run per engine (the registry caches the answer).
    async fn probe_available(&self) -> bool;

    /// Recognise the text on one page image.
    async fn recognize_page(
        &self,
        image: &DynamicImage,
        page_num: usize,
    ) -> Result<Recognition, EngineError>;

    /// Describe one cropped figure region given surrounding page text.
    ///
    /// Engines whose capabilities report `supports_figures: false` keep
    /// this default.
    async fn describe_figure(
        &self,
        image: &DynamicImage,
        context: &str,
    ) -> Result<FigureDescription, EngineError> {
        let _ = (image, context);
        Err(EngineError::Backend {
            engine: self.kind().to_string(),
            detail: "figure description not supported".to_string(),
        })
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// The set of engine adapters for one run, with a per-run availability cache.
///
/// Availability is probed lazily on first query and then pinned for the
/// rest of the run: a backend that comes up or goes down mid-run does not
/// change routing decisions already made.
pub struct EngineRegistry {
    engines: Vec<Arc<dyn EngineAdapter>>,
    availability: Mutex<HashMap<EngineKind, bool>>,
}

impl EngineRegistry {
    /// Build the standard registry from config: one adapter per enabled
    /// backend, in [`EngineKind::ALL`] order.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut engines: Vec<Arc<dyn EngineAdapter>> = Vec::new();
        if config.deepseek.enabled {
            engines.push(Arc::new(DeepseekEngine::new(&config.deepseek)));
        }
        if config.nougat.enabled {
            engines.push(Arc::new(NougatEngine::new(&config.nougat)));
        }
        if config.gemini.enabled {
            engines.push(Arc::new(GeminiEngine::new(&config.gemini)));
        }
        if config.mistral.enabled {
            engines.push(Arc::new(MistralEngine::new(&config.mistral)));
        }
        Self::with_engines(engines)
    }

    /// Build a registry from explicit adapters (embedders and tests).
    pub fn with_engines(engines: Vec<Arc<dyn EngineAdapter>>) -> Self {
        Self {
            engines,
            availability: Mutex::new(HashMap::new()),
        }
    }

    /// Look up an adapter by kind. `None` when the backend was disabled.
    pub fn get(&self, kind: EngineKind) -> Option<Arc<dyn EngineAdapter>> {
        self.engines.iter().find(|e| e.kind() == kind).cloned()
    }

    /// Registered kinds, in registration order.
    pub fn kinds(&self) -> Vec<EngineKind> {
        self.engines.iter().map(|e| e.kind()).collect()
    }

    /// Whether an engine is usable this run. The first call probes the
    /// backend; subsequent calls return the cached answer.
    pub async fn is_available(&self, kind: EngineKind) -> bool {
        let Some(engine) = self.get(kind) else {
            return false;
        };

        let mut cache = self.availability.lock().await;
        if let Some(&known) = cache.get(&kind) {
            return known;
        }
        let available = engine.probe_available().await;
        debug!(engine = %kind, available, "probed engine availability");
        cache.insert(kind, available);
        available
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProbe {
        kind: EngineKind,
        probes: AtomicUsize,
        up: bool,
    }

    #[async_trait]
    impl EngineAdapter for FlakyProbe {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn capabilities(&self) -> EngineCapabilities {
            EngineCapabilities {
                is_local: true,
                supports_figures: false,
                cost_per_page: 0.0,
            }
        }

        async fn probe_available(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.up
        }

        async fn recognize_page(
            &self,
            _image: &DynamicImage,
            _page_num: usize,
        ) -> Result<Recognition, EngineError> {
            Ok(Recognition {
                text: String::new(),
                confidence: None,
            })
        }
    }

    #[test]
    fn engine_kind_round_trips_through_strings() {
        for kind in EngineKind::ALL {
            assert_eq!(kind.as_str().parse::<EngineKind>().unwrap(), kind);
        }
        assert!(matches!(
            "tesseract".parse::<EngineKind>(),
            Err(OcrError::UnknownEngine(_))
        ));
        // Serde names match Display names.
        assert_eq!(
            serde_json::to_value(EngineKind::Deepseek).unwrap(),
            serde_json::json!("deepseek")
        );
    }

    #[tokio::test]
    async fn availability_is_probed_once_and_cached() {
        let probe = Arc::new(FlakyProbe {
            kind: EngineKind::Deepseek,
            probes: AtomicUsize::new(0),
            up: true,
        });
        let registry = EngineRegistry::with_engines(vec![probe.clone()]);

        assert!(registry.is_available(EngineKind::Deepseek).await);
        assert!(registry.is_available(EngineKind::Deepseek).await);
        assert!(registry.is_available(EngineKind::Deepseek).await);
        assert_eq!(probe.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_engine_is_unavailable() {
        let registry = EngineRegistry::with_engines(vec![]);
        assert!(!registry.is_available(EngineKind::Gemini).await);
        assert!(registry.get(EngineKind::Gemini).is_none());
    }

    #[tokio::test]
    async fn default_figure_description_is_refused() {
        let probe = FlakyProbe {
            kind: EngineKind::Nougat,
            probes: AtomicUsize::new(0),
            up: true,
        };
        let img = DynamicImage::new_rgb8(4, 4);
        let err = probe.describe_figure(&img, "ctx").await.unwrap_err();
        assert!(matches!(err, EngineError::Backend { .. }));
    }
}
