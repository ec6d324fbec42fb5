//! Configuration types for the OCR pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across threads, log them, and diff two runs to
//! understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A thirty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{EngineKind, EngineRegistry};
use crate::error::OcrError;
use crate::pipeline::extract::RegionExtractor;
use crate::progress::ProgressCallback;

// ── Per-engine backends ──────────────────────────────────────────────────

/// Connection settings for the local Ollama vision backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepseekConfig {
    pub enabled: bool,
    /// Ollama base URL.
    pub host: String,
    /// Vision model tag pulled into Ollama.
    pub model: String,
}

impl Default for DeepseekConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "http://localhost:11434".to_string(),
            model: "deepseek-ocr".to_string(),
        }
    }
}

/// Settings for the nougat CLI subprocess backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NougatConfig {
    pub enabled: bool,
    /// Executable name or path; resolved through `PATH` when relative.
    pub command: String,
}

impl Default for NougatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "nougat".to_string(),
        }
    }
}

/// Settings for a cloud vision backend reached through the provider layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEngineConfig {
    pub enabled: bool,
    /// Model identifier passed to the provider.
    pub model: String,
}

impl CloudEngineConfig {
    fn new(model: &str) -> Self {
        Self {
            enabled: true,
            model: model.to_string(),
        }
    }
}

/// Quality-gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Master switch for the quality gate. When off, only pages whose
    /// primary attempt failed outright reach the fallback stage.
    pub enabled: bool,

    /// Minimum word count below which a page fails heuristics. Default: 50.
    /// A page with exactly this many words passes.
    pub min_word_count: usize,

    /// Maximum tolerated ratio of garbage characters. Default: 0.15.
    /// A ratio exactly at the threshold passes; failure requires exceeding it.
    pub max_garbage_ratio: f32,

    /// Number of distinct degenerate-repetition kinds (repeated character
    /// run, repeated word, alternating pattern) at which a page fails.
    /// Default: 2. A single kind only warns.
    pub max_repeat_kinds: usize,

    /// Average word length bounds; text outside them reads as noise or
    /// concatenation artifacts. Defaults: 2.0 and 15.0.
    pub min_avg_word_len: f32,
    pub max_avg_word_len: f32,

    /// Stage B: re-run up to `cross_check_pages` flagged pages on a second
    /// local engine; output that passes heuristics replaces the original
    /// and clears the flag. Default: off.
    pub cross_check_enabled: bool,
    pub cross_check_pages: usize,

    /// Stage C: ask a text LLM to re-judge flagged pages; an acceptable
    /// verdict clears the flag. At most `llm_audit_max_pages` pages are
    /// audited per run.
    pub llm_audit_enabled: bool,
    pub llm_audit_max_pages: usize,

    /// Auditor model and host (Ollama).
    pub model: String,
    pub ollama_host: String,

    /// Characters of page text sent to the auditor. Default: 4000.
    pub llm_audit_max_chars: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_word_count: 50,
            max_garbage_ratio: 0.15,
            max_repeat_kinds: 2,
            min_avg_word_len: 2.0,
            max_avg_word_len: 15.0,
            cross_check_enabled: false,
            cross_check_pages: 2,
            llm_audit_enabled: true,
            llm_audit_max_pages: 3,
            model: "llama3.2".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            llm_audit_max_chars: 4000,
        }
    }
}

// ── Pipeline config ──────────────────────────────────────────────────────

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use cascade_ocr::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .page_workers(8)
///     .include_figures(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Concurrent page-level engine calls in the primary and fallback
    /// stages. Default: 4.
    ///
    /// Engine calls are network- or subprocess-bound, not CPU-bound, so a
    /// small pool cuts wall-clock time substantially. Lower it if the local
    /// Ollama instance starts swapping models under load.
    pub page_workers: usize,

    /// Concurrent figure-description calls. Default: 2.
    pub figure_workers: usize,

    /// Per-page engine deadline in seconds. Default: 300.
    ///
    /// When it expires the in-flight call is cancelled and the page records
    /// a timeout failure; sibling pages are unaffected.
    pub page_timeout_secs: u64,

    /// Per-figure deadline in seconds. Default: 180.
    pub figure_timeout_secs: u64,

    /// Run the figure pass. Default: true.
    pub include_figures: bool,

    /// Save cropped figure regions as PNGs next to the report. Default: false.
    pub save_figures: bool,
    /// Directory for saved figure crops; required when `save_figures` is on.
    pub figures_dir: Option<PathBuf>,

    /// Figure-pass caps and filters. A region below `figure_min_area`
    /// square pixels (default 6400, an 80×80 crop) or with aspect ratio
    /// above `figure_max_aspect` (default 5.0) is dropped before any
    /// engine call is made.
    pub figures_max_total: usize,
    pub figures_max_per_page: usize,
    pub figure_min_area: u64,
    pub figure_max_aspect: f32,

    /// Figure crops are downscaled so neither dimension exceeds this before
    /// encoding. Default: 1024.
    pub figure_max_dim: u32,

    /// Characters of surrounding page text passed with each figure.
    /// Default: 1200.
    pub figures_context_max_chars: usize,

    /// Engine backends.
    pub deepseek: DeepseekConfig,
    pub nougat: NougatConfig,
    pub gemini: CloudEngineConfig,
    pub mistral: CloudEngineConfig,

    /// Forced engine per role. An unavailable override logs a warning and
    /// falls back to automatic selection rather than aborting.
    pub primary_override: Option<EngineKind>,
    pub fallback_override: Option<EngineKind>,
    pub figure_override: Option<EngineKind>,

    /// Quality-gate settings.
    pub audit: AuditConfig,

    /// Pre-built registry. Takes precedence over the per-engine configs;
    /// used by tests and embedders to inject custom adapters.
    pub registry: Option<Arc<EngineRegistry>>,

    /// Figure-region extractor. `None` means no regions (the default
    /// no-op extractor).
    pub extractor: Option<Arc<dyn RegionExtractor>>,

    /// Progress callback. `None` means no events.
    pub progress: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_workers: 4,
            figure_workers: 2,
            page_timeout_secs: 300,
            figure_timeout_secs: 180,
            include_figures: true,
            save_figures: false,
            figures_dir: None,
            figures_max_total: 25,
            figures_max_per_page: 3,
            figure_min_area: 6400,
            figure_max_aspect: 5.0,
            figure_max_dim: 1024,
            figures_context_max_chars: 1200,
            deepseek: DeepseekConfig::default(),
            nougat: NougatConfig::default(),
            gemini: CloudEngineConfig::new("gemini-2.0-flash"),
            mistral: CloudEngineConfig::new("pixtral-12b-2409"),
            primary_override: None,
            fallback_override: None,
            figure_override: None,
            audit: AuditConfig::default(),
            registry: None,
            extractor: None,
            progress: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("page_workers", &self.page_workers)
            .field("figure_workers", &self.figure_workers)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("figure_timeout_secs", &self.figure_timeout_secs)
            .field("include_figures", &self.include_figures)
            .field("save_figures", &self.save_figures)
            .field("figures_max_total", &self.figures_max_total)
            .field("figures_max_per_page", &self.figures_max_per_page)
            .field("deepseek", &self.deepseek)
            .field("nougat", &self.nougat)
            .field("gemini", &self.gemini)
            .field("mistral", &self.mistral)
            .field("primary_override", &self.primary_override)
            .field("fallback_override", &self.fallback_override)
            .field("figure_override", &self.figure_override)
            .field("audit", &self.audit)
            .field("registry", &self.registry.as_ref().map(|_| "<EngineRegistry>"))
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn RegionExtractor>"))
            .field("progress", &self.progress.as_ref().map(|_| "<dyn PipelineProgressCallback>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn page_workers(mut self, n: usize) -> Self {
        self.config.page_workers = n.max(1);
        self
    }

    pub fn figure_workers(mut self, n: usize) -> Self {
        self.config.figure_workers = n.max(1);
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = secs.max(1);
        self
    }

    pub fn figure_timeout_secs(mut self, secs: u64) -> Self {
        self.config.figure_timeout_secs = secs.max(1);
        self
    }

    pub fn include_figures(mut self, v: bool) -> Self {
        self.config.include_figures = v;
        self
    }

    pub fn save_figures(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.save_figures = true;
        self.config.figures_dir = Some(dir.into());
        self
    }

    pub fn figures_max_total(mut self, n: usize) -> Self {
        self.config.figures_max_total = n;
        self
    }

    pub fn figures_max_per_page(mut self, n: usize) -> Self {
        self.config.figures_max_per_page = n;
        self
    }

    pub fn figure_min_area(mut self, area: u64) -> Self {
        self.config.figure_min_area = area;
        self
    }

    pub fn figure_max_aspect(mut self, aspect: f32) -> Self {
        self.config.figure_max_aspect = aspect.max(1.0);
        self
    }

    pub fn figure_max_dim(mut self, dim: u32) -> Self {
        self.config.figure_max_dim = dim.max(64);
        self
    }

    pub fn figures_context_max_chars(mut self, n: usize) -> Self {
        self.config.figures_context_max_chars = n;
        self
    }

    pub fn deepseek(mut self, cfg: DeepseekConfig) -> Self {
        self.config.deepseek = cfg;
        self
    }

    pub fn nougat(mut self, cfg: NougatConfig) -> Self {
        self.config.nougat = cfg;
        self
    }

    pub fn gemini(mut self, cfg: CloudEngineConfig) -> Self {
        self.config.gemini = cfg;
        self
    }

    pub fn mistral(mut self, cfg: CloudEngineConfig) -> Self {
        self.config.mistral = cfg;
        self
    }

    pub fn primary_override(mut self, kind: EngineKind) -> Self {
        self.config.primary_override = Some(kind);
        self
    }

    pub fn fallback_override(mut self, kind: EngineKind) -> Self {
        self.config.fallback_override = Some(kind);
        self
    }

    pub fn figure_override(mut self, kind: EngineKind) -> Self {
        self.config.figure_override = Some(kind);
        self
    }

    pub fn audit(mut self, cfg: AuditConfig) -> Self {
        self.config.audit = cfg;
        self
    }

    pub fn audit_enabled(mut self, v: bool) -> Self {
        self.config.audit.enabled = v;
        self
    }

    pub fn registry(mut self, registry: Arc<EngineRegistry>) -> Self {
        self.config.registry = Some(registry);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn RegionExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, OcrError> {
        let c = &self.config;
        if c.page_workers == 0 {
            return Err(OcrError::InvalidConfig("page_workers must be >= 1".into()));
        }
        if c.audit.max_garbage_ratio < 0.0 || c.audit.max_garbage_ratio > 1.0 {
            return Err(OcrError::InvalidConfig(format!(
                "max_garbage_ratio must be within 0.0-1.0, got {}",
                c.audit.max_garbage_ratio
            )));
        }
        if c.audit.min_avg_word_len >= c.audit.max_avg_word_len {
            return Err(OcrError::InvalidConfig(
                "min_avg_word_len must be below max_avg_word_len".into(),
            ));
        }
        if c.save_figures && c.figures_dir.is_none() {
            return Err(OcrError::InvalidConfig(
                "save_figures requires figures_dir".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.page_workers, 4);
        assert_eq!(c.page_timeout_secs, 300);
        assert_eq!(c.figures_max_total, 25);
        assert_eq!(c.figures_max_per_page, 3);
        assert_eq!(c.figure_min_area, 6400);
        assert_eq!(c.audit.min_word_count, 50);
        assert!((c.audit.max_garbage_ratio - 0.15).abs() < f32::EPSILON);
        assert!(c.audit.enabled);
        assert!(!c.audit.cross_check_enabled);
    }

    #[test]
    fn builder_clamps_degenerate_values() {
        let c = PipelineConfig::builder()
            .page_workers(0)
            .figure_workers(0)
            .page_timeout_secs(0)
            .figure_max_dim(1)
            .build()
            .unwrap();
        assert_eq!(c.page_workers, 1);
        assert_eq!(c.figure_workers, 1);
        assert_eq!(c.page_timeout_secs, 1);
        assert_eq!(c.figure_max_dim, 64);
    }

    #[test]
    fn build_rejects_bad_garbage_ratio() {
        let mut audit = AuditConfig::default();
        audit.max_garbage_ratio = 1.5;
        let err = PipelineConfig::builder().audit(audit).build().unwrap_err();
        assert!(matches!(err, OcrError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_save_figures_without_dir() {
        let mut c = PipelineConfigBuilder {
            config: PipelineConfig::default(),
        };
        c.config.save_figures = true;
        let err = c.build().unwrap_err();
        assert!(matches!(err, OcrError::InvalidConfig(_)));
    }

    #[test]
    fn override_is_recorded() {
        let c = PipelineConfig::builder()
            .primary_override(EngineKind::Gemini)
            .build()
            .unwrap();
        assert_eq!(c.primary_override, Some(EngineKind::Gemini));
    }
}
