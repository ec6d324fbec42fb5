//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline moves through its stages.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a Tokio broadcast channel, a WebSocket, a database record,
//! or a terminal progress bar — without the library knowing anything about how
//! the host application communicates. The trait is `Send + Sync` so it works
//! correctly when pages are processed concurrently.

use std::sync::Arc;

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Stage 1: primary OCR over all pages.
    Primary,
    /// Stage 2: quality gate (heuristics, optional cross-check, optional LLM).
    Audit,
    /// Stage 3: fallback OCR over flagged pages.
    Fallback,
    /// Stage 4: figure detection and description.
    Figures,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Audit => "audit",
            Self::Fallback => "fallback",
            Self::Figures => "figures",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called by the pipeline as it processes each stage and page.
///
/// Implementations must be `Send + Sync`: within the primary, fallback and
/// figure stages, page events may fire concurrently from different tasks.
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before any work starts.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a stage begins. `item_count` is the number of pages (or
    /// figure regions, for [`PipelineStage::Figures`]) the stage will touch.
    fn on_stage_start(&self, stage: PipelineStage, item_count: usize) {
        let _ = (stage, item_count);
    }

    /// Called just before an engine call is made for a page.
    fn on_page_start(&self, stage: PipelineStage, page_num: usize, total_pages: usize) {
        let _ = (stage, page_num, total_pages);
    }

    /// Called when a page finishes a stage successfully.
    fn on_page_complete(&self, stage: PipelineStage, page_num: usize, total_pages: usize) {
        let _ = (stage, page_num, total_pages);
    }

    /// Called when a page fails within a stage. The pipeline continues with
    /// the remaining pages.
    fn on_page_error(&self, stage: PipelineStage, page_num: usize, error: &str) {
        let _ = (stage, page_num, error);
    }

    /// Called once after all stages have finished.
    fn on_run_complete(&self, total_pages: usize, success_count: usize, flagged_count: usize) {
        let _ = (total_pages, success_count, flagged_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
