//! # cascade-ocr
//!
//! Multi-engine OCR orchestration: route pages to the cheapest capable
//! engine, audit the output, and cascade failures to better engines.
//!
//! ## Why this crate?
//!
//! No single OCR engine wins everywhere. Local vision models are free and
//! private but stumble on degraded scans; the nougat CLI is superb on
//! academic layouts and useless elsewhere; cloud vision models recover
//! almost anything at a price. Rather than pick one, this crate runs a
//! cascade: every page is tried on the preferred engine first, each result
//! is audited, and only pages that actually need it are escalated — so the
//! expensive engines see the hard pages and nothing else.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page images
//!  │
//!  ├─ 1. Primary   concurrent OCR on the routed engine (local-first)
//!  ├─ 2. Audit     heuristics → optional cross-check → optional LLM audit
//!  ├─ 3. Fallback  one rerun of flagged pages on a different engine
//!  └─ 4. Figures   caller-supplied regions cropped, capped, and described
//! ```
//!
//! Every page gets **at most one** fallback attempt — the per-page state
//! machine in [`pipeline`] makes a second rerun inexpressible. Pages the
//! cascade cannot fix are surfaced in
//! [`DocumentResult::pages_needing_reprocessing`], never silently dropped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cascade_ocr::{process_dir, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Engines auto-detected: Ollama, the nougat CLI, and any of
//!     // GEMINI_API_KEY / GOOGLE_API_KEY / MISTRAL_API_KEY that are set.
//!     let config = PipelineConfig::default();
//!     let result = process_dir("scans/report", &config).await?;
//!     println!("{}", result.to_markdown());
//!     eprintln!(
//!         "{}/{} pages ok, {} need another look",
//!         result.stats.pages_success,
//!         result.stats.total_pages,
//!         result.pages_needing_reprocessing.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `cascade-ocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! cascade-ocr = { version = "0.1", default-features = false }
//! ```
//!
//! ## The Engine Set
//!
//! | Engine | Where | $/page | Strengths |
//! |--------|-------|--------|-----------|
//! | `deepseek` | local Ollama | free | general pages, privacy |
//! | `nougat`   | local CLI    | free | academic layouts, math |
//! | `gemini`   | cloud        | ~$0.0002 | degraded scans, figures |
//! | `mistral`  | cloud        | ~$0.001  | last resort, figures |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod audit;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod router;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use audit::{HeuristicsChecker, LlmAuditor, TextAuditor};
pub use config::{
    AuditConfig, CloudEngineConfig, DeepseekConfig, NougatConfig, PipelineConfig,
    PipelineConfigBuilder,
};
pub use document::Document;
pub use engine::{
    EngineAdapter, EngineCapabilities, EngineKind, EngineRegistry, FigureDescription, Recognition,
};
pub use error::{AuditError, EngineError, ExtractError, OcrError};
pub use output::{
    AuditOutcome, AuditSource, AuditVerdict, BBox, DocumentResult, DocumentStats, FigureResult,
    PageResult, PageStatus,
};
pub use pipeline::extract::{FixedRegions, NoopExtractor, Region, RegionExtractor};
pub use process::{process_batch, process_dir, process_document, write_outputs};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, PipelineStage, ProgressCallback};
pub use router::{EngineRole, EngineRouter, RoleOverrides};
