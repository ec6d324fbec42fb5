//! Error types for the cascade-ocr library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`OcrError`] — **Fatal**: the run cannot proceed at all (document not
//!   found, no engine available for the primary role). Returned as
//!   `Err(OcrError)` from the top-level `process*` functions.
//!
//! * [`EngineError`] — **Page-local**: one adapter invocation failed
//!   (timeout, auth, malformed response). Converted into fields of the
//!   affected [`crate::output::PageResult`] at the page-submission boundary
//!   and never allowed to abort sibling pages. A page-local failure makes
//!   the page eligible for the fallback stage.
//!
//! * [`AuditError`] — **Degrading**: the LLM auditor is unreachable or
//!   returned nonsense. The quality gate falls back to the heuristic
//!   verdict; processing continues.
//!
//! * [`ExtractError`] — **Degrading**: the caller-supplied region extractor
//!   failed. The figure pass is skipped; OCR results stand untouched.
//!
//! The separation lets callers decide their own tolerance: abort on the
//! fatal class, and inspect per-page statuses for everything else.

use std::path::PathBuf;
use thiserror::Error;

use crate::router::EngineRole;

/// All fatal errors returned by the cascade-ocr library.
///
/// Page-level failures use [`EngineError`] and are stored in
/// [`crate::output::PageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path was not found.
    #[error("document not found: '{path}'\nCheck the path exists and is readable.")]
    DocumentNotFound { path: PathBuf },

    /// The input directory contains no loadable page images.
    #[error("no page images found in '{path}'\nExpected .png/.jpg/.jpeg files, one per page.")]
    EmptyDocument { path: PathBuf },

    /// A page image exists but could not be decoded.
    #[error("failed to load page image '{path}': {detail}")]
    PageLoadFailed { path: PathBuf, detail: String },

    // ── Routing errors ────────────────────────────────────────────────────
    /// No adapter can serve the requested role.
    ///
    /// Fatal only when the role is [`EngineRole::Primary`]; for the fallback
    /// and figure roles the orchestrator degrades per page instead.
    #[error(
        "no OCR engine available for role '{role}'\n\
         Check that Ollama is running, the nougat CLI is installed, or a \
         cloud API key (GEMINI_API_KEY / MISTRAL_API_KEY) is set."
    )]
    NoEngineAvailable { role: EngineRole },

    /// An engine name from the CLI or config is not in the registry.
    #[error("unknown engine '{0}' (expected one of: deepseek, nougat, gemini, mistral)")]
    UnknownEngine(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single adapter invocation.
///
/// Caught at the page-processing boundary and converted into a `failed`
/// [`crate::output::PageResult`] (or an `unknown` figure), so one bad page
/// never aborts the document-level run.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum EngineError {
    /// The per-operation deadline expired; the in-flight call was cancelled.
    #[error("engine '{engine}' timed out after {secs}s on page {page}")]
    Timeout {
        engine: String,
        page: usize,
        secs: u64,
    },

    /// The backend rejected our credentials (401/403, missing key).
    #[error("engine '{engine}' authentication failed: {detail}")]
    Auth { engine: String, detail: String },

    /// The backend answered, but not in the shape we asked for.
    #[error("engine '{engine}' returned a malformed response: {detail}")]
    MalformedResponse { engine: String, detail: String },

    /// Transport-level or backend-internal failure (connection refused,
    /// 5xx, subprocess exited non-zero).
    #[error("engine '{engine}' backend error: {detail}")]
    Backend { engine: String, detail: String },
}

/// Errors from the optional LLM auditor.
///
/// Callers must treat both variants as "use the heuristic verdict" — the
/// auditor is an accelerant, never a gatekeeper the pipeline blocks on.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Ollama (or the configured audit model) is not reachable.
    #[error("LLM auditor unavailable: {detail}")]
    Unavailable { detail: String },

    /// The auditor replied, but no verdict could be extracted.
    #[error("LLM auditor returned an unusable verdict: {detail}")]
    Unparseable { detail: String },
}

/// Error from a caller-supplied [`crate::pipeline::extract::RegionExtractor`].
///
/// Never fatal: the orchestrator logs it and skips the figure pass for the
/// document.
#[derive(Debug, Error)]
#[error("figure region extraction failed: {detail}")]
pub struct ExtractError {
    pub detail: String,
}
