//! The document orchestrator: wires the four stages together.
//!
//! Stage order is fixed: primary OCR → quality gate → fallback OCR →
//! figure pass. The orchestrator owns the per-page state machine, the
//! "at most one fallback attempt" guarantee, and the fatal-versus-degraded
//! error policy:
//!
//! * no engine for the **primary** role is fatal (nothing can be produced);
//! * no engine for the **fallback** role degrades flagged pages to
//!   `needs_review` and the run continues;
//! * no engine for the **figure** role skips the figure pass.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::audit::{HeuristicsChecker, LlmAuditor, TextAuditor};
use crate::config::PipelineConfig;
use crate::document::Document;
use crate::engine::{EngineKind, EngineRegistry};
use crate::error::OcrError;
use crate::output::{DocumentResult, PageStatus};
use crate::pipeline::extract::NoopExtractor;
use crate::pipeline::figures::run_figure_pass;
use crate::pipeline::gate::{run_quality_gate, GateOutcome};
use crate::pipeline::ocr::recognize_pages;
use crate::pipeline::{PageEvent, PageState};
use crate::progress::PipelineStage;
use crate::router::{EngineRole, EngineRouter, RoleOverrides};

/// Process a directory of page images.
pub async fn process_dir(
    dir: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<DocumentResult, OcrError> {
    let document = Document::from_dir(dir)?;
    process_document(&document, config).await
}

/// Process every document directory under `root`.
///
/// Each immediate subdirectory containing page images is treated as one
/// document, taken in name order; `limit` caps how many are processed.
/// Documents are isolated: each gets a fresh availability cache, and one
/// failing document does not stop the batch.
pub async fn process_batch(
    root: impl AsRef<Path>,
    config: &PipelineConfig,
    limit: Option<usize>,
) -> Result<Vec<(PathBuf, Result<DocumentResult, OcrError>)>, OcrError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(OcrError::DocumentNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
        .map_err(|e| OcrError::Internal(format!("cannot read '{}': {e}", root.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    if let Some(n) = limit {
        dirs.truncate(n);
    }

    if dirs.is_empty() {
        return Err(OcrError::EmptyDocument {
            path: root.to_path_buf(),
        });
    }

    let mut outcomes = Vec::with_capacity(dirs.len());
    for dir in dirs {
        info!(document = %dir.display(), "processing batch document");
        // A fresh registry per document re-probes backends, so a backend
        // that died mid-batch stops being routed to.
        let mut doc_config = config.clone();
        if doc_config.registry.is_none() {
            doc_config.registry = Some(Arc::new(EngineRegistry::from_config(config)));
        }
        let outcome = process_dir(&dir, &doc_config).await;
        if let Err(ref e) = outcome {
            warn!(document = %dir.display(), error = %e, "batch document failed");
        }
        outcomes.push((dir, outcome));
    }
    Ok(outcomes)
}

/// Process one loaded document through all four stages.
pub async fn process_document(
    document: &Document,
    config: &PipelineConfig,
) -> Result<DocumentResult, OcrError> {
    let started = Instant::now();
    let total_pages = document.page_count();
    let progress = config.progress.as_ref();

    let registry = config
        .registry
        .clone()
        .unwrap_or_else(|| Arc::new(EngineRegistry::from_config(config)));
    let router = EngineRouter::new(
        registry,
        RoleOverrides {
            primary: config.primary_override,
            fallback: config.fallback_override,
            figure: config.figure_override,
        },
    );

    if let Some(cb) = progress {
        cb.on_run_start(total_pages);
    }

    let mut states: HashMap<usize, PageState> = document
        .iter_pages()
        .map(|(n, _)| (n, PageState::Pending))
        .collect();
    let mut result = DocumentResult::new(document.stem());

    // ── Stage 1: primary OCR ─────────────────────────────────────────────
    let primary = router.select(EngineRole::Primary, &HashSet::new()).await?;
    let primary_kind = primary.kind();
    info!(engine = %primary_kind, total_pages, "primary OCR starting");
    if let Some(cb) = progress {
        cb.on_stage_start(PipelineStage::Primary, total_pages);
    }

    let tasks: Vec<(usize, &image::DynamicImage)> = document.iter_pages().collect();
    let primary_results = recognize_pages(
        &primary,
        tasks,
        total_pages,
        config.page_workers,
        config.page_timeout_secs,
        PipelineStage::Primary,
        progress,
    )
    .await;
    for page in primary_results {
        advance(&mut states, page.page_num, PageEvent::PrimaryComplete);
        result.upsert_page(page);
    }

    // ── Stage 2: quality gate ────────────────────────────────────────────
    let auditor = build_auditor(config);
    let gate = run_quality_gate(
        document,
        &mut result,
        &router,
        config,
        auditor.as_deref(),
        progress,
    )
    .await;

    let flagged: HashSet<usize> = gate.flagged.iter().copied().collect();
    let page_nums: Vec<usize> = states.keys().copied().collect();
    for page_num in page_nums {
        if flagged.contains(&page_num) {
            advance(&mut states, page_num, PageEvent::AuditFlag);
        } else {
            advance(&mut states, page_num, PageEvent::AuditAccept);
            advance(&mut states, page_num, PageEvent::Finalize);
        }
    }

    // ── Stage 3: fallback OCR ────────────────────────────────────────────
    if !gate.flagged.is_empty() {
        run_fallback_stage(
            document,
            &mut result,
            &router,
            config,
            &gate,
            primary_kind,
            &mut states,
        )
        .await;
    }

    // ── Stage 4: figures ─────────────────────────────────────────────────
    if config.include_figures {
        let extractor = config
            .extractor
            .clone()
            .unwrap_or_else(|| Arc::new(NoopExtractor));
        match extractor.regions(document) {
            Ok(candidates) if !candidates.is_empty() => {
                match router.select(EngineRole::Figure, &HashSet::new()).await {
                    Ok(engine) => {
                        run_figure_pass(
                            &engine,
                            document,
                            &mut result,
                            candidates,
                            config,
                            progress,
                        )
                        .await;
                    }
                    Err(e) => warn!(error = %e, "no figure engine, skipping figure pass"),
                }
            }
            Ok(_) => {}
            // Extraction failure costs the figures, never the text.
            Err(e) => warn!(error = %e, "figure extraction failed, skipping figure pass"),
        }
    }

    result.stats.total_time_ms = started.elapsed().as_millis() as u64;
    result.recalculate_stats();

    if let Some(cb) = progress {
        cb.on_run_complete(
            total_pages,
            result.stats.pages_success,
            result.pages_needing_reprocessing.len(),
        );
    }
    info!(
        total_pages,
        success = result.stats.pages_success,
        failed = result.stats.pages_failed,
        needs_review = result.stats.pages_needs_review,
        reruns = result.stats.pages_rerun,
        "document processed"
    );
    Ok(result)
}

/// Run the single fallback attempt for every flagged page.
async fn run_fallback_stage(
    document: &Document,
    result: &mut DocumentResult,
    router: &EngineRouter,
    config: &PipelineConfig,
    gate: &GateOutcome,
    primary_kind: EngineKind,
    states: &mut HashMap<usize, PageState>,
) {
    let progress = config.progress.as_ref();

    // Never rerun a page on an engine that already produced flagged
    // output: the primary, plus any cross-check replacements.
    let mut exclude: HashSet<EngineKind> = [primary_kind].into_iter().collect();
    for page_num in &gate.flagged {
        if let Some(&kind) = gate.cross_checked.get(page_num) {
            exclude.insert(kind);
        }
    }

    let fallback = match router.select(EngineRole::Fallback, &exclude).await {
        Ok(engine) => engine,
        Err(e) => {
            // Degrade, never abort: flagged pages keep their stored output
            // and are surfaced for manual reprocessing.
            warn!(error = %e, "no fallback engine, flagged pages kept as needs_review");
            for &page_num in &gate.flagged {
                downgrade_unrecovered(result, page_num);
                advance(states, page_num, PageEvent::FallbackComplete);
                advance(states, page_num, PageEvent::Finalize);
            }
            return;
        }
    };
    let fallback_kind = fallback.kind();

    // The state machine is the rerun guard: only FallbackPending pages run.
    let tasks: Vec<(usize, &image::DynamicImage)> = gate
        .flagged
        .iter()
        .filter(|n| states.get(n) == Some(&PageState::FallbackPending))
        .filter_map(|&n| document.page(n).map(|img| (n, img)))
        .collect();

    info!(engine = %fallback_kind, pages = tasks.len(), "fallback OCR starting");
    if let Some(cb) = progress {
        cb.on_stage_start(PipelineStage::Fallback, tasks.len());
    }
    result.stats.pages_rerun = tasks.len();

    let checker = HeuristicsChecker::new(&config.audit);
    let fallback_results = recognize_pages(
        &fallback,
        tasks,
        document.page_count(),
        config.page_workers,
        config.page_timeout_secs,
        PipelineStage::Fallback,
        progress,
    )
    .await;

    for mut page in fallback_results {
        let page_num = page.page_num;
        advance(states, page_num, PageEvent::FallbackComplete);

        if page.status == PageStatus::Success {
            // Heuristics-only recheck; the LLM does not get a second bite.
            if config.audit.enabled {
                let report = checker.check(&page.text);
                let verdict = report.verdict();
                if !verdict.is_acceptable() {
                    debug!(page_num, "fallback output still poor, needs review");
                    page.status = PageStatus::NeedsReview;
                }
                page.audit = Some(verdict);
            }
            result.upsert_page(page);
        } else {
            // Fallback failed: keep the original output, flag it for a
            // human. Pages with no output at all stay failed.
            debug!(page_num, "fallback attempt failed, keeping original output");
            downgrade_unrecovered(result, page_num);
        }
        advance(states, page_num, PageEvent::Finalize);
    }
}

/// A flagged page the cascade could not improve: stored output (if any)
/// stays, status says a human should look.
fn downgrade_unrecovered(result: &mut DocumentResult, page_num: usize) {
    if let Some(page) = result.page_mut(page_num) {
        if page.status == PageStatus::Success {
            page.status = PageStatus::NeedsReview;
        }
    }
}

fn build_auditor(config: &PipelineConfig) -> Option<Box<dyn TextAuditor>> {
    if config.audit.enabled && config.audit.llm_audit_enabled {
        Some(Box::new(LlmAuditor::new(&config.audit)))
    } else {
        None
    }
}

/// Apply a state-machine event; an illegal transition is a pipeline logic
/// error and leaves the page where it is.
fn advance(states: &mut HashMap<usize, PageState>, page_num: usize, event: PageEvent) {
    let Some(state) = states.get(&page_num).copied() else {
        warn!(page_num, "event for unknown page");
        return;
    };
    match state.transition(event) {
        Some(next) => {
            states.insert(page_num, next);
        }
        None => warn!(page_num, ?state, ?event, "illegal page-state transition ignored"),
    }
}

/// Write the markdown and JSON reports for a processed document.
///
/// Produces `<stem>.md` and `<stem>.json` in `out_dir`, creating the
/// directory if needed.
pub async fn write_outputs(result: &DocumentResult, out_dir: &Path) -> Result<(), OcrError> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|source| OcrError::OutputWriteFailed {
            path: out_dir.to_path_buf(),
            source,
        })?;

    let md_path = out_dir.join(format!("{}.md", result.stem));
    tokio::fs::write(&md_path, result.to_markdown())
        .await
        .map_err(|source| OcrError::OutputWriteFailed {
            path: md_path.clone(),
            source,
        })?;

    let json_path = out_dir.join(format!("{}.json", result.stem));
    let json = serde_json::to_string_pretty(result)
        .map_err(|e| OcrError::Internal(format!("cannot serialise result: {e}")))?;
    tokio::fs::write(&json_path, json)
        .await
        .map_err(|source| OcrError::OutputWriteFailed {
            path: json_path.clone(),
            source,
        })?;

    info!(md = %md_path.display(), json = %json_path.display(), "reports written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineAdapter, EngineCapabilities, Recognition};
    use crate::error::EngineError;
    use async_trait::async_trait;
    use image::DynamicImage;

    struct NamedStub {
        kind: EngineKind,
    }

    #[async_trait]
    impl EngineAdapter for NamedStub {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn capabilities(&self) -> EngineCapabilities {
            EngineCapabilities {
                is_local: false,
                supports_figures: true,
                cost_per_page: 0.0,
            }
        }

        async fn probe_available(&self) -> bool {
            true
        }

        async fn recognize_page(
            &self,
            _image: &DynamicImage,
            _page_num: usize,
        ) -> Result<Recognition, EngineError> {
            Ok(Recognition {
                text: format!("rerun by {}", self.kind),
                confidence: None,
            })
        }
    }

    #[tokio::test]
    async fn fallback_avoids_engines_that_produced_flagged_output() {
        let document =
            Document::from_images("doc", vec![DynamicImage::new_rgb8(8, 8)]).unwrap();
        let mut result = DocumentResult::new("doc");
        let mut page = crate::output::PageResult::pending(1);
        page.status = PageStatus::Success;
        page.text = "zz".into();
        page.engine = Some("gemini".into());
        result.upsert_page(page);

        let mut states = HashMap::from([(1, PageState::FallbackPending)]);
        let mut gate = GateOutcome::default();
        gate.flagged = vec![1];
        gate.cross_checked.insert(1, EngineKind::Gemini);

        let router = EngineRouter::new(
            Arc::new(EngineRegistry::with_engines(vec![
                Arc::new(NamedStub {
                    kind: EngineKind::Gemini,
                }) as Arc<dyn EngineAdapter>,
                Arc::new(NamedStub {
                    kind: EngineKind::Mistral,
                }) as Arc<dyn EngineAdapter>,
            ])),
            RoleOverrides::default(),
        );
        let mut config = PipelineConfig::default();
        config.audit.enabled = false;

        run_fallback_stage(
            &document,
            &mut result,
            &router,
            &config,
            &gate,
            EngineKind::Deepseek,
            &mut states,
        )
        .await;

        // Gemini already produced this page; the rerun went elsewhere.
        let page = result.page(1).unwrap();
        assert_eq!(page.engine.as_deref(), Some("mistral"));
        assert_eq!(page.status, PageStatus::Success);
        assert_eq!(states[&1], PageState::Final);
        assert_eq!(result.stats.pages_rerun, 1);
    }

    #[tokio::test]
    async fn write_outputs_produces_both_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut result = DocumentResult::new("sample");
        let mut page = crate::output::PageResult::pending(1);
        page.status = PageStatus::Success;
        page.text = "hello".into();
        page.engine = Some("deepseek".into());
        result.upsert_page(page);
        result.recalculate_stats();

        write_outputs(&result, dir.path()).await.unwrap();
        let md = std::fs::read_to_string(dir.path().join("sample.md")).unwrap();
        assert!(md.contains("--- Page 1 ---"));
        let json = std::fs::read_to_string(dir.path().join("sample.json")).unwrap();
        assert!(json.contains("\"stem\": \"sample\""));
    }

    #[tokio::test]
    async fn batch_rejects_missing_root() {
        let err = process_batch("/no/such/root", &PipelineConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::DocumentNotFound { .. }));
    }
}
