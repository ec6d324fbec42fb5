//! Stage 2: the quality gate.
//!
//! Three sub-stages, each optional after the first:
//!
//! * **A — heuristics** (always): every page with stored text is scored by
//!   [`HeuristicsChecker`]. Pages whose primary attempt failed outright are
//!   flagged without auditing — there is nothing to judge.
//! * **B — cross-check** (off by default): up to `cross_check_pages` of the
//!   flagged pages are re-run on a second local engine; output that passes
//!   heuristics replaces the original and clears the flag.
//! * **C — LLM audit** (on by default, degrades silently): still-flagged
//!   pages are re-judged by a local text model, sparing false positives
//!   (formula-dense or tabular pages) the fallback rerun. The audited set
//!   is capped per run.
//!
//! The gate mutates verdicts and (for cross-check) page contents, but never
//! decides what happens to flagged pages — that is the orchestrator's job.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::audit::{HeuristicsChecker, TextAuditor};
use crate::config::PipelineConfig;
use crate::document::Document;
use crate::engine::EngineKind;
use crate::error::AuditError;
use crate::output::{AuditOutcome, AuditSource, AuditVerdict, DocumentResult, PageStatus};
use crate::pipeline::ocr::recognize_one;
use crate::progress::{PipelineStage, ProgressCallback};
use crate::router::{EngineRole, EngineRouter};

/// What the gate decided.
#[derive(Debug, Default)]
pub struct GateOutcome {
    /// Page numbers that need the fallback stage, sorted.
    pub flagged: Vec<usize>,
    /// Pages whose stored output was replaced by a cross-check engine,
    /// and which engine produced it. The fallback stage excludes these
    /// engines when it picks the rerun engine.
    pub cross_checked: HashMap<usize, EngineKind>,
}

/// Run the quality gate over all pages.
pub async fn run_quality_gate(
    document: &Document,
    result: &mut DocumentResult,
    router: &EngineRouter,
    config: &PipelineConfig,
    llm: Option<&dyn TextAuditor>,
    progress: Option<&ProgressCallback>,
) -> GateOutcome {
    if let Some(cb) = progress {
        cb.on_stage_start(PipelineStage::Audit, result.pages.len());
    }

    let mut outcome = GateOutcome::default();

    // Audit disabled: only outright failures cascade.
    if !config.audit.enabled {
        outcome.flagged = result
            .pages
            .iter()
            .filter(|p| p.status == PageStatus::Failed)
            .map(|p| p.page_num)
            .collect();
        return outcome;
    }

    let checker = HeuristicsChecker::new(&config.audit);
    let mut flagged: HashSet<usize> = HashSet::new();

    // Stage A: heuristics on every page.
    for page in &mut result.pages {
        if page.status == PageStatus::Failed {
            flagged.insert(page.page_num);
            continue;
        }
        let report = checker.check(&page.text);
        let verdict = report.verdict();
        if verdict.outcome != AuditOutcome::Acceptable {
            debug!(page_num = page.page_num, reason = %verdict.reason, "heuristics flagged page");
            flagged.insert(page.page_num);
        }
        page.audit = Some(verdict);
    }

    // Stage B: re-run flagged pages on a second local engine.
    if config.audit.cross_check_enabled {
        cross_check(document, result, router, config, &checker, &mut flagged, &mut outcome).await;
    }

    // Stage C: second opinions on pages still flagged after A and B.
    if config.audit.llm_audit_enabled {
        if let Some(llm) = llm {
            llm_audit(result, config, llm, &mut flagged).await;
        }
    }

    outcome.flagged = {
        let mut v: Vec<usize> = flagged.into_iter().collect();
        v.sort_unstable();
        v
    };
    outcome
}

/// Re-run flagged pages on a second local engine. A candidate that passes
/// heuristics replaces the stored output and clears the flag; anything
/// else leaves the page for the fallback stage.
async fn cross_check(
    document: &Document,
    result: &mut DocumentResult,
    router: &EngineRouter,
    config: &PipelineConfig,
    checker: &HeuristicsChecker,
    flagged: &mut HashSet<usize>,
    outcome: &mut GateOutcome,
) {
    let targets: Vec<usize> = {
        let mut v: Vec<usize> = flagged.iter().copied().collect();
        v.sort_unstable();
        v.truncate(config.audit.cross_check_pages);
        v
    };

    for page_num in targets {
        // A page whose primary attempt failed has no engine to exclude.
        let exclude: HashSet<EngineKind> = result
            .page(page_num)
            .and_then(|p| p.engine.as_deref())
            .and_then(|name| name.parse::<EngineKind>().ok())
            .into_iter()
            .collect();

        let engine = match router.select(EngineRole::CrossCheck, &exclude).await {
            Ok(engine) => engine,
            Err(e) => {
                warn!(page_num, error = %e, "no cross-check engine, skipping stage");
                return;
            }
        };

        let Some(image) = document.page(page_num) else {
            continue;
        };
        let mut candidate =
            recognize_one(&engine, page_num, image, config.page_timeout_secs).await;
        if candidate.status != PageStatus::Success {
            debug!(page_num, "cross-check attempt failed, keeping original");
            continue;
        }

        let report = checker.check(&candidate.text);
        if !report.passed {
            debug!(page_num, "cross-check output no better, keeping original");
            continue;
        }

        info!(
            page_num,
            engine = %engine.kind(),
            "cross-check output replaces flagged original"
        );
        candidate.audit = Some(AuditVerdict {
            source: AuditSource::CrossCheck,
            outcome: AuditOutcome::Acceptable,
            reason: format!("re-run on {} passed heuristics", engine.kind()),
        });
        result.upsert_page(candidate);
        outcome.cross_checked.insert(page_num, engine.kind());
        flagged.remove(&page_num);
    }
}

/// Re-judge flagged pages that still have stored output. An acceptable
/// verdict clears the flag; anything else leaves it. An unavailable
/// auditor silently ends the stage for the run.
async fn llm_audit(
    result: &mut DocumentResult,
    config: &PipelineConfig,
    llm: &dyn TextAuditor,
    flagged: &mut HashSet<usize>,
) {
    if !llm.is_available().await {
        warn!("LLM auditor unavailable, keeping heuristic verdicts");
        return;
    }

    // Failed pages have nothing to judge and keep their flag. The cap
    // bounds how many pages are audited, lowest page numbers first.
    let targets: Vec<usize> = {
        let mut v: Vec<usize> = flagged
            .iter()
            .copied()
            .filter(|n| {
                result
                    .page(*n)
                    .map(|p| p.status == PageStatus::Success)
                    .unwrap_or(false)
            })
            .collect();
        v.sort_unstable();
        v.truncate(config.audit.llm_audit_max_pages);
        v
    };

    for page_num in targets {
        let text = match result.page(page_num) {
            Some(p) => p.text.clone(),
            None => continue,
        };
        match llm.audit(&text).await {
            Ok(verdict) => {
                let acceptable = verdict.is_acceptable();
                if let Some(page) = result.page_mut(page_num) {
                    page.audit = Some(verdict);
                }
                if acceptable {
                    debug!(page_num, "LLM audit cleared flagged page");
                    flagged.remove(&page_num);
                }
            }
            Err(AuditError::Unavailable { detail }) => {
                warn!(%detail, "LLM auditor dropped out mid-run, keeping heuristic verdicts");
                return;
            }
            Err(AuditError::Unparseable { detail }) => {
                // One bad reply is not a reason to trust the page more.
                debug!(page_num, %detail, "unusable LLM verdict, keeping heuristic verdict");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineAdapter, EngineCapabilities, EngineRegistry, Recognition};
    use crate::output::PageResult;
    use crate::router::RoleOverrides;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn empty_router() -> EngineRouter {
        EngineRouter::new(
            Arc::new(EngineRegistry::with_engines(vec![])),
            RoleOverrides::default(),
        )
    }

    fn doc(pages: usize) -> Document {
        Document::from_images(
            "doc",
            (0..pages)
                .map(|_| image::DynamicImage::new_rgb8(8, 8))
                .collect(),
        )
        .unwrap()
    }

    fn page(page_num: usize, text: &str, status: PageStatus) -> PageResult {
        PageResult {
            text: text.into(),
            status,
            engine: Some("deepseek".into()),
            ..PageResult::pending(page_num)
        }
    }

    fn long_clean_text() -> String {
        "The annual review describes steady progress across every division of the \
         company during the reporting period. Staffing levels remained stable and \
         customer satisfaction scores improved for the third consecutive year. \
         The committee recommends continuing the current programme without major \
         changes, while monitoring supplier costs very closely over the next several \
         coming quarters."
            .to_string()
    }

    struct StubAuditor {
        available: bool,
        verdicts: Vec<AuditOutcome>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextAuditor for StubAuditor {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn audit(&self, _text: &str) -> Result<AuditVerdict, crate::error::AuditError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .verdicts
                .get(i)
                .copied()
                .unwrap_or(AuditOutcome::Acceptable);
            Ok(AuditVerdict {
                source: AuditSource::Llm,
                outcome,
                reason: "stub".into(),
            })
        }
    }

    fn no_llm_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.audit.llm_audit_enabled = false;
        config
    }

    #[tokio::test]
    async fn heuristic_failures_and_hard_failures_are_flagged() {
        let document = doc(3);
        let mut result = DocumentResult::new("doc");
        result.upsert_page(page(1, &long_clean_text(), PageStatus::Success));
        result.upsert_page(page(2, "tiny", PageStatus::Success));
        result.upsert_page(page(3, "", PageStatus::Failed));

        let outcome = run_quality_gate(
            &document,
            &mut result,
            &empty_router(),
            &no_llm_config(),
            None,
            None,
        )
        .await;

        assert_eq!(outcome.flagged, vec![2, 3]);
        // Verdicts recorded for audited pages, not for the hard failure.
        assert!(result.page(1).unwrap().audit.is_some());
        assert!(result.page(2).unwrap().audit.is_some());
        assert!(result.page(3).unwrap().audit.is_none());
    }

    #[tokio::test]
    async fn disabled_audit_only_cascades_failures() {
        let document = doc(2);
        let mut result = DocumentResult::new("doc");
        result.upsert_page(page(1, "tiny", PageStatus::Success));
        result.upsert_page(page(2, "", PageStatus::Failed));

        let mut config = no_llm_config();
        config.audit.enabled = false;

        let outcome = run_quality_gate(
            &document,
            &mut result,
            &empty_router(),
            &config,
            None,
            None,
        )
        .await;
        assert_eq!(outcome.flagged, vec![2]);
        assert!(result.page(1).unwrap().audit.is_none());
    }

    #[tokio::test]
    async fn accepted_llm_verdict_spares_the_page_the_fallback() {
        let document = doc(2);
        let mut result = DocumentResult::new("doc");
        result.upsert_page(page(1, &long_clean_text(), PageStatus::Success));
        result.upsert_page(page(2, "tiny", PageStatus::Success));

        let auditor = StubAuditor {
            available: true,
            verdicts: vec![AuditOutcome::Acceptable],
            calls: AtomicUsize::new(0),
        };

        let outcome = run_quality_gate(
            &document,
            &mut result,
            &empty_router(),
            &PipelineConfig::default(),
            Some(&auditor),
            None,
        )
        .await;

        // The flagged page was accepted and must not cascade; the clean
        // page was never audited at all.
        assert!(outcome.flagged.is_empty());
        assert_eq!(auditor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.page(2).unwrap().audit.as_ref().unwrap().source,
            AuditSource::Llm
        );
        assert_eq!(
            result.page(1).unwrap().audit.as_ref().unwrap().source,
            AuditSource::Heuristic
        );
    }

    #[tokio::test]
    async fn llm_audit_cap_bounds_audited_pages_not_escalations() {
        let document = doc(4);
        let mut result = DocumentResult::new("doc");
        result.upsert_page(page(1, &long_clean_text(), PageStatus::Success));
        for n in 2..=4 {
            result.upsert_page(page(n, "tiny", PageStatus::Success));
        }

        let mut config = PipelineConfig::default();
        config.audit.llm_audit_max_pages = 2;
        let auditor = StubAuditor {
            available: true,
            verdicts: vec![AuditOutcome::Acceptable, AuditOutcome::Poor],
            calls: AtomicUsize::new(0),
        };

        let outcome = run_quality_gate(
            &document,
            &mut result,
            &empty_router(),
            &config,
            Some(&auditor),
            None,
        )
        .await;

        // Pages 2 and 3 were audited (cap 2); page 2 was cleared, page 3
        // kept its flag, page 4 never reached the auditor.
        assert_eq!(outcome.flagged, vec![3, 4]);
        assert_eq!(auditor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            result.page(4).unwrap().audit.as_ref().unwrap().source,
            AuditSource::Heuristic
        );
    }

    #[tokio::test]
    async fn unavailable_auditor_degrades_to_heuristics() {
        let document = doc(1);
        let mut result = DocumentResult::new("doc");
        result.upsert_page(page(1, "tiny", PageStatus::Success));

        let auditor = StubAuditor {
            available: false,
            verdicts: vec![AuditOutcome::Acceptable],
            calls: AtomicUsize::new(0),
        };

        let outcome = run_quality_gate(
            &document,
            &mut result,
            &empty_router(),
            &PipelineConfig::default(),
            Some(&auditor),
            None,
        )
        .await;
        assert_eq!(outcome.flagged, vec![1]);
        assert_eq!(auditor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            result.page(1).unwrap().audit.as_ref().unwrap().source,
            AuditSource::Heuristic
        );
    }

    struct LocalSecondOpinion {
        reply: String,
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EngineAdapter for LocalSecondOpinion {
        fn kind(&self) -> EngineKind {
            EngineKind::Nougat
        }

        fn capabilities(&self) -> EngineCapabilities {
            EngineCapabilities {
                is_local: true,
                supports_figures: false,
                cost_per_page: 0.0,
            }
        }

        async fn probe_available(&self) -> bool {
            true
        }

        async fn recognize_page(
            &self,
            _image: &image::DynamicImage,
            page_num: usize,
        ) -> Result<Recognition, crate::error::EngineError> {
            self.seen.lock().unwrap().push(page_num);
            Ok(Recognition {
                text: self.reply.clone(),
                confidence: None,
            })
        }
    }

    fn cross_check_router(reply: &str) -> (Arc<LocalSecondOpinion>, EngineRouter) {
        let second = Arc::new(LocalSecondOpinion {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let router = EngineRouter::new(
            Arc::new(EngineRegistry::with_engines(vec![
                second.clone() as Arc<dyn EngineAdapter>
            ])),
            RoleOverrides::default(),
        );
        (second, router)
    }

    #[tokio::test]
    async fn cross_check_reruns_only_flagged_pages() {
        let document = doc(2);
        let mut result = DocumentResult::new("doc");
        result.upsert_page(page(1, &long_clean_text(), PageStatus::Success));
        result.upsert_page(page(2, "tiny", PageStatus::Success));

        let (second, router) = cross_check_router(&long_clean_text());
        let mut config = no_llm_config();
        config.audit.cross_check_enabled = true;
        config.audit.cross_check_pages = 2;

        let outcome =
            run_quality_gate(&document, &mut result, &router, &config, None, None).await;

        // Only the flagged page was re-run; the replacement cleared it.
        assert_eq!(*second.seen.lock().unwrap(), vec![2]);
        assert!(outcome.flagged.is_empty());
        assert_eq!(outcome.cross_checked.get(&2), Some(&EngineKind::Nougat));
        let replaced = result.page(2).unwrap();
        assert_eq!(replaced.engine.as_deref(), Some("nougat"));
        assert_eq!(
            replaced.audit.as_ref().unwrap().source,
            AuditSource::CrossCheck
        );
        // The clean page keeps its original attribution.
        assert_eq!(result.page(1).unwrap().engine.as_deref(), Some("deepseek"));
    }

    #[tokio::test]
    async fn cross_check_output_must_pass_heuristics_to_replace() {
        let document = doc(1);
        let mut result = DocumentResult::new("doc");
        result.upsert_page(page(1, "tiny", PageStatus::Success));

        let (second, router) = cross_check_router("zz");
        let mut config = no_llm_config();
        config.audit.cross_check_enabled = true;
        config.audit.cross_check_pages = 1;

        let outcome =
            run_quality_gate(&document, &mut result, &router, &config, None, None).await;

        assert_eq!(*second.seen.lock().unwrap(), vec![1]);
        // A second bad reading changes nothing: the page stays flagged and
        // keeps the original output.
        assert_eq!(outcome.flagged, vec![1]);
        assert!(outcome.cross_checked.is_empty());
        let kept = result.page(1).unwrap();
        assert_eq!(kept.engine.as_deref(), Some("deepseek"));
        assert_eq!(kept.text, "tiny");
    }
}
