//! Result types produced by the pipeline.
//!
//! Everything in this module is serde-serialisable: the machine-readable
//! output contract is simply `serde_json::to_string_pretty(&DocumentResult)`.
//! Human-readable reports come from [`DocumentResult::to_markdown`] and
//! [`DocumentResult::to_plain_text`].
//!
//! Ownership rule: a [`PageResult`] is mutated only by the pipeline stage
//! that currently owns the page. When the fallback stage reprocesses a page
//! it *replaces* the stored record via [`DocumentResult::upsert_page`] —
//! two results for the same page number never coexist.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ── Page status & audit verdicts ─────────────────────────────────────────

/// Status of a page after (or during) processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Not yet processed (only observable mid-pipeline).
    #[default]
    Pending,
    /// Recognised text accepted.
    Success,
    /// Every attempted engine failed; text is empty.
    Failed,
    /// Text is stored but quality remained poor after the fallback attempt
    /// (or no fallback engine was available). Surfaced to operators via
    /// `pages_needing_reprocessing`.
    NeedsReview,
}

/// Which gate stage produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSource {
    Heuristic,
    CrossCheck,
    Llm,
}

/// Categorical audit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Acceptable,
    NeedsReview,
    Poor,
}

/// A quality verdict for one page: which stage judged it, how, and why.
///
/// The verdict stored on a page is always the *last* gate stage that ran
/// for it (heuristics, then optionally cross-check, then optionally LLM).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditVerdict {
    pub source: AuditSource,
    pub outcome: AuditOutcome,
    pub reason: String,
}

impl AuditVerdict {
    pub fn is_acceptable(&self) -> bool {
        self.outcome == AuditOutcome::Acceptable
    }
}

// ── Figures ──────────────────────────────────────────────────────────────

/// Axis-aligned bounding box in page-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl BBox {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Long edge over short edge; `f32::INFINITY` for degenerate boxes.
    pub fn aspect_ratio(&self) -> f32 {
        let (w, h) = (self.width() as f32, self.height() as f32);
        if w == 0.0 || h == 0.0 {
            return f32::INFINITY;
        }
        if w > h {
            w / h
        } else {
            h / w
        }
    }
}

/// A described figure on a page.
///
/// Created only by the figure pass; immutable thereafter. Figure numbers
/// are 1-indexed and contiguous within their page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigureResult {
    pub figure_num: usize,
    /// Classification from the vision model: chart, table, diagram, photo,
    /// map, equation or `unknown` when the call failed or was unparseable.
    #[serde(rename = "type")]
    pub figure_type: String,
    pub description: String,
    pub bbox: BBox,
    /// Adapter that produced the description (empty for `unknown` figures
    /// whose description call failed before attribution).
    pub engine: String,
    /// Where the cropped region image was saved, if saving was enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

// ── Pages ────────────────────────────────────────────────────────────────

/// Result for a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    pub text: String,
    pub status: PageStatus,
    /// Name of the adapter whose output is currently stored; `None` when
    /// every attempt failed and no output exists. Operators can therefore
    /// tell "nothing worked" (`failed` + no engine) apart from "something
    /// worked but was flagged" (`needs_review` + engine name).
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Nominal cost of the stored result (ranking signal, not billing).
    pub cost: f64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub figures: Vec<FigureResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditVerdict>,
}

impl PageResult {
    /// Blank pending result for a page.
    pub fn pending(page_num: usize) -> Self {
        Self {
            page_num,
            text: String::new(),
            status: PageStatus::Pending,
            engine: None,
            confidence: None,
            cost: 0.0,
            duration_ms: 0,
            error: None,
            figures: Vec::new(),
            audit: None,
        }
    }

    /// True when the page should be surfaced for manual reprocessing.
    pub fn needs_reprocessing(&self) -> bool {
        matches!(self.status, PageStatus::Failed | PageStatus::NeedsReview)
    }
}

// ── Document-level aggregate ─────────────────────────────────────────────

/// Aggregate statistics for one processing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_pages: usize,
    pub pages_success: usize,
    pub pages_failed: usize,
    pub pages_needs_review: usize,
    /// Pages that went through the fallback stage.
    pub pages_rerun: usize,
    pub figures_detected: usize,
    pub total_cost: f64,
    pub total_time_ms: u64,
    /// Engine name → count of pages whose stored output it produced.
    /// Sums to `pages_success + pages_needs_review`.
    pub engines_used: BTreeMap<String, usize>,
}

/// The complete, final output of processing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    /// Stable stem name of the input artifact.
    pub stem: String,
    /// Always sorted by `page_num`, one entry per page.
    pub pages: Vec<PageResult>,
    pub stats: DocumentStats,
    /// Page numbers still flagged after all stages. Never silently
    /// swallowed — callers should surface this list to operators.
    pub pages_needing_reprocessing: Vec<usize>,
}

impl DocumentResult {
    pub fn new(stem: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            pages: Vec::new(),
            stats: DocumentStats::default(),
            pages_needing_reprocessing: Vec::new(),
        }
    }

    pub fn page(&self, page_num: usize) -> Option<&PageResult> {
        self.pages.iter().find(|p| p.page_num == page_num)
    }

    pub fn page_mut(&mut self, page_num: usize) -> Option<&mut PageResult> {
        self.pages.iter_mut().find(|p| p.page_num == page_num)
    }

    /// Insert a page result, replacing any existing record for the same
    /// page number. Keeps `pages` sorted by page number.
    pub fn upsert_page(&mut self, result: PageResult) {
        self.pages.retain(|p| p.page_num != result.page_num);
        self.pages.push(result);
        self.pages.sort_by_key(|p| p.page_num);
    }

    /// Recompute stats and the reprocessing list from the stored pages.
    ///
    /// Called once at the end of the run so page replacements made by the
    /// cross-check and fallback stages are counted exactly once. Fields the
    /// pages cannot know about (`pages_rerun`, `total_time_ms`) are
    /// preserved as set by the orchestrator.
    pub fn recalculate_stats(&mut self) {
        let pages_rerun = self.stats.pages_rerun;
        let total_time_ms = self.stats.total_time_ms;
        let mut stats = DocumentStats {
            pages_rerun,
            total_time_ms,
            ..DocumentStats::default()
        };

        for page in &self.pages {
            stats.total_pages += 1;
            match page.status {
                PageStatus::Success => stats.pages_success += 1,
                PageStatus::Failed => stats.pages_failed += 1,
                PageStatus::NeedsReview => stats.pages_needs_review += 1,
                PageStatus::Pending => {}
            }
            stats.figures_detected += page.figures.len();
            stats.total_cost += page.cost;

            // Attribution invariant: only pages with stored output count
            // toward engines_used, and each counts exactly once.
            if matches!(page.status, PageStatus::Success | PageStatus::NeedsReview) {
                if let Some(ref engine) = page.engine {
                    *stats.engines_used.entry(engine.clone()).or_insert(0) += 1;
                }
            }
        }

        self.stats = stats;
        self.pages_needing_reprocessing = self
            .pages
            .iter()
            .filter(|p| p.needs_reprocessing())
            .map(|p| p.page_num)
            .collect();
    }

    /// Render the full markdown report: summary header, then per-page text
    /// with inline figure descriptions, in page order.
    pub fn to_markdown(&self) -> String {
        let mut lines: Vec<String> = vec![format!("# OCR Result: {}", self.stem), String::new()];

        lines.push("## Summary".to_string());
        lines.push(format!(
            "- Pages: {}/{} successful",
            self.stats.pages_success, self.stats.total_pages
        ));
        lines.push(format!("- Figures: {}", self.stats.figures_detected));
        lines.push(format!("- Cost: ${:.4}", self.stats.total_cost));
        if !self.pages_needing_reprocessing.is_empty() {
            lines.push(format!(
                "- Pages needing reprocessing: {:?}",
                self.pages_needing_reprocessing
            ));
        }
        lines.push(String::new());
        lines.push("## Content".to_string());
        lines.push(String::new());

        for page in &self.pages {
            lines.push(format!("--- Page {} ---", page.page_num));
            if !page.text.is_empty() {
                lines.push(page.text.clone());
            }
            if !page.figures.is_empty() {
                lines.push(String::new());
                for fig in &page.figures {
                    lines.push(format!(
                        "**[Figure {}]** ({})",
                        fig.figure_num, fig.figure_type
                    ));
                    lines.push(format!("> {}", fig.description));
                    lines.push(String::new());
                }
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    /// Plain-text concatenation of page texts separated by page markers.
    pub fn to_plain_text(&self) -> String {
        self.pages
            .iter()
            .filter(|p| !p.text.is_empty())
            .map(|p| format!("--- Page {} ---\n{}", p.page_num, p.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_page(page_num: usize, engine: &str) -> PageResult {
        PageResult {
            text: "hello world".into(),
            status: PageStatus::Success,
            engine: Some(engine.into()),
            cost: 0.001,
            ..PageResult::pending(page_num)
        }
    }

    #[test]
    fn upsert_replaces_never_duplicates() {
        let mut result = DocumentResult::new("doc");
        result.upsert_page(success_page(1, "deepseek"));
        result.upsert_page(success_page(2, "deepseek"));
        result.upsert_page(success_page(1, "gemini"));

        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.page(1).unwrap().engine.as_deref(), Some("gemini"));
        // Ordering is preserved after replacement.
        let nums: Vec<usize> = result.pages.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![1, 2]);
    }

    #[test]
    fn engines_used_sums_to_attributed_pages() {
        let mut result = DocumentResult::new("doc");
        result.upsert_page(success_page(1, "deepseek"));
        result.upsert_page(success_page(2, "deepseek"));
        let mut flagged = success_page(3, "gemini");
        flagged.status = PageStatus::NeedsReview;
        result.upsert_page(flagged);
        let mut dead = PageResult::pending(4);
        dead.status = PageStatus::Failed;
        result.upsert_page(dead);

        result.recalculate_stats();

        let attributed: usize = result.stats.engines_used.values().sum();
        assert_eq!(
            attributed,
            result.stats.pages_success + result.stats.pages_needs_review
        );
        assert_eq!(result.stats.engines_used["deepseek"], 2);
        assert_eq!(result.stats.engines_used["gemini"], 1);
        assert_eq!(result.stats.pages_failed, 1);
        assert_eq!(result.pages_needing_reprocessing, vec![3, 4]);
    }

    #[test]
    fn markdown_report_inlines_figures() {
        let mut result = DocumentResult::new("paper");
        let mut page = success_page(1, "deepseek");
        page.figures.push(FigureResult {
            figure_num: 1,
            figure_type: "chart".into(),
            description: "a bar chart".into(),
            bbox: BBox {
                x0: 0,
                y0: 0,
                x1: 100,
                y1: 100,
            },
            engine: "gemini".into(),
            image_path: None,
        });
        result.upsert_page(page);
        result.recalculate_stats();

        let md = result.to_markdown();
        assert!(md.contains("--- Page 1 ---"));
        assert!(md.contains("**[Figure 1]** (chart)"));
        assert!(md.contains("> a bar chart"));
    }

    #[test]
    fn plain_text_skips_empty_pages() {
        let mut result = DocumentResult::new("doc");
        result.upsert_page(success_page(1, "deepseek"));
        let mut failed = PageResult::pending(2);
        failed.status = PageStatus::Failed;
        result.upsert_page(failed);

        let txt = result.to_plain_text();
        assert!(txt.contains("--- Page 1 ---"));
        assert!(!txt.contains("--- Page 2 ---"));
    }

    #[test]
    fn bbox_aspect_ratio_is_symmetric() {
        let wide = BBox {
            x0: 0,
            y0: 0,
            x1: 500,
            y1: 100,
        };
        let tall = BBox {
            x0: 0,
            y0: 0,
            x1: 100,
            y1: 500,
        };
        assert_eq!(wide.aspect_ratio(), 5.0);
        assert_eq!(tall.aspect_ratio(), 5.0);
        assert_eq!(wide.area(), 50_000);
    }

    #[test]
    fn json_shape_matches_contract() {
        let mut result = DocumentResult::new("doc");
        result.upsert_page(success_page(1, "deepseek"));
        result.recalculate_stats();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["pages"][0]["page_num"], 1);
        assert_eq!(json["pages"][0]["status"], "success");
        assert_eq!(json["stats"]["total_pages"], 1);
        assert!(json["stats"]["engines_used"].is_object());
        assert!(json["pages_needing_reprocessing"].is_array());
    }
}
