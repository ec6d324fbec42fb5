//! Deterministic text-quality heuristics.
//!
//! Stage A of the quality gate: fast, offline checks that catch the common
//! OCR failure shapes — empty or near-empty pages, garbage characters,
//! mojibake, degenerate repetition loops. Pages that fail here are flagged;
//! the cross-check and LLM stages then get a chance to clear the flag
//! before the fallback rerun.
//!
//! Severity model: a check either *fails* the page (error) or only *warns*.
//! Warnings are recorded in the verdict reason but never flag a page on
//! their own, except that enough distinct repetition findings escalate to
//! a failure (`max_repeat_kinds`).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::AuditConfig;
use crate::output::{AuditOutcome, AuditSource, AuditVerdict};

/// Characters that are typically garbage in OCR output: anything outside
/// word characters, whitespace, and common punctuation.
static GARBAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[^\w\s.,!?;:'"()\[\]{}<>@#$%&*+=/\\-]"#).unwrap_or_else(|e| panic!("{e}"))
});

/// Runs of 4+ whitespace characters read as layout damage.
static EXCESSIVE_WS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s{4,}").unwrap_or_else(|e| panic!("{e}")));

/// Private-use-area codepoints, a mojibake tell.
static PRIVATE_USE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x{e000}-\x{f8ff}]").unwrap_or_else(|e| panic!("{e}")));

/// Control characters other than tab/newline/carriage-return.
static CONTROL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f]").unwrap_or_else(|e| panic!("{e}")));

/// Outcome of the heuristic checks for one page.
#[derive(Debug, Clone)]
pub struct HeuristicsReport {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl HeuristicsReport {
    /// Fold the report into a page-level verdict: failing heuristics means
    /// the output is poor, passing means acceptable.
    pub fn verdict(&self) -> AuditVerdict {
        let outcome = if self.passed {
            AuditOutcome::Acceptable
        } else {
            AuditOutcome::Poor
        };
        let mut parts = self.errors.clone();
        parts.extend(self.warnings.iter().cloned());
        let reason = if parts.is_empty() {
            "all heuristic checks passed".to_string()
        } else {
            parts.join("; ")
        };
        AuditVerdict {
            source: AuditSource::Heuristic,
            outcome,
            reason,
        }
    }
}

/// Fast heuristic checks for OCR quality.
pub struct HeuristicsChecker {
    min_word_count: usize,
    max_garbage_ratio: f32,
    min_avg_word_len: f32,
    max_avg_word_len: f32,
    max_repeat_kinds: usize,
}

impl HeuristicsChecker {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            min_word_count: config.min_word_count,
            max_garbage_ratio: config.max_garbage_ratio,
            min_avg_word_len: config.min_avg_word_len,
            max_avg_word_len: config.max_avg_word_len,
            max_repeat_kinds: config.max_repeat_kinds.max(1),
        }
    }

    /// Run all checks on one page of recognised text.
    pub fn check(&self, text: &str) -> HeuristicsReport {
        let mut report = HeuristicsReport {
            passed: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        if text.trim().is_empty() {
            report.passed = false;
            report.errors.push("empty output: no text extracted".into());
            return report;
        }

        let words: Vec<&str> = text.split_whitespace().collect();

        // Word count. Exactly at the minimum passes.
        if words.len() < self.min_word_count {
            report.passed = false;
            report.errors.push(format!(
                "word count {} below minimum {}",
                words.len(),
                self.min_word_count
            ));
        }

        // Average word length, warning only.
        let avg_len =
            words.iter().map(|w| w.chars().count()).sum::<usize>() as f32 / words.len() as f32;
        if avg_len < self.min_avg_word_len || avg_len > self.max_avg_word_len {
            report.warnings.push(format!(
                "average word length {avg_len:.1} outside {}-{}",
                self.min_avg_word_len, self.max_avg_word_len
            ));
        }

        // Garbage ratio. Exactly at the threshold passes.
        let ratio = garbage_ratio(text);
        if ratio > self.max_garbage_ratio {
            report.passed = false;
            report.errors.push(format!(
                "garbage ratio {:.1}% above {:.0}%",
                ratio * 100.0,
                self.max_garbage_ratio * 100.0
            ));
        }

        // Mojibake tells, warning only.
        for issue in unicode_issues(text) {
            report.warnings.push(format!("unicode issue: {issue}"));
        }

        // Degenerate repetition. One kind warns; enough distinct kinds fail.
        let repeats = repetition_kinds(text);
        if repeats.len() >= self.max_repeat_kinds {
            report.passed = false;
            report
                .errors
                .push(format!("degenerate repetition: {}", repeats.join(", ")));
        } else if !repeats.is_empty() {
            report
                .warnings
                .push(format!("suspicious repetition: {}", repeats.join(", ")));
        }

        report
    }
}

/// Ratio of garbage characters (plus excessive-whitespace runs) to total
/// characters.
pub fn garbage_ratio(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let garbage = GARBAGE_RE.find_iter(text).count() + EXCESSIVE_WS_RE.find_iter(text).count();
    garbage as f32 / total as f32
}

fn unicode_issues(text: &str) -> Vec<&'static str> {
    let mut issues = Vec::new();
    if text.contains('\u{fffd}') {
        issues.push("replacement chars");
    }
    if PRIVATE_USE_RE.is_match(text) {
        issues.push("private use chars");
    }
    if CONTROL_RE.is_match(text) {
        issues.push("control chars");
    }
    issues
}

/// Distinct kinds of degenerate repetition found in the text.
///
/// The patterns mirror classic OCR failure loops. They need backreferences,
/// which the regex crate deliberately does not support, so each is a short
/// hand scan instead.
fn repetition_kinds(text: &str) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    if has_repeated_char_run(text, 5) {
        kinds.push("repeated chars");
    }
    if has_repeated_word(text, 3) {
        kinds.push("repeated words");
    }
    if has_alternating_pattern(text, 4) {
        kinds.push("alternating patterns");
    }
    kinds
}

/// Same character `min_run`+ times in a row (whitespace excluded: long
/// space runs are already the excessive-whitespace check's job).
fn has_repeated_char_run(text: &str, min_run: usize) -> bool {
    let mut run = 0usize;
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if Some(c) == prev && !c.is_whitespace() {
            run += 1;
            if run >= min_run {
                return true;
            }
        } else {
            run = 1;
        }
        prev = Some(c);
    }
    false
}

/// Same word `min_count`+ times consecutively, case-insensitive.
fn has_repeated_word(text: &str, min_count: usize) -> bool {
    let mut run = 0usize;
    let mut prev: Option<String> = None;
    for word in text.split_whitespace() {
        let lowered = word.to_lowercase();
        if prev.as_deref() == Some(lowered.as_str()) {
            run += 1;
        } else {
            run = 1;
        }
        if run >= min_count {
            return true;
        }
        prev = Some(lowered);
    }
    false
}

/// A two-character unit repeated `min_units`+ times back to back
/// ("ababab..."), excluding units that are all the same character (those
/// are the repeated-char check) or whitespace.
fn has_alternating_pattern(text: &str, min_units: usize) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let needed = min_units * 2;
    if chars.len() < needed {
        return false;
    }
    for start in 0..=(chars.len() - needed) {
        let a = chars[start];
        let b = chars[start + 1];
        if a == b || a.is_whitespace() || b.is_whitespace() {
            continue;
        }
        let window = &chars[start..start + needed];
        if window
            .chunks(2)
            .all(|pair| pair[0] == a && pair[1] == b)
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> HeuristicsChecker {
        HeuristicsChecker::new(&AuditConfig::default())
    }

    fn clean_text(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{}", i % 7))
            .collect::<Vec<_>>()
            .chunks(3)
            .map(|c| c.join(" "))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn clean_prose_passes() {
        let report = checker().check(
            "The quarterly report shows strong revenue growth across all regions. \
             Operating margins improved by two percentage points compared with the \
             prior year, driven mainly by lower logistics costs. The board approved \
             a continued investment programme for the next fiscal year, with capital \
             allocated to automation and to expanding the distribution network in \
             the southern region of the country over twelve months.",
        );
        assert!(report.passed, "errors: {:?}", report.errors);
        assert_eq!(report.verdict().outcome, AuditOutcome::Acceptable);
    }

    #[test]
    fn empty_text_fails() {
        let report = checker().check("   \n  ");
        assert!(!report.passed);
        assert_eq!(report.verdict().outcome, AuditOutcome::Poor);
    }

    #[test]
    fn word_count_boundary_is_inclusive() {
        // Exactly min_word_count words passes; one fewer fails.
        let at = clean_text(50);
        assert_eq!(at.split_whitespace().count(), 50);
        assert!(checker().check(&at).passed);

        let below = clean_text(49);
        let report = checker().check(&below);
        assert!(!report.passed);
        assert!(report.errors[0].contains("word count"));
    }

    #[test]
    fn garbage_ratio_boundary_passes_at_threshold() {
        // 3 garbage chars out of 20 chars = 0.15, exactly at the default cap.
        let text = "abcde fghij klmno\u{2603}\u{2603}\u{2603}";
        assert_eq!(text.chars().count(), 20);
        assert!((garbage_ratio(text) - 0.15).abs() < 1e-6);

        let mut cfg = AuditConfig::default();
        cfg.min_word_count = 1;
        let report = HeuristicsChecker::new(&cfg).check(text);
        assert!(report.passed, "errors: {:?}", report.errors);

        // One more garbage char tips it over.
        let worse = "abcd efghi jklmn\u{2603}\u{2603}\u{2603}\u{2603}";
        assert_eq!(worse.chars().count(), 20);
        let report = HeuristicsChecker::new(&cfg).check(worse);
        assert!(!report.passed);
    }

    #[test]
    fn single_repetition_kind_only_warns() {
        let mut cfg = AuditConfig::default();
        cfg.min_word_count = 1;
        let text = format!("{} normal trailing prose here", "the the the");
        let report = HeuristicsChecker::new(&cfg).check(&text);
        assert!(report.passed);
        assert!(report.warnings.iter().any(|w| w.contains("repeated words")));
    }

    #[test]
    fn two_repetition_kinds_fail() {
        let mut cfg = AuditConfig::default();
        cfg.min_word_count = 1;
        // Repeated chars ("aaaaa") and an alternating pattern ("abababab").
        let text = "aaaaa abababab some other words";
        let report = HeuristicsChecker::new(&cfg).check(text);
        assert!(!report.passed);
        assert!(report.errors.iter().any(|e| e.contains("repetition")));
    }

    #[test]
    fn mojibake_warns_but_does_not_fail() {
        let mut cfg = AuditConfig::default();
        cfg.min_word_count = 1;
        let text = "mostly fine text with one bad char \u{fffd} in the middle of it";
        let report = HeuristicsChecker::new(&cfg).check(text);
        assert!(report.passed);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("replacement chars")));
    }

    #[test]
    fn detectors_match_expected_shapes() {
        assert!(has_repeated_char_run("xxxxx", 5));
        assert!(!has_repeated_char_run("xxxx", 5));
        assert!(!has_repeated_char_run("     ", 5));

        assert!(has_repeated_word("go go go", 3));
        assert!(has_repeated_word("Go gO go", 3));
        assert!(!has_repeated_word("go go stop go", 3));

        assert!(has_alternating_pattern("xyxyxyxy", 4));
        assert!(!has_alternating_pattern("xyxyxy", 4));
        assert!(!has_alternating_pattern("aaaaaaaa", 4));
    }
}
