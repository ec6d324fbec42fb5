//! LLM-based quality audit via a local Ollama text model.
//!
//! Stage C of the quality gate: a second opinion on pages the heuristics
//! flagged, sparing false positives (formula-dense or tabular pages) a
//! fallback rerun. The auditor is an accelerant, never a gatekeeper — any
//! failure here keeps the heuristic verdict and the run continues.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::output::{AuditOutcome, AuditSource, AuditVerdict};
use crate::prompts::audit_prompt;

pub struct LlmAuditor {
    host: String,
    model: String,
    max_chars: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: String,
}

/// Shape the auditor is asked to reply with.
#[derive(Deserialize)]
struct RawVerdict {
    verdict: String,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

impl LlmAuditor {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            host: config.ollama_host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_chars: config.llm_audit_max_chars,
            client: reqwest::Client::new(),
        }
    }

    /// Whether Ollama is reachable and the audit model is pulled.
    pub async fn is_available(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(Duration::from_secs(5));
        let Ok(response) = request.send().await else {
            return false;
        };
        if !response.status().is_success() {
            return false;
        }
        let Ok(tags) = response.json::<TagsResponse>().await else {
            return false;
        };
        let wanted = self.model.split(':').next().unwrap_or(&self.model);
        tags.models
            .iter()
            .any(|m| m.name.split(':').next() == Some(wanted))
    }

    /// Audit one page of recognised text.
    pub async fn audit(&self, text: &str) -> Result<AuditVerdict, AuditError> {
        if text.trim().is_empty() {
            // Nothing to judge; heuristics already fail empty pages.
            return Ok(AuditVerdict {
                source: AuditSource::Llm,
                outcome: AuditOutcome::Poor,
                reason: "no text was extracted".to_string(),
            });
        }

        let body = serde_json::json!({
            "model": self.model,
            "prompt": audit_prompt(text, self.max_chars),
            "stream": false,
            "format": "json",
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|e| AuditError::Unavailable {
                detail: format!("ollama request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(AuditError::Unavailable {
                detail: format!("ollama returned {}", response.status()),
            });
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| AuditError::Unparseable {
                detail: format!("invalid ollama response: {e}"),
            })?;

        let verdict = parse_verdict(&parsed.response)?;
        debug!(outcome = ?verdict.outcome, "LLM audit verdict");
        Ok(verdict)
    }
}

/// Parse the auditor's reply into a verdict.
///
/// Strictest first: the whole reply as JSON, then the first embedded JSON
/// object, then keyword scanning over the raw prose. Replies that name no
/// recognisable verdict are unparseable.
pub(crate) fn parse_verdict(reply: &str) -> Result<AuditVerdict, AuditError> {
    if let Some(v) = verdict_from_json(reply) {
        return Ok(v);
    }
    for (start, _) in reply.match_indices('{') {
        if let Ok(raw) =
            serde_json::Deserializer::from_str(&reply[start..]).into_iter::<RawVerdict>().next()
                .transpose()
        {
            if let Some(raw) = raw {
                if let Some(v) = verdict_from_raw(raw) {
                    return Ok(v);
                }
            }
        }
    }

    // Keyword fallback over prose.
    let lowered = reply.to_lowercase();
    let outcome = if lowered.contains("acceptable") {
        AuditOutcome::Acceptable
    } else if lowered.contains("poor") {
        AuditOutcome::Poor
    } else if lowered.contains("review") {
        AuditOutcome::NeedsReview
    } else {
        return Err(AuditError::Unparseable {
            detail: format!(
                "no verdict found in reply: {}",
                reply.trim().chars().take(200).collect::<String>()
            ),
        });
    };
    Ok(AuditVerdict {
        source: AuditSource::Llm,
        outcome,
        reason: reply.trim().chars().take(500).collect(),
    })
}

fn verdict_from_json(s: &str) -> Option<AuditVerdict> {
    let raw: RawVerdict = serde_json::from_str(s.trim()).ok()?;
    verdict_from_raw(raw)
}

fn verdict_from_raw(raw: RawVerdict) -> Option<AuditVerdict> {
    let outcome = match raw.verdict.as_str() {
        "acceptable" => AuditOutcome::Acceptable,
        "needs_review" => AuditOutcome::NeedsReview,
        "poor" => AuditOutcome::Poor,
        _ => return None,
    };
    let reason = if raw.issues.is_empty() {
        raw.reasoning
    } else {
        format!("{} ({})", raw.reasoning, raw.issues.join(", "))
    };
    Some(AuditVerdict {
        source: AuditSource::Llm,
        outcome,
        reason,
    })
}
