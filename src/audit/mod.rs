//! Quality auditing for recognised text.
//!
//! Two complementary auditors feed the quality gate in
//! [`crate::pipeline::gate`]:
//!
//! * [`heuristics::HeuristicsChecker`] — deterministic, offline, runs on
//!   every page.
//! * [`llm::LlmAuditor`] — an optional second opinion from a local text
//!   model, able to clear pages the heuristics flagged.

use async_trait::async_trait;

use crate::error::AuditError;
use crate::output::AuditVerdict;

pub mod heuristics;
pub mod llm;

pub use heuristics::{HeuristicsChecker, HeuristicsReport};
pub use llm::LlmAuditor;

/// The LLM-audit seam: the gate only needs "give me a verdict on this
/// text", so embedders and tests can substitute their own judge.
#[async_trait]
pub trait TextAuditor: Send + Sync {
    /// Whether the auditor can be used this run.
    async fn is_available(&self) -> bool;

    /// Judge one page of recognised text.
    async fn audit(&self, text: &str) -> Result<AuditVerdict, AuditError>;
}

#[async_trait]
impl TextAuditor for LlmAuditor {
    async fn is_available(&self) -> bool {
        LlmAuditor::is_available(self).await
    }

    async fn audit(&self, text: &str) -> Result<AuditVerdict, AuditError> {
        LlmAuditor::audit(self, text).await
    }
}
