//! Role-based engine selection.
//!
//! Each pipeline role carries a fixed preference order over the engine set:
//! local-first for primary work (free, private), cloud-first for fallback
//! (a flagged page needs a *different* kind of engine, and cloud vision
//! models recover scans local models choke on). Selection walks the order
//! and returns the first engine that is registered, available, not
//! excluded, and capable of the role.
//!
//! User overrides are honoured when the forced engine is usable; otherwise
//! selection logs a warning and falls back to the automatic order rather
//! than aborting a run over a config preference.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{EngineAdapter, EngineKind, EngineRegistry};
use crate::error::OcrError;

/// What the selected engine will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineRole {
    /// Stage 1: first OCR attempt over every page.
    Primary,
    /// Stage 3: reprocess pages the quality gate flagged.
    Fallback,
    /// Stage 2b: second opinion on pages the quality gate flagged.
    CrossCheck,
    /// Stage 4: describe cropped figure regions.
    Figure,
}

impl EngineRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::CrossCheck => "cross-check",
            Self::Figure => "figure",
        }
    }

    /// Preference order for this role.
    fn preference(&self) -> &'static [EngineKind] {
        use EngineKind::*;
        match self {
            // Local first: free and private, quality checked afterwards.
            Self::Primary => &[Deepseek, Nougat, Gemini, Mistral],
            // Second opinions stay local; cloud engines are reserved for
            // the fallback stage.
            Self::CrossCheck => &[Nougat, Deepseek],
            // Cloud first: a flagged page needs a different class of engine.
            Self::Fallback => &[Gemini, Mistral, Deepseek, Nougat],
            // Only engines that can describe figures at all.
            Self::Figure => &[Gemini, Deepseek, Mistral],
        }
    }
}

impl fmt::Display for EngineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-role forced engine choices, taken from config.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleOverrides {
    pub primary: Option<EngineKind>,
    pub fallback: Option<EngineKind>,
    pub figure: Option<EngineKind>,
}

impl RoleOverrides {
    fn for_role(&self, role: EngineRole) -> Option<EngineKind> {
        match role {
            EngineRole::Primary => self.primary,
            EngineRole::Fallback => self.fallback,
            EngineRole::Figure => self.figure,
            // Cross-check always auto-selects; forcing it would defeat the
            // point of a second opinion.
            EngineRole::CrossCheck => None,
        }
    }
}

/// Selects engines from a registry by role.
pub struct EngineRouter {
    registry: Arc<EngineRegistry>,
    overrides: RoleOverrides,
}

impl EngineRouter {
    pub fn new(registry: Arc<EngineRegistry>, overrides: RoleOverrides) -> Self {
        Self {
            registry,
            overrides,
        }
    }

    /// Select an engine for `role`, skipping anything in `exclude`.
    ///
    /// Returns [`OcrError::NoEngineAvailable`] when the whole preference
    /// order is exhausted. Callers decide whether that is fatal (primary)
    /// or a per-page degradation (fallback, figure).
    pub async fn select(
        &self,
        role: EngineRole,
        exclude: &HashSet<EngineKind>,
    ) -> Result<Arc<dyn EngineAdapter>, OcrError> {
        if let Some(forced) = self.overrides.for_role(role) {
            if exclude.contains(&forced) {
                warn!(role = %role, engine = %forced, "override is excluded for this role, using automatic selection");
            } else if let Some(engine) = self.usable(forced, role).await {
                debug!(role = %role, engine = %forced, "using engine override");
                return Ok(engine);
            } else {
                warn!(role = %role, engine = %forced, "override engine unavailable, using automatic selection");
            }
        }

        for &kind in role.preference() {
            if exclude.contains(&kind) {
                continue;
            }
            if let Some(engine) = self.usable(kind, role).await {
                debug!(role = %role, engine = %kind, "selected engine");
                return Ok(engine);
            }
        }
        Err(OcrError::NoEngineAvailable { role })
    }

    /// The engine if it is registered, role-capable, and probed available.
    async fn usable(&self, kind: EngineKind, role: EngineRole) -> Option<Arc<dyn EngineAdapter>> {
        let engine = self.registry.get(kind)?;
        if role == EngineRole::Figure && !engine.capabilities().supports_figures {
            return None;
        }
        if role == EngineRole::CrossCheck && !engine.capabilities().is_local {
            return None;
        }
        if self.registry.is_available(kind).await {
            Some(engine)
        } else {
            None
        }
    }
}
