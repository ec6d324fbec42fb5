//! Pipeline stages and the per-page state machine.
//!
//! A page moves through an explicit state machine rather than through
//! nested conditionals scattered over the orchestrator:
//!
//! ```text
//! Pending ──primary──▶ PrimaryDone ──audit──▶ Audited ──accept──▶ Final
//!                                                │
//!                                              flag
//!                                                ▼
//!                              FallbackPending ──fallback──▶ FallbackDone ──▶ Final
//! ```
//!
//! The machine makes the core guarantee checkable: at most one fallback
//! attempt per page, ever. There is no edge from `FallbackDone` back to
//! `FallbackPending`, so a second rerun cannot be expressed, let alone
//! executed.

pub mod encode;
pub mod extract;
pub mod figures;
pub mod gate;
pub mod ocr;

/// Where a page is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Not yet attempted.
    Pending,
    /// Primary OCR finished (successfully or not); awaiting the gate.
    PrimaryDone,
    /// The quality gate has ruled; awaiting routing.
    Audited,
    /// Flagged; queued for the single fallback attempt.
    FallbackPending,
    /// The fallback attempt finished (successfully or not).
    FallbackDone,
    /// Terminal. No further engine calls for this page.
    Final,
}

/// Events that drive a page through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    /// Primary OCR completed (the attempt may still have failed; the
    /// outcome lives on the page result, not in the state).
    PrimaryComplete,
    /// The gate accepted the stored output.
    AuditAccept,
    /// The gate flagged the page for fallback.
    AuditFlag,
    /// The fallback attempt completed.
    FallbackComplete,
    /// Close out the page.
    Finalize,
}

impl PageState {
    /// Apply an event. `None` means the event is not legal in this state;
    /// the orchestrator treats that as a logic error and refuses to act.
    pub fn transition(self, event: PageEvent) -> Option<PageState> {
        use PageEvent::*;
        use PageState::*;
        match (self, event) {
            (Pending, PrimaryComplete) => Some(PrimaryDone),
            (PrimaryDone, AuditAccept) => Some(Audited),
            (PrimaryDone, AuditFlag) => Some(FallbackPending),
            (Audited, Finalize) => Some(Final),
            (FallbackPending, FallbackComplete) => Some(FallbackDone),
            (FallbackDone, Finalize) => Some(Final),
            _ => None,
        }
    }

    /// Whether the page may still receive engine calls.
    pub fn is_terminal(self) -> bool {
        self == PageState::Final
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PageEvent::*;
    use PageState::*;

    #[test]
    fn happy_path_reaches_final_without_fallback() {
        let state = Pending
            .transition(PrimaryComplete)
            .and_then(|s| s.transition(AuditAccept))
            .and_then(|s| s.transition(Finalize));
        assert_eq!(state, Some(Final));
    }

    #[test]
    fn flagged_path_goes_through_exactly_one_fallback() {
        let state = Pending
            .transition(PrimaryComplete)
            .and_then(|s| s.transition(AuditFlag))
            .and_then(|s| s.transition(FallbackComplete))
            .and_then(|s| s.transition(Finalize));
        assert_eq!(state, Some(Final));
    }

    #[test]
    fn second_fallback_cannot_be_expressed() {
        let after_fallback = FallbackPending.transition(FallbackComplete).unwrap();
        // No event routes a fallback-done page back into the fallback queue.
        assert_eq!(after_fallback.transition(AuditFlag), None);
        assert_eq!(after_fallback.transition(FallbackComplete), None);
        assert_eq!(after_fallback.transition(PrimaryComplete), None);
    }

    #[test]
    fn terminal_state_accepts_nothing() {
        for event in [PrimaryComplete, AuditAccept, AuditFlag, FallbackComplete, Finalize] {
            assert_eq!(Final.transition(event), None);
        }
        assert!(Final.is_terminal());
        assert!(!FallbackDone.is_terminal());
    }

    #[test]
    fn audit_before_primary_is_illegal() {
        assert_eq!(Pending.transition(AuditFlag), None);
        assert_eq!(Pending.transition(FallbackComplete), None);
    }
}
