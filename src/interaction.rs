//! User-interaction contract.
//!
//! Phase 0 step 0.6 (pre-flight confirmation) and Phase 7 step 7.10
//! (font-mapping review) are specified as blocking on an external
//! collaborator, not as code this core owns. [`UserInteraction`] is the
//! seam: the orchestrator calls through it and never reads stdin or writes
//! a TUI directly. [`NonInteractive`] auto-confirms everything, matching
//! the contract that non-interactive mode accepts every default.

use crate::model::{FontLabel, FontSignature};
use std::collections::HashMap;

/// The pre-flight report presented at step 0.6.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub page_count: u32,
    pub image_count: u32,
    pub font_family_count: usize,
    pub complexity: Complexity,
    pub phases_requiring_user_involvement: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Low,
    Moderate,
    High,
}

/// Decision returned from the step 0.6 confirmation dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightDecision {
    Proceed,
    Abort,
}

/// Decision returned from the step 7.10 font-mapping review dialog: either
/// accept the core's inferred labels as-is, or replace some with an
/// explicit override map.
#[derive(Debug, Clone)]
pub enum MappingReviewDecision {
    AcceptInferred,
    Overrides(HashMap<String, FontLabel>),
}

/// External collaborator contract for every point the pipeline blocks on a
/// human decision.
pub trait UserInteraction {
    fn confirm_preflight(&self, report: &PreflightReport) -> PreflightDecision;
    fn review_font_mapping(&self, signatures: &[FontSignature]) -> MappingReviewDecision;
}

/// Default, non-blocking implementation: always proceeds, always accepts
/// inferred labels. Used whenever [`crate::config::PipelineConfig::non_interactive`]
/// is set, and is the only implementation this core ships — a real TUI/CLI
/// confirmation flow is an external collaborator's responsibility.
pub struct NonInteractive;

impl UserInteraction for NonInteractive {
    fn confirm_preflight(&self, _report: &PreflightReport) -> PreflightDecision {
        PreflightDecision::Proceed
    }

    fn review_font_mapping(&self, _signatures: &[FontSignature]) -> MappingReviewDecision {
        MappingReviewDecision::AcceptInferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_interactive_always_proceeds() {
        let ui = NonInteractive;
        let report = PreflightReport {
            page_count: 10,
            image_count: 2,
            font_family_count: 3,
            complexity: Complexity::Low,
            phases_requiring_user_involvement: vec![0, 7],
        };
        assert_eq!(ui.confirm_preflight(&report), PreflightDecision::Proceed);
    }

    #[test]
    fn non_interactive_accepts_inferred_mapping() {
        let ui = NonInteractive;
        let decision = ui.review_font_mapping(&[]);
        assert!(matches!(decision, MappingReviewDecision::AcceptInferred));
    }
}
