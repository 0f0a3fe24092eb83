//! Phase trait and phase registry.
//!
//! Mirrors the separated-concerns shape of comparable phase-oriented
//! orchestrators: a single trait each concrete phase implements, a context
//! struct carrying everything a phase needs without reaching into the
//! orchestrator's internals, and a typed result the orchestrator folds
//! into [`crate::model::PhaseResult`]. Where those orchestrators separate
//! `prompt`/`make_packet`/`postprocess` because their phases drive an LLM,
//! this pipeline's phases are deterministic file transformations, so the
//! trait collapses to a single `run`.

pub mod phase0_preflight;
pub mod phase1_images;
pub mod phase2_strip_images;
pub mod phase3_toc_fonts;
pub mod phase4_extract;
pub mod phase5_char_cleanup;
pub mod phase6_word_cleanup;
pub mod phase7_structural;
pub mod phase8_hierarchy;

use crate::config::PipelineConfig;
use crate::error::{ConvertError, StepWarning};
use crate::interaction::UserInteraction;
use crate::model::StepStatus;
use std::path::{Path, PathBuf};

/// Everything a phase needs to read prior-phase artifacts and write its
/// own, without reaching into orchestrator internals.
pub struct PhaseContext<'a> {
    pub pdf_path: &'a Path,
    pub output_dir: &'a Path,
    pub doc_stem: &'a str,
    pub config: &'a PipelineConfig,
    pub interaction: &'a dyn UserInteraction,
}

impl<'a> PhaseContext<'a> {
    /// Path to an artifact in the output directory.
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    /// Path to a named phase-output file: `<doc_stem>-phaseN.md`.
    pub fn phase_output(&self, phase: u8) -> PathBuf {
        self.output_dir
            .join(format!("{}-phase{}.md", self.doc_stem, phase))
    }
}

/// One step's outcome, folded into [`crate::model::StepResult`] by the
/// orchestrator.
pub struct StepOutcome {
    pub step_id: String,
    pub description: String,
    pub status: StepStatus,
    pub output_file: Option<PathBuf>,
    pub message: Option<String>,
}

impl StepOutcome {
    pub fn success(step_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            description: description.into(),
            status: StepStatus::Success,
            output_file: None,
            message: None,
        }
    }

    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output_file = Some(path);
        self
    }

    pub fn warn(mut self, warning: StepWarning) -> Self {
        self.status = StepStatus::Warning;
        self.message = Some(warning.to_string());
        self
    }
}

/// What a phase returns: its ordered step outcomes and, on success, the
/// path to its primary output artifact.
pub struct PhaseOutcome {
    pub steps: Vec<StepOutcome>,
    pub output_file: Option<PathBuf>,
}

/// A phase of the conversion pipeline: 0 (pre-flight) through 8 (hierarchy
/// application), run in strict ascending order by the orchestrator.
pub trait Phase {
    /// Phase number, 0–10 (9 and 10 are reserved for
    /// [`ExternalPhase`] — this core implements only 0–8).
    fn number(&self) -> u8;

    /// Human-readable name recorded in `PhaseResult::name`.
    fn name(&self) -> &'static str;

    /// Execute the phase from its first step. `from_step` optionally
    /// restricts execution to start at a given step within this phase
    /// (`run_from_step`); steps before it are assumed already durable and
    /// are not re-run.
    fn run(&self, ctx: &PhaseContext, from_step: Option<&str>) -> Result<PhaseOutcome, ConvertError>;
}

/// Marker for phases 9 (markdown lint) and 10 (report writing), which are
/// implemented by an external collaborator, not this core. Keeping a slot
/// for them in the registry lets `--phase 9`/`--phase 10` fail with a clear
/// [`ConvertError::ExternalPhaseNotImplemented`] instead of a missing-case
/// panic, and lets `status` print them as `not_implemented` rather than
/// silently omitting them from the 0..10 phase table.
pub struct ExternalPhase {
    pub number: u8,
    pub name: &'static str,
}

pub const EXTERNAL_PHASES: &[ExternalPhase] = &[
    ExternalPhase {
        number: 9,
        name: "markdown-lint",
    },
    ExternalPhase {
        number: 10,
        name: "report-writing",
    },
];

/// The ordered registry of phases this core implements.
pub fn registry() -> Vec<Box<dyn Phase>> {
    vec![
        Box::new(phase0_preflight::Phase0),
        Box::new(phase1_images::Phase1),
        Box::new(phase2_strip_images::Phase2),
        Box::new(phase3_toc_fonts::Phase3),
        Box::new(phase4_extract::Phase4),
        Box::new(phase5_char_cleanup::Phase5),
        Box::new(phase6_word_cleanup::Phase6),
        Box::new(phase7_structural::Phase7),
        Box::new(phase8_hierarchy::Phase8),
    ]
}
