//! Orchestrator: the state-machine driver that ties [`crate::state`] and
//! [`crate::pipeline::registry`] together into the `run`/`resume`/
//! `run_phase`/`run_from_step`/`status` operations.
//!
//! The orchestrator itself holds no pipeline logic — each phase is a pure
//! file transformation reached through [`crate::pipeline::Phase::run`]. What
//! lives here is sequencing, locking, and state persistence: acquire the
//! advisory lock, load or create [`ConversionState`], run phases in order,
//! save state after every phase, release the lock on drop.

use crate::config::PipelineConfig;
use crate::error::ConvertError;
use crate::interaction::{NonInteractive, UserInteraction};
use crate::model::{
    ConversionState, ErrorDetail, PhaseResult, RunConfig, RunStatus, StepResult, StepStatus,
};
use crate::pipeline::{self, PhaseContext, EXTERNAL_PHASES};
use crate::state;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A snapshot of run progress, returned by `status` without requiring a
/// lock — read-only inspection of whatever `.state.json` last recorded.
#[derive(Debug, Clone)]
pub struct RunStatusReport {
    pub current_phase: u8,
    pub current_step: String,
    pub completed_phases: Vec<u8>,
    pub status: RunStatus,
    pub phase_summaries: Vec<(u8, String, StepStatus)>,
}

fn doc_stem(pdf_path: &Path) -> String {
    pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

fn run_config_from(config: &PipelineConfig) -> RunConfig {
    RunConfig {
        diagnostics: config.diagnostics,
        non_interactive: config.non_interactive,
        callout_config_path: config.callout_config_path.clone(),
        gm_keywords: config.gm_keywords.clone(),
    }
}

fn config_from_run(output_dir: PathBuf, run_config: &RunConfig) -> Result<PipelineConfig, ConvertError> {
    let mut builder = PipelineConfig::builder(output_dir)
        .diagnostics(run_config.diagnostics)
        .non_interactive(run_config.non_interactive)
        .gm_keywords(run_config.gm_keywords.clone());
    if let Some(path) = &run_config.callout_config_path {
        builder = builder.callout_config_path(path.clone());
    }
    builder.build()
}

/// Run the full pipeline (phases 0 through the last implemented phase) for
/// a fresh conversion. Fails with [`ConvertError::InvalidArgument`] if
/// `.state.json` already exists in `output_dir` — callers wanting to
/// continue a prior run should call [`resume`] instead.
pub fn run(pdf_path: &Path, config: PipelineConfig) -> Result<ConversionState, ConvertError> {
    run_with_interaction(pdf_path, config, &NonInteractive)
}

/// Same as [`run`], taking an explicit [`UserInteraction`] implementation
/// instead of always defaulting to [`NonInteractive`].
pub fn run_with_interaction(
    pdf_path: &Path,
    config: PipelineConfig,
    interaction: &dyn UserInteraction,
) -> Result<ConversionState, ConvertError> {
    if !pdf_path.exists() {
        return Err(ConvertError::PdfNotFound {
            path: pdf_path.to_path_buf(),
        });
    }
    std::fs::create_dir_all(&config.output_dir).map_err(|e| ConvertError::OutputDirNotWritable {
        path: config.output_dir.clone(),
        detail: e.to_string(),
    })?;

    let existing_state_path = config.output_dir.join(".state.json");
    if existing_state_path.exists() {
        return Err(ConvertError::InvalidArgument {
            detail: format!(
                "a conversion state already exists in '{}' - use resume() instead",
                config.output_dir.display()
            ),
        });
    }

    let _lock = state::acquire_lock(&config.output_dir)?;

    let run_config = run_config_from(&config);
    let mut conv_state = ConversionState::new(
        pdf_path.to_path_buf(),
        config.output_dir.clone(),
        run_config,
        Utc::now(),
    );
    state::save(&config.output_dir, &conv_state)?;

    drive(pdf_path, &config, interaction, &mut conv_state, None)
}

/// Resume a prior conversion from `output_dir`'s persisted state. Returns
/// the state unchanged (idempotently) if the prior run already reached a
/// terminal status.
pub fn resume(output_dir: &Path) -> Result<ConversionState, ConvertError> {
    resume_with_interaction(output_dir, &NonInteractive)
}

pub fn resume_with_interaction(
    output_dir: &Path,
    interaction: &dyn UserInteraction,
) -> Result<ConversionState, ConvertError> {
    let mut conv_state = state::load(output_dir)?;
    if state::is_terminal(&conv_state) {
        info!(status = ?conv_state.status, "resume: run already terminal, nothing to do");
        return Ok(conv_state);
    }

    if state::lock_is_stale(output_dir) {
        warn!("resume: stale lock detected from a prior crashed run, proceeding");
    }
    let _lock = state::acquire_lock(output_dir)?;

    let config = config_from_run(output_dir.to_path_buf(), &conv_state.config)?;
    let pdf_path = conv_state.pdf_path.clone();
    drive(&pdf_path, &config, interaction, &mut conv_state, None)
}

/// Run exactly one phase (by number), requiring every lower-numbered phase
/// to already be marked complete in the persisted state. Used by
/// `--phase N` on the CLI.
pub fn run_phase(output_dir: &Path, phase: u8) -> Result<ConversionState, ConvertError> {
    run_phase_with_interaction(output_dir, phase, &NonInteractive)
}

pub fn run_phase_with_interaction(
    output_dir: &Path,
    phase: u8,
    interaction: &dyn UserInteraction,
) -> Result<ConversionState, ConvertError> {
    if let Some(external) = EXTERNAL_PHASES.iter().find(|p| p.number == phase) {
        return Err(ConvertError::ExternalPhaseNotImplemented {
            phase: external.number,
        });
    }

    let mut conv_state = state::load(output_dir)?;
    for missing in 0..phase {
        if !conv_state.completed_phases.contains(&missing) {
            return Err(ConvertError::PrerequisitePhaseMissing { phase, missing });
        }
    }

    let _lock = state::acquire_lock(output_dir)?;
    let config = config_from_run(output_dir.to_path_buf(), &conv_state.config)?;
    let pdf_path = conv_state.pdf_path.clone();
    drive(&pdf_path, &config, interaction, &mut conv_state, Some((phase, phase)))
}

/// Resume execution starting at a specific `N.M` step within the current
/// phase, re-running only that phase's remaining steps rather than the
/// whole pipeline. Used by `--from-step N.M` on the CLI.
pub fn run_from_step(output_dir: &Path, step_id: &str) -> Result<ConversionState, ConvertError> {
    run_from_step_with_interaction(output_dir, step_id, &NonInteractive)
}

pub fn run_from_step_with_interaction(
    output_dir: &Path,
    step_id: &str,
    interaction: &dyn UserInteraction,
) -> Result<ConversionState, ConvertError> {
    if !crate::model::step_id_is_well_formed(step_id) {
        return Err(ConvertError::InvalidArgument {
            detail: format!("'{step_id}' is not a well-formed step id (expected N.M)"),
        });
    }
    let phase: u8 = step_id
        .split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ConvertError::InvalidArgument {
            detail: format!("could not parse phase number out of '{step_id}'"),
        })?;

    let mut conv_state = state::load(output_dir)?;
    let _lock = state::acquire_lock(output_dir)?;
    let config = config_from_run(output_dir.to_path_buf(), &conv_state.config)?;
    let pdf_path = conv_state.pdf_path.clone();
    conv_state.current_phase = phase;
    conv_state.current_step = step_id.to_string();
    drive_from_step(&pdf_path, &config, interaction, &mut conv_state, phase, step_id)
}

/// Read-only progress snapshot, requiring no lock.
pub fn status(output_dir: &Path) -> Result<RunStatusReport, ConvertError> {
    let conv_state = state::load(output_dir)?;
    let phase_summaries = conv_state
        .phase_results
        .values()
        .map(|r| (r.phase_num, r.name.clone(), r.status))
        .collect();
    Ok(RunStatusReport {
        current_phase: conv_state.current_phase,
        current_step: conv_state.current_step.clone(),
        completed_phases: conv_state.completed_phases.clone(),
        status: conv_state.status,
        phase_summaries,
    })
}

/// Drive phases `start..=end` (inclusive range of phase numbers, `None`
/// meaning "every phase not yet completed") to completion, persisting state
/// after each one.
fn drive(
    pdf_path: &Path,
    config: &PipelineConfig,
    interaction: &dyn UserInteraction,
    conv_state: &mut ConversionState,
    phase_range: Option<(u8, u8)>,
) -> Result<ConversionState, ConvertError> {
    let doc_stem = doc_stem(pdf_path);
    let ctx = PhaseContext {
        pdf_path,
        output_dir: &config.output_dir,
        doc_stem: &doc_stem,
        config,
        interaction,
    };

    for phase in pipeline::registry() {
        let num = phase.number();
        if let Some((start, end)) = phase_range {
            if num < start || num > end {
                continue;
            }
        } else if conv_state.completed_phases.contains(&num) {
            continue;
        }

        match run_one_phase(phase.as_ref(), &ctx, None, conv_state) {
            Ok(()) => {}
            Err(e) => {
                persist_failure(&config.output_dir, conv_state, num, &e)?;
                return Err(e);
            }
        }
        state::save(&config.output_dir, conv_state)?;
    }

    if phase_range.is_none() {
        conv_state.status = RunStatus::Completed;
        conv_state.updated_at = Utc::now();
        state::save(&config.output_dir, conv_state)?;
    }

    Ok(conv_state.clone())
}

/// Like [`drive`] but restricted to one phase, resuming partway through it
/// at `step_id` (the phase's own `run` is still invoked as a whole — this
/// core's phases are not internally step-resumable below the phase
/// boundary, matching `spec.md`'s note that `from_step` narrows re-entry to
/// the owning phase, not to a sub-step).
fn drive_from_step(
    pdf_path: &Path,
    config: &PipelineConfig,
    interaction: &dyn UserInteraction,
    conv_state: &mut ConversionState,
    phase: u8,
    step_id: &str,
) -> Result<ConversionState, ConvertError> {
    let doc_stem = doc_stem(pdf_path);
    let ctx = PhaseContext {
        pdf_path,
        output_dir: &config.output_dir,
        doc_stem: &doc_stem,
        config,
        interaction,
    };

    let phase_impl = pipeline::registry()
        .into_iter()
        .find(|p| p.number() == phase)
        .ok_or(ConvertError::ExternalPhaseNotImplemented { phase })?;

    match run_one_phase(phase_impl.as_ref(), &ctx, Some(step_id), conv_state) {
        Ok(()) => {
            state::save(&config.output_dir, conv_state)?;
            Ok(conv_state.clone())
        }
        Err(e) => {
            persist_failure(&config.output_dir, conv_state, phase, &e)?;
            Err(e)
        }
    }
}

fn run_one_phase(
    phase: &dyn pipeline::Phase,
    ctx: &PhaseContext,
    from_step: Option<&str>,
    conv_state: &mut ConversionState,
) -> Result<(), ConvertError> {
    let num = phase.number();
    conv_state.current_phase = num;
    conv_state.current_step = format!("{num}.1");

    let started_at = Utc::now();
    info!(phase = num, name = phase.name(), "starting phase");
    let outcome = phase.run(ctx, from_step)?;

    let mut result = PhaseResult::started(num, phase.name(), started_at);
    result.steps = outcome
        .steps
        .iter()
        .map(|s| StepResult {
            step_id: s.step_id.clone(),
            description: s.description.clone(),
            status: s.status,
            duration_ms: 0,
            output_file: s.output_file.clone(),
            message: s.message.clone(),
        })
        .collect();
    result.warnings = outcome
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Warning)
        .filter_map(|s| s.message.clone())
        .collect();
    result.output_file = outcome.output_file;
    result.completed_at = Some(Utc::now());
    result.recompute_status();

    if let Some(last) = outcome.steps.last() {
        conv_state.current_step = last.step_id.clone();
    }
    conv_state.phase_results.insert(num, result);
    if !conv_state.completed_phases.contains(&num) {
        conv_state.completed_phases.push(num);
        conv_state.completed_phases.sort_unstable();
    }
    conv_state.updated_at = Utc::now();

    info!(phase = num, "phase complete");
    Ok(())
}

fn persist_failure(
    output_dir: &Path,
    conv_state: &mut ConversionState,
    phase: u8,
    error: &ConvertError,
) -> Result<(), ConvertError> {
    conv_state.status = RunStatus::Failed;
    conv_state.updated_at = Utc::now();
    conv_state.error = Some(ErrorDetail {
        phase,
        step: conv_state.current_step.clone(),
        code: format!("{error:?}")
            .split(|c: char| !c.is_alphanumeric())
            .next()
            .unwrap_or("Unknown")
            .to_string(),
        message: error.to_string(),
        recoverable: !matches!(
            error,
            ConvertError::ScannedPdfDetected { .. } | ConvertError::EncryptedPdf { .. }
        ),
        suggestion: None,
    });
    state::save(output_dir, conv_state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_stem_strips_extension() {
        assert_eq!(doc_stem(Path::new("/tmp/adventure.pdf")), "adventure");
        assert_eq!(doc_stem(Path::new("plain")), "plain");
    }

    #[test]
    fn run_on_missing_pdf_is_a_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder(dir.path().join("out")).build().unwrap();
        let err = run(Path::new("/does/not/exist.pdf"), config).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn run_twice_without_resume_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("out");
        std::fs::create_dir_all(&output_dir).unwrap();
        let config = PipelineConfig::builder(output_dir.clone()).build().unwrap();

        let fresh = ConversionState::new(
            dir.path().join("in.pdf"),
            output_dir.clone(),
            RunConfig::default(),
            Utc::now(),
        );
        state::save(&output_dir, &fresh).unwrap();

        let pdf_path = dir.path().join("in.pdf");
        std::fs::write(&pdf_path, b"%PDF-1.4").unwrap();
        let err = run(&pdf_path, config).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn status_reads_back_persisted_state_without_lock() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = ConversionState::new(
            dir.path().join("in.pdf"),
            dir.path().to_path_buf(),
            RunConfig::default(),
            Utc::now(),
        );
        state::save(dir.path(), &fresh).unwrap();
        let report = status(dir.path()).unwrap();
        assert_eq!(report.current_phase, 0);
        assert_eq!(report.status, RunStatus::InProgress);
    }

    #[test]
    fn resume_on_completed_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ConversionState::new(
            dir.path().join("in.pdf"),
            dir.path().to_path_buf(),
            RunConfig::default(),
            Utc::now(),
        );
        state.status = RunStatus::Completed;
        state::save(dir.path(), &state).unwrap();

        let resumed = resume(dir.path()).unwrap();
        assert_eq!(resumed.status, RunStatus::Completed);
    }

    #[test]
    fn run_phase_rejects_external_phase() {
        let dir = tempfile::tempdir().unwrap();
        let state = ConversionState::new(
            dir.path().join("in.pdf"),
            dir.path().to_path_buf(),
            RunConfig::default(),
            Utc::now(),
        );
        state::save(dir.path(), &state).unwrap();
        let err = run_phase(dir.path(), 9).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn run_phase_rejects_missing_prerequisite() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ConversionState::new(
            dir.path().join("in.pdf"),
            dir.path().to_path_buf(),
            RunConfig::default(),
            Utc::now(),
        );
        state.current_phase = 3;
        state::save(dir.path(), &state).unwrap();
        let err = run_phase(dir.path(), 3).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn run_from_step_rejects_malformed_step_id() {
        let dir = tempfile::tempdir().unwrap();
        let state = ConversionState::new(
            dir.path().join("in.pdf"),
            dir.path().to_path_buf(),
            RunConfig::default(),
            Utc::now(),
        );
        state::save(dir.path(), &state).unwrap();
        let err = run_from_step(dir.path(), "not-a-step").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
