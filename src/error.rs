//! Error types for the rpgmd-convert library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`] — **Fatal**: the conversion cannot proceed at all
//!   (bad input file, corrupt state, missing dependency). Returned as
//!   `Err(ConvertError)` from [`crate::orchestrator`] and mapped to one of
//!   the five exit codes the CLI propagates.
//!
//! * [`StepWarning`] — **Non-fatal**: a single step degraded (no TOC found,
//!   a suspected column crossover) but the phase as a whole succeeded.
//!   Stored inside [`crate::model::PhaseResult`] so callers can inspect
//!   partial quality rather than losing the whole phase to one rough page.
//!
//! The separation lets callers decide their own tolerance: abort on the
//! first fatal error, or run to completion and inspect warnings afterward.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the orchestrator or a phase.
///
/// Message text for each variant is contractually fixed — downstream tests
/// assert exact strings — so edit the `#[error(...)]` format verbatim, not
/// its rendering.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── File/path errors → exit code 2 ──────────────────────────────────
    #[error("ERROR: Cannot open PDF - file not found or corrupted")]
    PdfNotFound { path: PathBuf },

    #[error("ERROR: Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    #[error("ERROR: Invalid argument: {detail}")]
    InvalidArgument { detail: String },

    #[error("ERROR: Output directory '{path}' is not writable: {detail}")]
    OutputDirNotWritable { path: PathBuf, detail: String },

    // ── PDF processing errors → exit code 3 ─────────────────────────────
    #[error("ERROR: Scanned PDF detected - very little extractable text")]
    ScannedPdfDetected { extractable_chars: usize },

    #[error("ERROR: PDF is encrypted and cannot be converted")]
    EncryptedPdf { path: PathBuf },

    #[error("ERROR: Image removal failed: {detail}")]
    ImageRemovalFailed { detail: String },

    #[error("ERROR: Text extraction produced no content for page {page}")]
    EmptyTextExtraction { page: u32 },

    #[error("ERROR: Disk full while writing '{path}'")]
    DiskFull { path: PathBuf },

    #[error("ERROR: Failed to render page {page}: {detail}")]
    RasterisationFailed { page: u32, detail: String },

    // ── State/resume errors → exit code 4 ───────────────────────────────
    #[error("ERROR: State file is corrupt: {detail}")]
    StateCorrupt { detail: String },

    #[error("ERROR: State schema violation: {detail}")]
    StateSchemaViolation { detail: String },

    #[error(
        "ERROR: Phase {phase} is marked complete but its output '{path}' is missing - re-run phase {phase}"
    )]
    MissingPhaseOutput { phase: u8, path: PathBuf },

    #[error("ERROR: State version '{found}' is newer than supported version '{supported}'")]
    UnsupportedStateVersion { found: String, supported: String },

    #[error(
        "ERROR: Could not acquire lock on state file within {timeout_secs}s - another conversion may be running"
    )]
    LockTimeout { timeout_secs: u64 },

    #[error("ERROR: No conversion state found in '{path}' - run without --resume first")]
    NoStateToResume { path: PathBuf },

    #[error("ERROR: Phase {phase} cannot run: prerequisite phase {missing} has not completed")]
    PrerequisitePhaseMissing { phase: u8, missing: u8 },

    #[error("ERROR: Phase {phase} is implemented by an external collaborator, not this core")]
    ExternalPhaseNotImplemented { phase: u8 },

    // ── Dependency errors → exit code 5 ──────────────────────────────────
    #[error("ERROR: Required native library unavailable: {detail}")]
    DependencyUnavailable { detail: String },

    // ── User abort → exit code 1 ─────────────────────────────────────────
    #[error("User declined to proceed")]
    UserAborted,

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Map to the exit-code taxonomy in `# 7. ERROR HANDLING DESIGN`.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConvertError::UserAborted => 1,

            ConvertError::PdfNotFound { .. }
            | ConvertError::PermissionDenied { .. }
            | ConvertError::InvalidArgument { .. }
            | ConvertError::OutputDirNotWritable { .. } => 2,

            ConvertError::ScannedPdfDetected { .. }
            | ConvertError::EncryptedPdf { .. }
            | ConvertError::ImageRemovalFailed { .. }
            | ConvertError::EmptyTextExtraction { .. }
            | ConvertError::DiskFull { .. }
            | ConvertError::RasterisationFailed { .. } => 3,

            ConvertError::StateCorrupt { .. }
            | ConvertError::StateSchemaViolation { .. }
            | ConvertError::MissingPhaseOutput { .. }
            | ConvertError::UnsupportedStateVersion { .. }
            | ConvertError::LockTimeout { .. }
            | ConvertError::NoStateToResume { .. }
            | ConvertError::PrerequisitePhaseMissing { .. }
            | ConvertError::ExternalPhaseNotImplemented { .. } => 4,

            ConvertError::DependencyUnavailable { .. } => 5,

            ConvertError::Internal(_) => 4,
        }
    }

    /// A failed atomic state write is always reported as a disk-full PDF
    /// processing error, per the state-writes propagation policy.
    pub fn disk_full(path: PathBuf) -> Self {
        ConvertError::DiskFull { path }
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(e: std::io::Error) -> Self {
        ConvertError::Internal(e.to_string())
    }
}

/// A recoverable condition inside a phase step.
///
/// Folded into [`crate::model::PhaseResult`] rather than propagated — the
/// phase completes with [`crate::model::StepStatus::Warning`] and the
/// pipeline continues.
#[derive(Debug, Clone, Error)]
pub enum StepWarning {
    #[error("WARNING: No TOC found - hierarchy may be incomplete")]
    NoTocFound,

    #[error("WARNING: {pct:.0}% of pages show out-of-order reading - review recommended")]
    ColumnCrossoverSuspected { pct: f32 },

    #[error("WARNING: heading map has a gap at level {level} - review recommended")]
    HeadingLevelGap { level: u8 },

    #[error("WARNING: duplicate H1 candidates found - kept the first, demoted the rest")]
    DuplicateH1Candidates,

    #[error("WARNING: list-splitting declined for ambiguous line: {snippet:?}")]
    ListSplitDeclined { snippet: String },

    #[error("WARNING: {0}")]
    Other(String),
}

/// Validation failure surfaced by an [`crate::agent::AgentStep`] attempt.
///
/// Not fatal by itself: the core's retry/criticality policy in
/// [`crate::agent`] decides whether to retry, skip, or escalate to a fatal
/// [`ConvertError`].
#[derive(Debug, Clone, Error)]
#[error("agent step validation failed: {0}")]
pub struct ValidationError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    /// Error message text is contractually fixed for each failure mode;
    /// tests assert exact strings.
    #[test]
    fn error_strings_match_contract() {
        assert_eq!(
            ConvertError::PdfNotFound {
                path: "x.pdf".into()
            }
            .to_string(),
            "ERROR: Cannot open PDF - file not found or corrupted"
        );
        assert_eq!(
            ConvertError::ScannedPdfDetected {
                extractable_chars: 3
            }
            .to_string(),
            "ERROR: Scanned PDF detected - very little extractable text"
        );
        assert_eq!(
            StepWarning::NoTocFound.to_string(),
            "WARNING: No TOC found - hierarchy may be incomplete"
        );
    }

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(ConvertError::UserAborted.exit_code(), 1);
        assert_eq!(
            ConvertError::PdfNotFound { path: "".into() }.exit_code(),
            2
        );
        assert_eq!(
            ConvertError::ScannedPdfDetected {
                extractable_chars: 0
            }
            .exit_code(),
            3
        );
        assert_eq!(
            ConvertError::StateCorrupt {
                detail: "x".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            ConvertError::DependencyUnavailable {
                detail: "x".into()
            }
            .exit_code(),
            5
        );
    }
}
