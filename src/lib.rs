//! # rpgmd-convert
//!
//! Convert tabletop-RPG scenario PDFs into clean, hierarchical Markdown
//! through an eleven-phase, resumable pipeline. This crate implements the
//! first nine phases (0 through 8) — pre-flight analysis through hierarchy
//! application; phases 9 (markdown linting) and 10 (report writing) are
//! owned by an external collaborator and only stubbed here so
//! `--phase`/`status` can report them cleanly.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 0. Pre-flight     metadata, image/font counts, complexity, confirm
//!  ├─ 1. Images         extract embedded images to images/pageNNN_imgMM.ext
//!  ├─ 2. Strip images   write a compacted, text-only copy of the PDF
//!  ├─ 3. TOC & fonts    intern font signatures, match against the outline
//!  ├─ 4. Extract        emit marker-wrapped text, detect column crossover
//!  ├─ 5. Char cleanup   hyphenation, smart quotes, TOC leaders, …
//!  ├─ 6. Word cleanup   bullets, OCR joins, merged-list-item splitting
//!  ├─ 7. Structural     heading-map validation, callout detection, review
//!  └─ 8. Hierarchy      markers → headed Markdown, the primary deliverable
//! ```
//!
//! Every phase writes `<name>-phaseN.md` and folds its step outcomes into
//! [`ConversionState`], persisted atomically to `.state.json` after each
//! phase so a crashed or interrupted run can [`orchestrator::resume`]
//! exactly where it left off.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rpgmd_convert::{orchestrator, PipelineConfig};
//!
//! fn main() -> Result<(), rpgmd_convert::ConvertError> {
//!     let config = PipelineConfig::builder("./out").non_interactive(true).build()?;
//!     let state = orchestrator::run("adventure.pdf".as_ref(), config)?;
//!     println!("status: {:?}", state.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `pdf-convert` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `bundled` | on      | Embeds a pdfium binary via `pdfium-auto` instead of requiring a system install |
//!
//! Disable both when embedding only the library:
//! ```toml
//! rpgmd-convert = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod config;
pub mod error;
pub mod fontreg;
pub mod interaction;
pub mod marker;
pub mod model;
pub mod orchestrator;
pub mod pdfsrc;
pub mod pipeline;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{ConvertError, StepWarning, ValidationError};
pub use fontreg::FontRegistry;
pub use interaction::{
    Complexity, MappingReviewDecision, NonInteractive, PreflightDecision, PreflightReport,
    UserInteraction,
};
pub use marker::{parse_markers, Marker};
pub use model::{
    CalloutConfig, CalloutRange, ConversionState, FontKey, FontLabel, FontSignature, FontStyle,
    ImageManifest, ImageManifestEntry, PdfMetadata, PhaseResult, RunConfig, RunStatus, StepResult,
    StepStatus, TocEntry,
};
pub use orchestrator::{resume, run, run_from_step, run_phase, status, RunStatusReport};
pub use pipeline::{Phase, PhaseContext, PhaseOutcome};
