//! Persisted data types shared across the pipeline.
//!
//! Every type here round-trips through `serde_json` exactly as written to
//! disk under `<output-dir>/`. Keeping them in one module means a change to
//! the on-disk schema touches exactly one file, and `StateStore::validate`
//! can reason about all of them without reaching into phase internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Schema version written into `.state.json`. `StateStore::load` refuses any
/// version greater than this; lower versions are accepted read-only.
pub const SCHEMA_VERSION: &str = "1";

// ── ConversionState ─────────────────────────────────────────────────────────

/// Status of a conversion run, persisted in `.state.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Details of a terminal or recoverable error recorded against the state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub phase: u8,
    pub step: String,
    pub code: String,
    pub message: String,
    pub recoverable: bool,
    pub suggestion: Option<String>,
}

/// User/run-level configuration persisted alongside the state so a `resume`
/// sees exactly the settings the original `run` was invoked with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub diagnostics: bool,
    pub non_interactive: bool,
    pub callout_config_path: Option<PathBuf>,
    pub gm_keywords: Vec<String>,
}

/// The full persisted state of one conversion, written atomically to
/// `.state.json` after every completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionState {
    pub version: String,
    pub pdf_path: PathBuf,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_phase: u8,
    pub current_step: String,
    pub completed_phases: Vec<u8>,
    pub phase_results: BTreeMap<u8, PhaseResult>,
    pub status: RunStatus,
    pub error: Option<ErrorDetail>,
    pub config: RunConfig,
}

impl ConversionState {
    /// Construct a fresh state for a brand-new conversion.
    pub fn new(pdf_path: PathBuf, output_dir: PathBuf, config: RunConfig, now: DateTime<Utc>) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            pdf_path,
            output_dir,
            started_at: now,
            updated_at: now,
            current_phase: 0,
            current_step: "0.1".to_string(),
            completed_phases: Vec::new(),
            phase_results: BTreeMap::new(),
            status: RunStatus::InProgress,
            error: None,
            config,
        }
    }

    /// `true` iff `completed_phases` is sorted ascending and every value is
    /// strictly less than `current_phase`. One of the invariants `spec.md`
    /// requires hold whenever `status == InProgress`.
    pub fn completed_phases_invariant_holds(&self) -> bool {
        let sorted = self.completed_phases.windows(2).all(|w| w[0] < w[1]);
        let below_current = self.status != RunStatus::InProgress
            || self
                .completed_phases
                .iter()
                .all(|&p| p < self.current_phase);
        sorted && below_current
    }

    /// `true` iff `current_step` matches the `N.M` grammar required by `spec.md`.
    pub fn current_step_is_well_formed(&self) -> bool {
        step_id_is_well_formed(&self.current_step)
    }
}

/// Validate a step id like `"5.3"` against the `N.M` grammar (two
/// non-negative integers separated by a single dot, no surrounding
/// whitespace).
pub fn step_id_is_well_formed(step: &str) -> bool {
    let mut parts = step.split('.');
    let n = parts.next();
    let m = parts.next();
    let rest = parts.next();
    rest.is_none()
        && n.is_some_and(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        && m.is_some_and(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
}

// ── PhaseResult / StepResult ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Warning,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub description: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub output_file: Option<PathBuf>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_num: u8,
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepResult>,
    pub output_file: Option<PathBuf>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl PhaseResult {
    pub fn started(phase_num: u8, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            phase_num,
            name: name.into(),
            status: StepStatus::Success,
            started_at: now,
            completed_at: None,
            steps: Vec::new(),
            output_file: None,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Roll the phase status up to the worst status among its steps
    /// (Error > Warning > Success; Skipped never downgrades a phase).
    pub fn recompute_status(&mut self) {
        let mut worst = StepStatus::Success;
        for step in &self.steps {
            worst = match (worst, step.status) {
                (_, StepStatus::Error) | (StepStatus::Error, _) => StepStatus::Error,
                (_, StepStatus::Warning) | (StepStatus::Warning, _) => StepStatus::Warning,
                (w, _) => w,
            };
        }
        self.status = worst;
    }
}

// ── PDFMetadata ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfMetadata {
    pub file_size_bytes: u64,
    pub page_count: u32,
    pub has_toc: bool,
    pub toc_entries: u32,
    pub toc_max_depth: u32,
    pub image_count: u32,
    pub font_count: u32,
    pub extracted_at: DateTime<Utc>,

    pub title: Option<String>,
    pub author: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    #[serde(default)]
    pub copyright: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub modification_date: Option<DateTime<Utc>>,
}

// ── FontSignature ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    Normal,
    Italic,
    Oblique,
}

/// The 4-tuple that defines font-signature identity. Two spans share a
/// signature iff every field matches (the US3 correctness property).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FontKey {
    pub family: String,
    /// Size in points, stored as a fixed-point integer of hundredths of a
    /// point so the key can derive `Eq`/`Hash` (raw `f32` cannot). Display
    /// and JSON consumers see it as a float via `FontKey::size_pt`.
    pub size_centipoints: i32,
    pub weight: i32,
    pub style: FontStyle,
}

impl FontKey {
    pub fn new(family: impl Into<String>, size_pt: f32, weight: i32, style: FontStyle) -> Self {
        Self {
            family: family.into(),
            size_centipoints: (size_pt * 100.0).round() as i32,
            weight,
            style,
        }
    }

    pub fn size_pt(&self) -> f32 {
        self.size_centipoints as f32 / 100.0
    }
}

/// Final label assigned to a font signature. A tagged variant rather than a
/// loose string per the Design Notes: user overrides, inference, and
/// serialization all work against one closed (-ish) type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum FontLabel {
    H1,
    H2,
    H3,
    H4,
    Body,
    Code,
    Callout(String),
    Skip,
    Quote,
    QuoteAuthor,
}

impl FontLabel {
    pub fn heading_level(&self) -> Option<u8> {
        match self {
            FontLabel::H1 => Some(1),
            FontLabel::H2 => Some(2),
            FontLabel::H3 => Some(3),
            FontLabel::H4 => Some(4),
            _ => None,
        }
    }

    pub fn is_callout(&self) -> bool {
        matches!(self, FontLabel::Callout(_))
    }

    pub fn default_gm_callout() -> Self {
        FontLabel::Callout("callout_gm".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontSignature {
    pub id: String,
    pub family: String,
    pub size: f32,
    pub weight: i32,
    pub style: FontStyle,
    #[serde(default)]
    pub sample_texts: Vec<String>,
    pub suggested_level: Option<u8>,
    pub label: Option<FontLabel>,
    pub usage_count: u64,
    pub first_page: u32,
}

pub const MAX_SAMPLE_TEXTS: usize = 8;

// ── CalloutConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalloutRange {
    pub start_text: String,
    pub end_text: String,
    #[serde(default = "default_callout_label")]
    pub label: String,
}

fn default_callout_label() -> String {
    "callout_gm".to_string()
}

pub type CalloutConfig = Vec<CalloutRange>;

// ── ImageManifest ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifestEntry {
    pub page: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub filename: String,
    pub extension: String,
}

pub type ImageManifest = Vec<ImageManifestEntry>;

// ── TOC ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocEntry {
    pub level: u32,
    pub title: String,
    pub page: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_id_grammar() {
        assert!(step_id_is_well_formed("5.3"));
        assert!(step_id_is_well_formed("0.1"));
        assert!(!step_id_is_well_formed("5"));
        assert!(!step_id_is_well_formed("5."));
        assert!(!step_id_is_well_formed(".3"));
        assert!(!step_id_is_well_formed("5.3.1"));
        assert!(!step_id_is_well_formed("a.b"));
        assert!(!step_id_is_well_formed(" 5.3"));
    }

    #[test]
    fn font_key_distinguishes_weight_and_style() {
        let bold = FontKey::new("Times", 12.0, 700, FontStyle::Normal);
        let normal = FontKey::new("Times", 12.0, 400, FontStyle::Normal);
        let italic = FontKey::new("Times", 12.0, 400, FontStyle::Italic);
        assert_ne!(bold, normal);
        assert_ne!(normal, italic);
        assert_eq!(bold, FontKey::new("Times", 12.0, 700, FontStyle::Normal));
    }

    #[test]
    fn font_key_size_round_trips() {
        let key = FontKey::new("Arial", 10.5, 400, FontStyle::Normal);
        assert_eq!(key.size_pt(), 10.5);
    }

    #[test]
    fn completed_phases_invariant() {
        let mut state = ConversionState::new(
            PathBuf::from("/x.pdf"),
            PathBuf::from("/out"),
            RunConfig::default(),
            Utc::now(),
        );
        state.current_phase = 3;
        state.completed_phases = vec![0, 1, 2];
        assert!(state.completed_phases_invariant_holds());

        state.completed_phases = vec![0, 2, 1];
        assert!(!state.completed_phases_invariant_holds());

        state.completed_phases = vec![0, 1, 3];
        assert!(!state.completed_phases_invariant_holds());
    }
}
