//! Phase 0 — Pre-flight Analysis.
//!
//! Extracts metadata, counts images and text spans, detects the outline,
//! measures extractability, and classifies document complexity before any
//! destructive or expensive work begins. Step 0.6's confirmation is
//! delegated to [`crate::interaction::UserInteraction`]; declining aborts
//! with exit code 1.

use crate::error::ConvertError;
use crate::interaction::{Complexity as UiComplexity, PreflightDecision, PreflightReport};
use crate::model::PdfMetadata;
use crate::pdfsrc;
use crate::pipeline::{Phase, PhaseContext, PhaseOutcome, StepOutcome};
use chrono::{DateTime, Utc};
use std::fs;

pub struct Phase0;

/// Minimum extractable character count below which a PDF is classified as
/// scanned and pre-flight refuses to continue.
const SCANNED_PDF_THRESHOLD: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Complexity {
    Low,
    Moderate,
    High,
}

fn classify_complexity(family_count: usize, image_count: u32, has_tables: bool) -> Complexity {
    if family_count > 8 || image_count > 50 {
        Complexity::High
    } else if (4..=8).contains(&family_count) || (11..=50).contains(&image_count) || has_tables {
        Complexity::Moderate
    } else if family_count <= 3 && image_count <= 10 {
        Complexity::Low
    } else {
        Complexity::Moderate
    }
}

fn parse_pdf_date(raw: &Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw.as_ref()?;
    // PDF info-dictionary dates look like "D:20230615120000Z" or similar;
    // fall back to RFC3339 for producers that write ISO-8601 directly.
    let trimmed = raw.strip_prefix("D:").unwrap_or(raw);
    let digits: String = trimmed.chars().take(14).filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 14 {
        let fmt = format!(
            "{}-{}-{}T{}:{}:{}Z",
            &digits[0..4],
            &digits[4..6],
            &digits[6..8],
            &digits[8..10],
            &digits[10..12],
            &digits[12..14]
        );
        if let Ok(dt) = DateTime::parse_from_rfc3339(&fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl Phase for Phase0 {
    fn number(&self) -> u8 {
        0
    }

    fn name(&self) -> &'static str {
        "pre-flight"
    }

    fn run(&self, ctx: &PhaseContext, _from_step: Option<&str>) -> Result<PhaseOutcome, ConvertError> {
        let mut steps = Vec::new();

        // 0.1 extract metadata
        let raw_meta = pdfsrc::read_metadata(ctx.pdf_path)?;
        let file_size_bytes = fs::metadata(ctx.pdf_path)?.len();
        steps.push(StepOutcome::success("0.1", "extract metadata"));

        // 0.2 count images
        let images = pdfsrc::read_image_xrefs(ctx.pdf_path)?;
        steps.push(StepOutcome::success("0.2", "count images"));

        // 0.3 detect outline
        let toc = pdfsrc::read_outline(ctx.pdf_path)?;
        let has_toc = !toc.is_empty();
        let toc_max_depth = toc.iter().map(|e| e.level).max().unwrap_or(0);
        let mut outcome = StepOutcome::success("0.3", "detect outline");
        if !has_toc {
            outcome = outcome.warn(crate::error::StepWarning::NoTocFound);
        }
        steps.push(outcome);

        // 0.4 measure extractability
        let extractable_chars = pdfsrc::extractable_char_count(ctx.pdf_path)?;
        if extractable_chars < SCANNED_PDF_THRESHOLD {
            return Err(ConvertError::ScannedPdfDetected { extractable_chars });
        }
        steps.push(StepOutcome::success("0.4", "measure extractability"));

        // 0.5 compute complexity
        let spans = pdfsrc::read_text_spans(ctx.pdf_path)?;
        let family_count = spans
            .iter()
            .map(|s| s.family.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let complexity = classify_complexity(family_count, images.len() as u32, false);
        steps.push(StepOutcome::success("0.5", "compute complexity"));

        // 0.6 present report, await confirmation
        let ui_complexity = match complexity {
            Complexity::Low => UiComplexity::Low,
            Complexity::Moderate => UiComplexity::Moderate,
            Complexity::High => UiComplexity::High,
        };
        let report = PreflightReport {
            page_count: raw_meta.page_count,
            image_count: images.len() as u32,
            font_family_count: family_count,
            complexity: ui_complexity,
            phases_requiring_user_involvement: vec![0, 7],
        };
        let decision = if ctx.config.non_interactive {
            PreflightDecision::Proceed
        } else {
            ctx.interaction.confirm_preflight(&report)
        };
        if decision == PreflightDecision::Abort {
            return Err(ConvertError::UserAborted);
        }
        steps.push(StepOutcome::success("0.6", "present report and confirm"));

        // Default callout config creation.
        if ctx.config.callout_config_path.is_none() {
            crate::state::write_default_callout_config(ctx.output_dir)?;
        }

        let metadata = PdfMetadata {
            file_size_bytes,
            page_count: raw_meta.page_count,
            has_toc,
            toc_entries: toc.len() as u32,
            toc_max_depth,
            image_count: images.len() as u32,
            font_count: family_count as u32,
            extracted_at: Utc::now(),
            title: raw_meta.title,
            author: raw_meta.author,
            creator: raw_meta.creator,
            producer: raw_meta.producer,
            copyright: raw_meta.copyright.unwrap_or_default(),
            creation_date: parse_pdf_date(&raw_meta.creation_date),
            modification_date: parse_pdf_date(&raw_meta.modification_date),
        };

        let metadata_path = ctx.artifact("metadata.json");
        fs::write(&metadata_path, serde_json::to_string_pretty(&metadata).unwrap())?;

        Ok(PhaseOutcome {
            steps,
            output_file: Some(metadata_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_thresholds() {
        assert_eq!(classify_complexity(2, 5, false), Complexity::Low);
        assert_eq!(classify_complexity(5, 5, false), Complexity::Moderate);
        assert_eq!(classify_complexity(2, 20, false), Complexity::Moderate);
        assert_eq!(classify_complexity(2, 5, true), Complexity::Moderate);
        assert_eq!(classify_complexity(9, 5, false), Complexity::High);
        assert_eq!(classify_complexity(2, 60, false), Complexity::High);
    }

    #[test]
    fn parses_pdf_info_dictionary_date() {
        let parsed = parse_pdf_date(&Some("D:20230615120000Z".to_string()));
        assert!(parsed.is_some());
        assert_eq!(parsed.unwrap().to_rfc3339().starts_with("2023-06-15"), true);
    }

    #[test]
    fn malformed_date_degrades_to_none() {
        assert!(parse_pdf_date(&Some("not a date".to_string())).is_none());
        assert!(parse_pdf_date(&None).is_none());
    }
}
