//! Phase 7 — Structural Detection.
//!
//! Validates the Phase 3 heading map, detects secondary ALL-CAPS/Title-Case
//! heading signals, runs keyword- and config-range-based callout
//! detection, and writes every finding back into `font-family-mapping.json`
//! before step 7.10's review (delegated to
//! [`crate::interaction::UserInteraction`]; non-interactive mode accepts
//! every inferred label).
//!
//! Callout detection is deliberately keyword/text-boundary based, not
//! font-based: publishers style callouts inconsistently, so relying on
//! font signature alone would miss most of them.

use crate::error::ConvertError;
use crate::interaction::MappingReviewDecision;
use crate::marker::parse_markers;
use crate::model::{CalloutConfig, CalloutRange, FontLabel, FontSignature};
use crate::pipeline::{Phase, PhaseContext, PhaseOutcome, StepOutcome};
use std::collections::HashMap;
use std::fs;

pub struct Phase7;

/// A keyword trigger and the label it opens, for built-in (non-config)
/// callout detection.
fn builtin_keyword_label(keyword: &str) -> &'static str {
    if keyword.eq_ignore_ascii_case("Read Aloud:") {
        "callout_read_aloud"
    } else {
        "callout_gm"
    }
}

fn is_all_caps(text: &str) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
}

/// Scan the phase-6 marker stream for callout boundaries, returning a map
/// from signature ID to the callout label its spans fell under.
fn detect_callouts(
    markers_text: &str,
    config: &[CalloutRange],
    keywords: &[&str],
) -> HashMap<String, String> {
    let markers = parse_markers(markers_text);
    let mut labels: HashMap<String, String> = HashMap::new();
    let mut active_label: Option<String> = None;
    let mut active_end_text: Option<String> = None;

    for marker in &markers {
        if let Some(end_text) = &active_end_text {
            if marker.text.contains(end_text.as_str()) {
                if let Some(label) = &active_label {
                    labels.insert(marker.sig_id.clone(), label.clone());
                }
                active_label = None;
                active_end_text = None;
                continue;
            }
        }

        if active_label.is_none() {
            if let Some(range) = config
                .iter()
                .find(|r| marker.text.contains(r.start_text.as_str()))
            {
                active_label = Some(range.label.clone());
                active_end_text = Some(range.end_text.clone());
            } else if let Some(kw) = keywords.iter().find(|kw| marker.text.contains(*kw)) {
                active_label = Some(builtin_keyword_label(kw).to_string());
                active_end_text = None;
            }
        }

        if let Some(label) = &active_label {
            labels.insert(marker.sig_id.clone(), label.clone());
        }
    }

    labels
}

/// Flag duplicate H1 assignments and gaps in the H1..H4 level sequence,
/// without halting — these surface as warnings for later review.
fn validate_heading_map(signatures: &[FontSignature]) -> Vec<String> {
    let mut findings = Vec::new();
    let h1_count = signatures
        .iter()
        .filter(|s| s.label == Some(FontLabel::H1))
        .count();
    if h1_count > 1 {
        findings.push(format!("{h1_count} signatures labeled H1 (expected exactly one)"));
    }
    let levels_present: std::collections::HashSet<u8> = signatures
        .iter()
        .filter_map(|s| s.label.as_ref().and_then(FontLabel::heading_level))
        .collect();
    let max_level = levels_present.iter().copied().max().unwrap_or(0);
    for level in 1..max_level {
        if !levels_present.contains(&level) {
            findings.push(format!("heading level {level} is unused but level {max_level} is present"));
        }
    }
    findings
}

impl Phase for Phase7 {
    fn number(&self) -> u8 {
        7
    }

    fn name(&self) -> &'static str {
        "structural-detection"
    }

    fn run(&self, ctx: &PhaseContext, _from_step: Option<&str>) -> Result<PhaseOutcome, ConvertError> {
        let mut steps = Vec::new();

        let mapping_path = ctx.artifact("font-family-mapping.json");
        let mut signatures: Vec<FontSignature> = fs::read_to_string(&mapping_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        let findings = validate_heading_map(&signatures);
        let mut step1 = StepOutcome::success("7.1", "validate heading map");
        if !findings.is_empty() {
            step1.message = Some(findings.join("; "));
        }
        steps.push(step1);

        // 7.2 ALL CAPS / Title Case secondary signal: bump an unlabeled-heading
        // body signature whose samples are consistently ALL CAPS to H4.
        for sig in &mut signatures {
            if sig.label == Some(FontLabel::Body)
                && sig.sample_texts.iter().any(|t| is_all_caps(t))
            {
                sig.label = Some(FontLabel::H4);
            }
        }
        steps.push(StepOutcome::success("7.2", "detect ALL CAPS / Title Case secondary signals"));

        // 7.3 Keyword/config-range callout detection.
        let phase6_text = fs::read_to_string(ctx.phase_output(6))?;
        let callout_config: CalloutConfig = ctx
            .config
            .callout_config_path
            .as_ref()
            .and_then(|p| fs::read_to_string(p).ok())
            .or_else(|| fs::read_to_string(ctx.artifact("callout_config.json")).ok())
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        let keywords = ctx.config.all_gm_keywords();
        let callout_labels = detect_callouts(&phase6_text, &callout_config, &keywords);
        for sig in &mut signatures {
            if let Some(label) = callout_labels.get(&sig.id) {
                sig.label = Some(FontLabel::Callout(label.clone()));
            }
        }
        steps.push(StepOutcome::success("7.3", "keyword-based callout detection"));

        // 7.4 Inline/embedded heading detection is performed by Phase 8's
        // span splitter directly against the finalized mapping; nothing to
        // precompute here beyond the labels above.
        steps.push(StepOutcome::success("7.4", "mark inline headings for Phase 8 splitter"));

        fs::write(&mapping_path, serde_json::to_string_pretty(&signatures).unwrap())?;
        steps.push(StepOutcome::success("7.5", "write detection findings back to mapping"));

        // 7.10 Review (delegated; non-interactive accepts inferred labels).
        let decision = ctx.interaction.review_font_mapping(&signatures);
        if let MappingReviewDecision::Overrides(overrides) = decision {
            for sig in &mut signatures {
                if let Some(label) = overrides.get(&sig.id) {
                    sig.label = Some(label.clone());
                }
            }
            fs::write(&mapping_path, serde_json::to_string_pretty(&signatures).unwrap())?;
        }
        steps.push(StepOutcome::success("7.10", "present mapping for user review"));

        Ok(PhaseOutcome {
            steps,
            output_file: Some(mapping_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CalloutRange;

    #[test]
    fn detects_builtin_gm_note_keyword() {
        let text = "«sig001:GM Note: the trap resets» «sig002:normal body text»";
        let labels = detect_callouts(text, &[], &["Keeper's Note:", "GM Note:", "Read Aloud:"]);
        assert_eq!(labels.get("sig001"), Some(&"callout_gm".to_string()));
    }

    #[test]
    fn config_range_closes_on_end_text() {
        let config = vec![CalloutRange {
            start_text: "Keeper's Note:".to_string(),
            end_text: "End of Note".to_string(),
            label: "callout_gm".to_string(),
        }];
        let text = "«sig001:Keeper's Note: beware» «sig002:still inside» «sig003:End of Note here» «sig004:outside now»";
        let labels = detect_callouts(text, &config, &[]);
        assert_eq!(labels.get("sig001"), Some(&"callout_gm".to_string()));
        assert_eq!(labels.get("sig002"), Some(&"callout_gm".to_string()));
        assert_eq!(labels.get("sig003"), Some(&"callout_gm".to_string()));
        assert_eq!(labels.get("sig004"), None);
    }

    #[test]
    fn flags_duplicate_h1_and_level_gap() {
        let sigs = vec![
            FontSignature {
                id: "sig001".into(),
                family: "A".into(),
                size: 24.0,
                weight: 700,
                style: crate::model::FontStyle::Normal,
                sample_texts: vec![],
                suggested_level: Some(1),
                label: Some(FontLabel::H1),
                usage_count: 1,
                first_page: 1,
            },
            FontSignature {
                id: "sig002".into(),
                family: "A".into(),
                size: 20.0,
                weight: 700,
                style: crate::model::FontStyle::Normal,
                sample_texts: vec![],
                suggested_level: Some(1),
                label: Some(FontLabel::H1),
                usage_count: 1,
                first_page: 1,
            },
            FontSignature {
                id: "sig003".into(),
                family: "A".into(),
                size: 14.0,
                weight: 400,
                style: crate::model::FontStyle::Normal,
                sample_texts: vec![],
                suggested_level: Some(4),
                label: Some(FontLabel::H4),
                usage_count: 1,
                first_page: 1,
            },
        ];
        let findings = validate_heading_map(&sigs);
        assert!(findings.iter().any(|f| f.contains("H1")));
        assert!(findings.iter().any(|f| f.contains("level 2")));
    }
}
