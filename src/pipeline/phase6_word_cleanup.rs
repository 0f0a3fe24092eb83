//! Phase 6 — Word-Level Cleanup (marker-preserving).
//!
//! Output is `<name>-phase6.md`, the input Phase 8 reads — not Phase 4 —
//! because Phase 8 needs cleaned text with intact markers.
//!
//! List-splitting is the one rule the spec flags as a false-positive risk:
//! a line like `3.First item 4.Second item` should become two list items,
//! but an ordinary sentence containing "item 3." should not be split. The
//! conservative rule here only splits when a line matches `^\s*\d+\.\D`
//! **twice or more** — a single match is left alone and counted as a
//! declined split rather than silently reshaped.

use crate::error::ConvertError;
use crate::marker::{rewrite_marker_text, rewrite_outside_markers};
use crate::pipeline::{Phase, PhaseContext, PhaseOutcome, StepOutcome};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::Cell;
use std::fs;

pub struct Phase6;

impl Phase for Phase6 {
    fn number(&self) -> u8 {
        6
    }

    fn name(&self) -> &'static str {
        "word-cleanup"
    }

    fn run(&self, ctx: &PhaseContext, _from_step: Option<&str>) -> Result<PhaseOutcome, ConvertError> {
        let input = fs::read_to_string(ctx.phase_output(5))?;
        let (cleaned, splits) = clean_phase6(&input);
        let output_path = ctx.phase_output(6);
        fs::write(&output_path, cleaned)?;

        let mut step = StepOutcome::success("6.4", "split merged numbered list items");
        if splits > 0 {
            step.message = Some(format!("split {splits} merged list item run(s)"));
        }

        Ok(PhaseOutcome {
            steps: vec![
                StepOutcome::success("6.1", "normalize bullet glyphs"),
                StepOutcome::success("6.2", "fix missing inter-word spaces"),
                StepOutcome::success("6.3", "collapse intra-token whitespace"),
                step,
            ],
            output_file: Some(output_path),
        })
    }
}

/// Apply all Phase 6 rules in order; returns the cleaned text and a count
/// of list-item runs that were actually split (for the step diagnostic).
pub fn clean_phase6(input: &str) -> (String, usize) {
    let s = normalize_bullets(input);
    let s = fix_missing_inter_word_spaces(&s);
    let s = collapse_intra_token_whitespace(&s);
    split_merged_numbered_lists(&s)
}

// ── 6.1 Bullet glyph normalization ────────────────────────────────────────

fn normalize_bullets(input: &str) -> String {
    rewrite_marker_text(input, |s| {
        s.replace(['\u{2022}', '\u{25CF}', '\u{25E6}', '\u{2023}'], "-")
    })
}

// ── 6.2 Missing inter-word space (OCR join) ───────────────────────────────

static RE_CASE_JOIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());

fn fix_missing_inter_word_spaces(input: &str) -> String {
    rewrite_marker_text(input, |s| RE_CASE_JOIN.replace_all(s, "$1 $2").into_owned())
}

// ── 6.3 Collapse intra-token whitespace ───────────────────────────────────

static RE_MULTISPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

fn collapse_intra_token_whitespace(input: &str) -> String {
    rewrite_outside_markers(input, |s| RE_MULTISPACE.replace_all(s, " ").into_owned())
}

// ── 6.4 Split merged numbered list items (conservative) ───────────────────
//
// Phase 4 concatenates every marker on a page back-to-back before the
// `\n\n` page break, so a single "line" of this file's input can carry
// several markers in a row. Splitting on raw line text the way the other
// rules in this phase can't: a split point found naively at the whole-line
// level might land inside one marker's interior, tearing its `«sigID:`
// opener away from its `»` closer on the next line. Routed through
// `rewrite_outside_markers`/`rewrite_marker_text` like every other rule
// here, the split point is always resolved within a single run of
// in-marker or out-of-marker text, so the worst it can do is add a `\n`
// inside one marker's own text — never split the marker itself.

static RE_LIST_ITEM_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)(\d+)\.(\D)").unwrap());

/// Split merged numbered-list runs within a single in-marker or
/// out-of-marker text fragment, preserving line terminators byte-for-byte
/// wherever no split occurs.
fn split_text_run(input: &str) -> (String, usize) {
    let mut total_splits = 0;
    let mut out = String::with_capacity(input.len());
    for chunk in input.split_inclusive('\n') {
        let (content, terminator) = match chunk.strip_suffix('\n') {
            Some(c) => (c, "\n"),
            None => (chunk, ""),
        };
        let matches: Vec<_> = RE_LIST_ITEM_START.find_iter(content).collect();
        if matches.len() < 2 {
            out.push_str(chunk);
            continue;
        }
        total_splits += 1;
        let starts: Vec<usize> = matches
            .iter()
            .map(|m| m.start() + if content.as_bytes()[m.start()] == b' ' { 1 } else { 0 })
            .collect();
        let prefix = content[..starts[0]].trim();
        if !prefix.is_empty() {
            out.push_str(prefix);
            out.push(' ');
        }
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(content.len());
            if i > 0 {
                out.push('\n');
            }
            out.push_str(content[start..end].trim());
        }
        out.push_str(terminator);
    }
    (out, total_splits)
}

fn split_merged_numbered_lists(input: &str) -> (String, usize) {
    let splits = Cell::new(0usize);
    let out = rewrite_outside_markers(input, |s| {
        let (text, n) = split_text_run(s);
        splits.set(splits.get() + n);
        text
    });
    let out = rewrite_marker_text(&out, |s| {
        let (text, n) = split_text_run(s);
        splits.set(splits.get() + n);
        text
    });
    (out, splits.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bullet_glyphs_inside_marker() {
        let input = "«sig001:\u{2022} one\n\u{2022} two»";
        assert_eq!(normalize_bullets(input), "«sig001:- one\n- two»");
    }

    #[test]
    fn fixes_ocr_join_case_transition() {
        let input = "«sig001:helloWorld»";
        assert_eq!(fix_missing_inter_word_spaces(input), "«sig001:hello World»");
    }

    #[test]
    fn splits_line_with_two_or_more_merged_items() {
        let (out, splits) = split_merged_numbered_lists("3.First item 4.Second item");
        assert_eq!(splits, 1);
        assert_eq!(out, "3.First item\n4.Second item");
    }

    #[test]
    fn declines_split_on_single_numeric_period() {
        let (out, splits) = split_merged_numbered_lists("See item 3. It matters.");
        assert_eq!(splits, 0);
        assert_eq!(out, "See item 3. It matters.");
    }

    #[test]
    fn marker_count_preserved_through_pipeline() {
        let input = "«sig001:\u{2022} helloWorld»\n\n«sig002:more  text»";
        let (out, _) = clean_phase6(input);
        assert_eq!(crate::marker::marker_count(&out), crate::marker::marker_count(input));
    }

    #[test]
    fn list_split_inside_one_marker_never_breaks_its_delimiters() {
        // A single page's markers are concatenated back-to-back by Phase 4
        // with no line break between them, so a merged list can land inside
        // one marker's interior text rather than spanning a whole "line".
        let input = "«sig001:intro text» «sig002: 1.First item 2.Second item» «sig003:tail»";
        let (out, splits) = split_merged_numbered_lists(input);
        assert_eq!(splits, 1);
        assert_eq!(crate::marker::marker_count(&out), 3);
        let parsed = crate::marker::parse_markers(&out);
        assert_eq!(parsed[0].sig_id, "sig001");
        assert_eq!(parsed[1].sig_id, "sig002");
        assert!(parsed[1].text.contains("1.First item\n2.Second item"));
        assert_eq!(parsed[2].sig_id, "sig003");
    }

    #[test]
    fn list_split_across_adjacent_markers_is_left_alone() {
        // The merged items straddle two different marker runs (not one
        // interior) — declining to split here, rather than tearing a
        // marker's delimiters apart, is the conservative choice.
        let input = "«sig001:1.First item» «sig002:2.Second item»";
        let (out, splits) = split_merged_numbered_lists(input);
        assert_eq!(splits, 0);
        assert_eq!(out, input);
    }
}
