//! Phase 3 — TOC & Font Extraction.
//!
//! Reads the embedded outline (if any) into `toc-extracted.txt`, traverses
//! every text span to intern font signatures into the registry, assigns
//! the document's single H1, matches TOC entries against signatures with
//! the level 1 → H2 offset that preserves the single-H1 invariant, and
//! fills in everything the TOC didn't cover with the fallback heuristics
//! in [`crate::fontreg::FontRegistry::infer_fallback_labels`].

use crate::error::{ConvertError, StepWarning};
use crate::fontreg::FontRegistry;
use crate::model::{FontKey, FontLabel, TocEntry};
use crate::pdfsrc::{self, TextSpan};
use crate::pipeline::{Phase, PhaseContext, PhaseOutcome, StepOutcome};
use std::fs;

pub struct Phase3;

/// Merge adjacent spans sharing a signature key before TOC-title matching,
/// per the multi-span matching rule.
fn merge_adjacent_same_signature(spans: &[TextSpan]) -> Vec<(FontKey, String, u32)> {
    let mut merged: Vec<(FontKey, String, u32)> = Vec::new();
    for span in spans {
        let key = FontKey::new(span.family.clone(), span.size_pt, span.weight, span.style);
        match merged.last_mut() {
            Some((last_key, text, _)) if *last_key == key => {
                text.push_str(&span.text);
            }
            _ => merged.push((key, span.text.clone(), span.page)),
        }
    }
    merged
}

/// Choose the document's single H1 span: metadata title → cover-page
/// largest-font span → filename fallback. Returns the signature key to
/// label H1, if a textual match was found on the page.
fn choose_h1_key(spans: &[TextSpan], title: Option<&str>) -> Option<FontKey> {
    if let Some(title) = title {
        if let Some(span) = spans.iter().find(|s| s.text.contains(title) && !title.is_empty()) {
            return Some(FontKey::new(span.family.clone(), span.size_pt, span.weight, span.style));
        }
    }
    // Cover-page (page 1) largest-font span.
    spans
        .iter()
        .filter(|s| s.page == 1)
        .max_by(|a, b| a.size_pt.partial_cmp(&b.size_pt).unwrap_or(std::cmp::Ordering::Equal))
        .map(|s| FontKey::new(s.family.clone(), s.size_pt, s.weight, s.style))
}

impl Phase for Phase3 {
    fn number(&self) -> u8 {
        3
    }

    fn name(&self) -> &'static str {
        "toc-and-fonts"
    }

    fn run(&self, ctx: &PhaseContext, _from_step: Option<&str>) -> Result<PhaseOutcome, ConvertError> {
        let mut steps = Vec::new();

        // 3.1 Read embedded outline.
        let toc: Vec<TocEntry> = pdfsrc::read_outline(ctx.pdf_path)?;
        let toc_path = ctx.artifact("toc-extracted.txt");
        if toc.is_empty() {
            steps.push(StepOutcome::success("3.1", "read embedded outline").warn(StepWarning::NoTocFound));
        } else {
            let body: String = toc
                .iter()
                .map(|e| format!("{}|{}|{}\n", e.level, e.title, e.page))
                .collect();
            fs::write(&toc_path, body)?;
            steps.push(StepOutcome::success("3.1", "read embedded outline").with_output(toc_path.clone()));
        }

        // 3.2 Traverse spans, intern signatures.
        let spans = pdfsrc::read_text_spans(ctx.pdf_path)?;
        let mut registry = FontRegistry::new();
        for span in &spans {
            let key = FontKey::new(span.family.clone(), span.size_pt, span.weight, span.style);
            let id = registry.intern(key, span.page);
            registry.record_sample(&id, &span.text);
        }
        steps.push(StepOutcome::success("3.2", "intern font signatures"));

        // 3.3 Assign the single H1.
        let metadata_path = ctx.artifact("metadata.json");
        let title: Option<String> = fs::read_to_string(&metadata_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<crate::model::PdfMetadata>(&raw).ok())
            .and_then(|m| m.title);
        if let Some(h1_key) = choose_h1_key(&spans, title.as_deref()) {
            if let Some(id) = registry.id_for(&h1_key).map(str::to_string) {
                if let Some(sig) = registry.get_mut(&id) {
                    sig.label = Some(FontLabel::H1);
                    sig.suggested_level = Some(1);
                }
            }
        }
        steps.push(StepOutcome::success("3.3", "assign document H1"));

        // 3.4 Match TOC entries to signatures with the level-offset rule.
        let merged = merge_adjacent_same_signature(&spans);
        for entry in &toc {
            if let Some((key, _, _)) = merged
                .iter()
                .find(|(_, text, page)| text.contains(entry.title.trim()) && *page <= entry.page)
            {
                if let Some(id) = registry.id_for(key).map(str::to_string) {
                    if let Some(sig) = registry.get_mut(&id) {
                        if sig.label.is_none() || sig.label != Some(FontLabel::H1) {
                            let level = (entry.level + 1).min(4) as u8;
                            sig.label = Some(match level {
                                2 => FontLabel::H2,
                                3 => FontLabel::H3,
                                _ => FontLabel::H4,
                            });
                            sig.suggested_level = Some(level);
                        }
                    }
                }
            }
        }
        steps.push(StepOutcome::success("3.4", "match TOC entries to signatures"));

        // 3.5 Fallback heuristics for everything TOC didn't cover.
        registry.infer_fallback_labels();
        steps.push(StepOutcome::success("3.5", "apply fallback label heuristics"));

        let mapping_path = ctx.artifact("font-family-mapping.json");
        fs::write(
            &mapping_path,
            serde_json::to_string_pretty(&registry.to_json()).unwrap(),
        )?;

        Ok(PhaseOutcome {
            steps,
            output_file: Some(mapping_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FontStyle;

    fn span(page: u32, text: &str, family: &str, size: f32, weight: i32) -> TextSpan {
        TextSpan {
            page,
            text: text.to_string(),
            x: 0.0,
            y: 0.0,
            family: family.to_string(),
            size_pt: size,
            weight,
            style: FontStyle::Normal,
        }
    }

    #[test]
    fn merges_adjacent_same_signature_spans() {
        let spans = vec![
            span(1, "Hello ", "Times", 12.0, 400),
            span(1, "world", "Times", 12.0, 400),
            span(1, "!", "Times", 18.0, 700),
        ];
        let merged = merge_adjacent_same_signature(&spans);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].1, "Hello world");
    }

    #[test]
    fn chooses_title_span_when_metadata_title_present() {
        let spans = vec![
            span(1, "Some Document Title", "Times", 24.0, 700),
            span(1, "body text", "Times", 10.0, 400),
        ];
        let key = choose_h1_key(&spans, Some("Some Document Title")).unwrap();
        assert_eq!(key.family, "Times");
        assert_eq!(key.size_pt(), 24.0);
    }

    #[test]
    fn falls_back_to_largest_cover_page_span_without_title() {
        let spans = vec![
            span(1, "Big Heading", "Times", 30.0, 700),
            span(2, "Even Bigger But Page Two", "Times", 40.0, 700),
        ];
        let key = choose_h1_key(&spans, None).unwrap();
        assert_eq!(key.size_pt(), 30.0);
    }
}
