//! Phase 8 — Hierarchy Application.
//!
//! Consumes `<name>-phase6.md`, the finalized `font-family-mapping.json`,
//! `images/image-manifest.json`, and `metadata.json`, and rewrites every
//! marker into headed Markdown: headings, code, callout blockquotes,
//! quotes/attributions, and plain body text. Enforces the single-H1
//! invariant, restores escaped guillemets, inserts commented-out image
//! references, and prepends the copyright block. This is the primary
//! deliverable of the core — `<name>-phase8.md`.

use crate::error::ConvertError;
use crate::marker::{parse_markers, unescape_guillemets, Marker};
use crate::model::{FontLabel, FontSignature, ImageManifest, PdfMetadata};
use crate::pipeline::{Phase, PhaseContext, PhaseOutcome, StepOutcome};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;

pub struct Phase8;

impl Phase for Phase8 {
    fn number(&self) -> u8 {
        8
    }

    fn name(&self) -> &'static str {
        "hierarchy-application"
    }

    fn run(&self, ctx: &PhaseContext, _from_step: Option<&str>) -> Result<PhaseOutcome, ConvertError> {
        let mut steps = Vec::new();

        let input = fs::read_to_string(ctx.phase_output(6))?;

        let signatures: Vec<FontSignature> = fs::read_to_string(ctx.artifact("font-family-mapping.json"))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        let labels: HashMap<String, FontLabel> = signatures
            .into_iter()
            .filter_map(|s| s.label.map(|l| (s.id, l)))
            .collect();

        let manifest: ImageManifest = fs::read_to_string(ctx.artifact("images/image-manifest.json"))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        let metadata: Option<PdfMetadata> = fs::read_to_string(ctx.artifact("metadata.json"))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());

        // 1. Span splitter: pull embedded/inline heading markers onto their own line.
        let split = split_embedded_headings(&input, &labels);
        steps.push(StepOutcome::success("8.1", "split embedded heading markers onto their own line"));

        // 2. Marker-to-Markdown rewrite.
        let rendered = render_markers(&split, &labels, ctx.config.all_gm_keywords().as_slice());
        steps.push(StepOutcome::success("8.2", "rewrite markers to Markdown by label"));

        // 4. Image reference insertion (position keyed by page order within the
        // already-rendered body, before guillemet restoration so marker scanning
        // below still sees plain body text).
        let with_images = insert_image_references(&rendered, &manifest);
        steps.push(StepOutcome::success("8.4", "insert commented image references"));

        // 5. Restore escaped guillemets.
        let unescaped = unescape_guillemets(&with_images);
        steps.push(StepOutcome::success("8.5", "restore escaped guillemets"));

        // 6. Single-H1 enforcement + no-skip cascade.
        let (hierarchy_fixed, demoted) = enforce_single_h1(&unescaped);
        let mut h1_step = StepOutcome::success("8.6", "enforce single H1 and cascade heading levels");
        if demoted > 0 {
            h1_step.message = Some(format!("demoted {demoted} additional H1 candidate(s)"));
        }
        steps.push(h1_step);

        // 7. Escape raw HTML / Markdown-significant characters in body text.
        let escaped_html = escape_raw_html_in_body(&hierarchy_fixed);
        steps.push(StepOutcome::success("8.7", "escape raw HTML in body text"));

        // 8. Copyright block.
        let doc_stem = ctx.doc_stem;
        let copyright_block = render_copyright_block(metadata.as_ref(), doc_stem);
        let final_doc = format!("{copyright_block}\n{escaped_html}");
        steps.push(StepOutcome::success("8.8", "prepend copyright block"));

        let output_path = ctx.phase_output(8);
        fs::write(&output_path, final_doc)?;

        Ok(PhaseOutcome {
            steps,
            output_file: Some(output_path),
        })
    }
}

// ── 1. Span splitter ───────────────────────────────────────────────────────

/// A line is an "embedded heading" line when it contains a heading-labeled
/// marker that is not alone on its line (i.e. preceded or followed by other
/// text/markers). Splitting pulls the heading marker onto its own line so
/// step 2's per-line rewrite can treat it as a heading rather than inline
/// text.
fn split_embedded_headings(input: &str, labels: &HashMap<String, FontLabel>) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.split('\n') {
        let markers = parse_markers(line);
        let heading_positions: Vec<usize> = markers
            .iter()
            .enumerate()
            .filter(|(_, m)| labels.get(&m.sig_id).map(FontLabel::heading_level).is_some())
            .map(|(i, _)| i)
            .collect();

        if heading_positions.is_empty() || markers.len() == 1 {
            out.push_str(line);
            out.push('\n');
            continue;
        }

        // Re-split the line so each heading marker gets its own line, and
        // runs of non-heading markers between headings stay grouped.
        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();
        for marker in &markers {
            let is_heading = labels.get(&marker.sig_id).map(FontLabel::heading_level).is_some();
            if is_heading {
                if !current.trim().is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                pieces.push(marker.encode());
            } else {
                current.push_str(&marker.encode());
            }
        }
        if !current.trim().is_empty() {
            pieces.push(current);
        }
        for piece in pieces {
            out.push_str(&piece);
            out.push('\n');
        }
    }
    // Drop the trailing synthetic newline added by the final iteration.
    out.trim_end_matches('\n').to_string() + if input.ends_with('\n') { "\n" } else { "" }
}

// ── 2. Marker-to-Markdown rewrite ──────────────────────────────────────────

/// GM-note keyword patterns that gain a `> **GM Note:**` prefix when found
/// inside a rendered callout blockquote line.
fn prefix_gm_note_if_keyword(text: &str, keywords: &[&str]) -> String {
    for kw in keywords {
        if text.trim_start().starts_with(kw) {
            return format!("**GM Note:** {text}");
        }
    }
    text.to_string()
}

fn render_markers(input: &str, labels: &HashMap<String, FontLabel>, keywords: &[&str]) -> String {
    let mut out = String::with_capacity(input.len() + 256);
    let mut open_callout: Option<String> = None;

    for line in input.split('\n') {
        let markers = parse_markers(line);
        if markers.is_empty() {
            // Blank/non-marker lines continue an open callout verbatim.
            if open_callout.is_some() && !line.trim().is_empty() {
                out.push_str("> ");
                out.push_str(line);
            } else {
                out.push_str(line);
            }
            out.push('\n');
            continue;
        }

        // A line is rendered uniformly by its first marker's label — Phase 6
        // coalescing and the splitter above guarantee one semantic label per
        // line in practice.
        let label = markers.first().and_then(|m| labels.get(&m.sig_id));
        let text: String = markers.iter().map(|m| m.text.as_str()).collect();

        match label {
            Some(FontLabel::H1) => {
                open_callout = None;
                out.push_str(&format!("# {}\n", text.trim()));
            }
            Some(FontLabel::H2) => {
                open_callout = None;
                out.push_str(&format!("## {}\n", text.trim()));
            }
            Some(FontLabel::H3) => {
                open_callout = None;
                out.push_str(&format!("### {}\n", text.trim()));
            }
            Some(FontLabel::H4) => {
                open_callout = None;
                out.push_str(&format!("#### {}\n", text.trim()));
            }
            Some(FontLabel::Code) => {
                open_callout = None;
                if text.contains('\n') {
                    out.push_str("```\n");
                    out.push_str(&text);
                    out.push_str("\n```\n");
                } else {
                    out.push_str(&format!("`{text}`\n"));
                }
            }
            Some(FontLabel::Callout(name)) => {
                let is_new_block = open_callout.as_deref() != Some(name.as_str());
                open_callout = Some(name.clone());
                let body = prefix_gm_note_if_keyword(text.trim(), keywords);
                let _ = is_new_block;
                out.push_str(&format!("> {body}\n"));
            }
            Some(FontLabel::Quote) => {
                open_callout = None;
                out.push_str(&format!("> *{}*\n", text.trim()));
            }
            Some(FontLabel::QuoteAuthor) => {
                open_callout = None;
                out.push_str(&format!("> — {}\n", text.trim()));
            }
            Some(FontLabel::Skip) => {
                // Omit the text entirely; still breaks an open callout run.
                open_callout = None;
            }
            Some(FontLabel::Body) | None => {
                open_callout = None;
                out.push_str(&text);
                out.push('\n');
            }
        }
    }
    out
}

// ── 4. Image reference insertion ───────────────────────────────────────────

/// Insert a commented-out image reference immediately before the first
/// non-blank paragraph line whose position corresponds to the manifest
/// entry's page, ordered within a page by descending `y` (PDF's
/// bottom-left origin means higher `y` = higher on the page = earlier in
/// reading order). Approximate by design per the Open Question in `spec.md`
/// §9 — the merged Markdown carries no per-line page numbers, so this
/// distributes images evenly across the document by paragraph index.
fn insert_image_references(input: &str, manifest: &ImageManifest) -> String {
    if manifest.is_empty() {
        return input.to_string();
    }
    let mut by_page: HashMap<u32, Vec<&crate::model::ImageManifestEntry>> = HashMap::new();
    for entry in manifest {
        by_page.entry(entry.page).or_default().push(entry);
    }
    let mut pages: Vec<u32> = by_page.keys().copied().collect();
    pages.sort_unstable();
    for entries in by_page.values_mut() {
        entries.sort_by(|a, b| b.y.partial_cmp(&a.y).unwrap_or(std::cmp::Ordering::Equal));
    }

    let lines: Vec<&str> = input.split('\n').collect();
    let paragraph_starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(i, l)| !l.trim().is_empty() && (*i == 0 || lines[i - 1].trim().is_empty()))
        .map(|(i, _)| i)
        .collect();

    if paragraph_starts.is_empty() {
        let mut out = input.to_string();
        for page in &pages {
            for entry in &by_page[page] {
                out.push_str(&format!(
                    "\n<!-- ![image]({}) -->\n",
                    format!("images/{}", entry.filename)
                ));
            }
        }
        return out;
    }

    // Spread page buckets evenly across available paragraph anchors.
    let mut insertions: HashMap<usize, Vec<String>> = HashMap::new();
    for (i, page) in pages.iter().enumerate() {
        let anchor_idx = (i * paragraph_starts.len()) / pages.len().max(1);
        let anchor = paragraph_starts[anchor_idx.min(paragraph_starts.len() - 1)];
        for entry in &by_page[page] {
            insertions
                .entry(anchor)
                .or_default()
                .push(format!("<!-- ![image](images/{}) -->", entry.filename));
        }
    }

    let mut out = String::with_capacity(input.len() + 64 * manifest.len());
    for (i, line) in lines.iter().enumerate() {
        if let Some(comments) = insertions.get(&i) {
            for c in comments {
                out.push_str(c);
                out.push('\n');
            }
        }
        out.push_str(line);
        if i + 1 != lines.len() {
            out.push('\n');
        }
    }
    out
}

// ── 6. Single-H1 enforcement + no-skip cascade ─────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6}) (.*)$").unwrap());

/// Scan headings top-to-bottom. The first `#` line is kept as H1. Any
/// subsequent line that starts at `#` is demoted to `##`, and every
/// heading after an H1-demotion has its level cascaded down by one until a
/// new top-level section begins (i.e. until the next line that was
/// originally `#` — which itself gets demoted and resets the cascade).
/// No heading may skip a level relative to the running maximum its
/// ancestors established.
fn enforce_single_h1(input: &str) -> (String, u32) {
    let mut out_lines: Vec<String> = Vec::new();
    let mut seen_h1 = false;
    let mut demoted = 0u32;
    let mut cascade_offset: u8 = 0;
    let mut running_max: u8 = 0;
    let mut in_fence = false;

    for line in input.split('\n') {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out_lines.push(line.to_string());
            continue;
        }
        if in_fence {
            out_lines.push(line.to_string());
            continue;
        }

        if let Some(caps) = RE_HEADING.captures(line) {
            let orig_level = caps[1].len() as u8;
            let text = &caps[2];

            if orig_level == 1 {
                if !seen_h1 {
                    seen_h1 = true;
                    cascade_offset = 0;
                    running_max = 1;
                    out_lines.push(format!("# {text}"));
                    continue;
                } else {
                    demoted += 1;
                    cascade_offset = 1; // this and subsequent headings shift down one
                }
            }

            let shifted = (orig_level.max(2) + cascade_offset).min(6);
            // Enforce no-level-skip: never exceed running_max + 1.
            let level = shifted.min(running_max.saturating_add(1)).max(2);
            running_max = running_max.max(level);
            out_lines.push(format!("{} {text}", "#".repeat(level as usize)));
        } else {
            out_lines.push(line.to_string());
        }
    }

    (out_lines.join("\n"), demoted)
}

// ── 7. HTML/Markdown-sensitive body escaping ───────────────────────────────

static RE_RAW_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*[^>]*>").unwrap());

/// Wrap raw HTML-looking tags in backticks so they render as literal text
/// rather than being interpreted by a downstream Markdown renderer. Lines
/// that are already our own inserted `<!-- ... -->` image comments, code
/// fences, or blockquotes are left untouched.
fn escape_raw_html_in_body(input: &str) -> String {
    let mut in_fence = false;
    input
        .split('\n')
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence
                || line.trim_start().starts_with('>')
                || line.trim_start().starts_with("<!--")
                || line.trim_start().starts_with('#')
            {
                return line.to_string();
            }
            RE_RAW_TAG.replace_all(line, |caps: &regex::Captures| format!("`{}`", &caps[0])).into_owned()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── 8. Copyright block ──────────────────────────────────────────────────────

fn render_copyright_block(metadata: Option<&PdfMetadata>, source_filename: &str) -> String {
    let title = metadata
        .and_then(|m| m.title.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let author = metadata
        .and_then(|m| m.author.clone())
        .or_else(|| metadata.and_then(|m| m.producer.clone()))
        .unwrap_or_else(|| "Unknown".to_string());
    let copyright = metadata
        .map(|m| m.copyright.clone())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "See original publication".to_string());

    format!(
        "<!--\n\
         Title: {title}\n\
         Author/Publisher: {author}\n\
         Copyright: {copyright}\n\
         Source: {source_filename}.pdf\n\
         Converted: {converted_at}\n\
         Tool: rpgmd-convert\n\
         -->\n",
        converted_at = chrono::Utc::now().to_rfc3339(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageManifestEntry;

    fn labels_with(pairs: &[(&str, FontLabel)]) -> HashMap<String, FontLabel> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn renders_headings_body_and_code() {
        let labels = labels_with(&[
            ("sig001", FontLabel::H1),
            ("sig002", FontLabel::Body),
            ("sig003", FontLabel::Code),
        ]);
        let input = "«sig001:Title»\n«sig002:Some body text»\n«sig003:let x = 1;»";
        let out = render_markers(input, &labels, &[]);
        assert!(out.contains("# Title"));
        assert!(out.contains("Some body text"));
        assert!(out.contains("`let x = 1;`"));
    }

    #[test]
    fn callout_renders_as_blockquote_with_gm_note_prefix() {
        let labels = labels_with(&[("sig001", FontLabel::default_gm_callout())]);
        let input = "«sig001:GM Note: the trap resets»";
        let out = render_markers(input, &labels, &["GM Note:"]);
        assert!(out.contains("> **GM Note:** GM Note: the trap resets"));
    }

    #[test]
    fn skip_label_omits_text() {
        let labels = labels_with(&[("sig001", FontLabel::Skip)]);
        let input = "«sig001:page 42»";
        let out = render_markers(input, &labels, &[]);
        assert_eq!(out.trim(), "");
    }

    #[test]
    fn single_h1_enforced_and_subsequent_headings_demoted() {
        let input = "# First\n# Second\n## Third";
        let (out, demoted) = enforce_single_h1(input);
        let h1_count = out.lines().filter(|l| l.starts_with("# ")).count();
        assert_eq!(h1_count, 1);
        assert_eq!(demoted, 1);
        assert!(out.contains("## Second"));
    }

    #[test]
    fn no_heading_skips_a_level() {
        // Second H1 demotes to H2, so a following H4-in-source should cascade
        // to at most H3 relative to the new top level, not jump straight to H4.
        let input = "# Title\n# Chapter\n#### Deep Heading";
        let (out, _) = enforce_single_h1(input);
        let levels: Vec<usize> = out
            .lines()
            .filter_map(|l| {
                if l.starts_with('#') {
                    Some(l.chars().take_while(|&c| c == '#').count())
                } else {
                    None
                }
            })
            .collect();
        for window in levels.windows(2) {
            assert!(window[1] <= window[0] + 1, "heading level skip: {levels:?}");
        }
    }

    #[test]
    fn restores_escaped_guillemets() {
        let out = unescape_guillemets(r"quoting \«someone\» here");
        assert_eq!(out, "quoting «someone» here");
    }

    #[test]
    fn copyright_block_degrades_missing_fields() {
        let block = render_copyright_block(None, "adventure");
        assert!(block.contains("Title: Unknown"));
        assert!(block.contains("Copyright: See original publication"));
        assert!(block.contains("Source: adventure.pdf"));
    }

    #[test]
    fn image_reference_inserted_as_comment() {
        let manifest = vec![ImageManifestEntry {
            page: 1,
            x: 0.0,
            y: 100.0,
            width: 10.0,
            height: 10.0,
            filename: "page001_img01.png".to_string(),
            extension: "png".to_string(),
        }];
        let input = "Some paragraph text.\n\nAnother paragraph.";
        let out = insert_image_references(input, &manifest);
        assert!(out.contains("<!-- ![image](images/page001_img01.png) -->"));
    }

    #[test]
    fn splits_embedded_heading_onto_own_line() {
        let labels = labels_with(&[("sig001", FontLabel::Body), ("sig002", FontLabel::H2)]);
        let input = "«sig001:lead in »«sig002:Embedded Heading»";
        let out = split_embedded_headings(input, &labels);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("sig002"));
    }

    #[test]
    fn escapes_raw_html_tags_in_body_lines() {
        let out = escape_raw_html_in_body("plain text <div>weird</div> more");
        assert!(out.contains("`<div>`"));
        assert!(out.contains("`</div>`"));
    }
}
