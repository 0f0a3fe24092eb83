//! Font-signature marker codec.
//!
//! Phase 4 wraps every extracted text span in a marker — `«sigID:text»` —
//! so the span's font-signature identity survives three further text
//! rewrites (Phases 5, 6, 8) without carrying a parallel span tree through
//! file-based phase boundaries. Every cleanup pass in [`crate::pipeline`]
//! routes its transformation through [`rewrite_outside_markers`] rather
//! than operating on raw text directly, which is what makes marker
//! preservation a property of one function instead of a discipline every
//! call site has to remember.
//!
//! Grammar: a marker is exactly `«sigID:TEXT»` where `sigID` matches
//! `sig[a-z0-9]+` and `TEXT` contains no literal `»` unless escaped.
//! Pre-existing `«`/`»` in source text are escaped as `\«`/`\»` before
//! marker emission and restored after marker processing completes (Phase 8,
//! step 5).

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Strict marker regex, anchored exactly as specified: `«(sig[a-z0-9]+):([^»]+)»`.
static RE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"«(sig[a-z0-9]+):([^»]+)»").unwrap());

/// A single parsed marker occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub sig_id: String,
    pub text: String,
}

impl Marker {
    /// Render back to `«sigID:text»` wire form.
    pub fn encode(&self) -> String {
        format!("«{}:{}»", self.sig_id, self.text)
    }
}

/// Escape any literal `«`/`»` in source text so they cannot be confused with
/// marker delimiters once markers are introduced.
pub fn escape_guillemets(input: &str) -> String {
    input.replace('«', r"\«").replace('»', r"\»")
}

/// Reverse [`escape_guillemets`]. Applied once, in Phase 8 step 5, after all
/// marker processing is complete — never at an intermediate phase, or a
/// literal `\«` in source text would be restored before cleanup rules have
/// finished treating real markers.
pub fn unescape_guillemets(input: &str) -> String {
    input.replace(r"\»", "»").replace(r"\«", "«")
}

/// Wrap `text` in a marker for the given signature ID, escaping any
/// pre-existing guillemets in `text` first.
pub fn make_marker(sig_id: &str, text: &str) -> String {
    Marker {
        sig_id: sig_id.to_string(),
        text: escape_guillemets(text),
    }
    .encode()
}

/// Parse every marker occurrence in `input`, in order.
pub fn parse_markers(input: &str) -> Vec<Marker> {
    RE_MARKER
        .captures_iter(input)
        .map(|caps| Marker {
            sig_id: caps[1].to_string(),
            text: caps[2].to_string(),
        })
        .collect()
}

/// Count of marker occurrences, used by tests asserting that a cleanup pass
/// changed text content without changing marker count.
pub fn marker_count(input: &str) -> usize {
    RE_MARKER.find_iter(input).count()
}

/// Apply `f` to every run of text *outside* a marker, leaving marker
/// delimiters, signature IDs, and marker interiors completely untouched.
///
/// This is the single seam every Phase 5/6 cleanup rule must go through: no
/// rule may split a marker's interior, delete its delimiters, modify its
/// signature ID, or introduce an unescaped `«`/`»` inside marker text. By
/// centralizing the split/transform/rejoin here, every rule gets that
/// guarantee for free instead of re-deriving it.
pub fn rewrite_outside_markers(input: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_end = 0;
    for caps in RE_MARKER.captures_iter(input) {
        let m = caps.get(0).unwrap();
        out.push_str(&f(&input[last_end..m.start()]));
        out.push_str(m.as_str());
        last_end = m.end();
    }
    out.push_str(&f(&input[last_end..]));
    out
}

/// Apply `f` to the text *inside* every marker (not the out-of-marker
/// runs), leaving the `«sigID:` prefix and trailing `»` untouched. Used by
/// rules that need to normalize marker text itself (e.g. internal
/// whitespace collapse) without ever touching the delimiter or ID.
pub fn rewrite_marker_text(input: &str, f: impl Fn(&str) -> String) -> String {
    RE_MARKER
        .replace_all(input, |caps: &Captures| {
            format!("«{}:{}»", &caps[1], f(&caps[2]))
        })
        .into_owned()
}

/// Coalesce a run of consecutive same-signature markers (already rendered
/// as wire text) into a single marker whose text is the concatenation, per
/// the Phase 4 coalescing rule. Adjacent non-marker text between two
/// same-signature markers is left untouched and breaks the run.
pub fn coalesce_consecutive(markers: &[Marker]) -> Vec<Marker> {
    let mut out: Vec<Marker> = Vec::with_capacity(markers.len());
    for m in markers {
        match out.last_mut() {
            Some(prev) if prev.sig_id == m.sig_id => {
                prev.text.push_str(&m.text);
            }
            _ => out.push(m.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_marker() {
        let wire = make_marker("sig001", "Hello world");
        let parsed = parse_markers(&wire);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].sig_id, "sig001");
        assert_eq!(parsed[0].text, "Hello world");
    }

    #[test]
    fn escapes_literal_guillemets_before_wrapping() {
        let wire = make_marker("sig001", "quoting «someone»");
        assert_eq!(wire, r"«sig001:quoting \«someone\»»");
    }

    #[test]
    fn rewrite_outside_markers_leaves_marker_interior_untouched() {
        let input = "before «sig001:keep me» after";
        let out = rewrite_outside_markers(input, |s| s.to_uppercase());
        assert_eq!(out, "BEFORE «sig001:keep me» AFTER");
    }

    #[test]
    fn rewrite_marker_text_only_touches_interior() {
        let input = "x «sig002:  extra   space  » y";
        let out = rewrite_marker_text(input, |s| s.trim().to_string());
        assert_eq!(out, "x «sig002:extra   space» y");
    }

    #[test]
    fn coalesces_consecutive_same_signature() {
        let markers = vec![
            Marker {
                sig_id: "sig001".into(),
                text: "Hello ".into(),
            },
            Marker {
                sig_id: "sig001".into(),
                text: "world".into(),
            },
            Marker {
                sig_id: "sig002".into(),
                text: "!".into(),
            },
        ];
        let coalesced = coalesce_consecutive(&markers);
        assert_eq!(coalesced.len(), 2);
        assert_eq!(coalesced[0].text, "Hello world");
    }

    #[test]
    fn marker_count_ignores_non_marker_guillemets() {
        let input = r"literal \«not a marker\» but «sig003:this is»";
        assert_eq!(marker_count(input), 1);
    }
}
