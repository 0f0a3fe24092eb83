//! Font Signature Registry.
//!
//! Assigns stable, sequential IDs (`sig001`, `sig002`, …) to distinct
//! `(family, size, weight, style)` tuples encountered while traversing the
//! document in Phase 3, holds bounded sample text per signature, and drives
//! label inference. Persisted verbatim as `font-family-mapping.json`.
//!
//! ID assignment is deterministic by construction: IDs are handed out in
//! first-seen order during a single linear traversal, so re-running Phase 3
//! on the same input reproduces the same `FontKey → id` assignment every
//! time (the stable-signature-IDs property).

use crate::model::{FontKey, FontLabel, FontSignature, MAX_SAMPLE_TEXTS};
use std::collections::HashMap;

/// Holds every interned signature for one conversion, plus the lookup table
/// from `(family, size, weight, style)` back to a signature ID.
#[derive(Debug, Clone, Default)]
pub struct FontRegistry {
    order: Vec<FontKey>,
    ids: HashMap<FontKey, String>,
    signatures: HashMap<String, FontSignature>,
}

impl FontRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: interning the same tuple twice returns the same ID.
    /// A new tuple gets the next sequential ID, `sig001`-style.
    pub fn intern(&mut self, key: FontKey, first_page: u32) -> String {
        if let Some(id) = self.ids.get(&key) {
            return id.clone();
        }
        let id = format!("sig{:03}", self.order.len() + 1);
        self.order.push(key.clone());
        self.ids.insert(key.clone(), id.clone());
        self.signatures.insert(
            id.clone(),
            FontSignature {
                id: id.clone(),
                family: key.family,
                size: key.size_pt(),
                weight: key.weight,
                style: key.style,
                sample_texts: Vec::new(),
                suggested_level: None,
                label: None,
                usage_count: 0,
                first_page,
            },
        );
        id
    }

    /// Look up the ID already assigned to a tuple, without interning.
    pub fn id_for(&self, key: &FontKey) -> Option<&str> {
        self.ids.get(key).map(String::as_str)
    }

    /// Append a sample line to a signature's bounded sample pool and bump
    /// its usage count. Samples beyond [`MAX_SAMPLE_TEXTS`] are dropped,
    /// not rotated — the first `MAX_SAMPLE_TEXTS` occurrences are the most
    /// representative of how the signature is typically used.
    pub fn record_sample(&mut self, sig_id: &str, text: &str) {
        if let Some(sig) = self.signatures.get_mut(sig_id) {
            sig.usage_count += 1;
            if sig.sample_texts.len() < MAX_SAMPLE_TEXTS && !text.trim().is_empty() {
                sig.sample_texts.push(text.trim().to_string());
            }
        }
    }

    pub fn get(&self, sig_id: &str) -> Option<&FontSignature> {
        self.signatures.get(sig_id)
    }

    pub fn get_mut(&mut self, sig_id: &str) -> Option<&mut FontSignature> {
        self.signatures.get_mut(sig_id)
    }

    /// All signatures, in first-seen (assignment) order.
    pub fn iter(&self) -> impl Iterator<Item = &FontSignature> {
        self.order
            .iter()
            .filter_map(move |key| self.ids.get(key).and_then(|id| self.signatures.get(id)))
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Distinct base font family count, ignoring weight/style — the
    /// coarser counting rule Phase 0 complexity estimation uses, as
    /// opposed to Phase 3's per-style signature identity.
    pub fn distinct_families(&self) -> usize {
        self.order
            .iter()
            .map(|k| k.family.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    /// Phase 3's fallback label inference: applied to every signature that
    /// a TOC match did not already label. Exactly one H1 is guaranteed
    /// by the caller picking the title span *before* calling this (its
    /// signature is pre-labeled and skipped here).
    ///
    /// Rules, in order:
    /// - Largest non-title font → H2; next largest → H3.
    /// - Most frequent signature → body.
    /// - Monospace family name → code.
    /// - ALL CAPS sample text and size above body → heading, by relative size.
    /// - Smallest/rarest fonts (<8pt) → skip.
    pub fn infer_fallback_labels(&mut self) {
        let already_labeled: std::collections::HashSet<String> = self
            .iter()
            .filter(|s| s.label.is_some())
            .map(|s| s.id.clone())
            .collect();

        let mut candidates: Vec<(String, f32, u64)> = self
            .iter()
            .filter(|s| !already_labeled.contains(&s.id))
            .map(|s| (s.id.clone(), s.size, s.usage_count))
            .collect();

        // Largest non-title font → H2, next → H3.
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let mut heading_rank = 0u8;
        let mut sized_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (id, size, _) in &candidates {
            if *size < 8.0 {
                continue;
            }
            if heading_rank < 2 {
                heading_rank += 1;
                let level = heading_rank + 1; // H2, H3
                if let Some(sig) = self.signatures.get_mut(id) {
                    sig.label = Some(match level {
                        2 => FontLabel::H2,
                        _ => FontLabel::H3,
                    });
                    sig.suggested_level = Some(level);
                }
                sized_ids.insert(id.clone());
            }
        }

        // Most frequent remaining signature → body.
        if let Some((body_id, _, _)) = candidates
            .iter()
            .filter(|(id, _, _)| !sized_ids.contains(id))
            .max_by_key(|(_, _, count)| *count)
            .cloned()
        {
            if let Some(sig) = self.signatures.get_mut(&body_id) {
                sig.label = Some(FontLabel::Body);
            }
            sized_ids.insert(body_id);
        }

        for (id, size, _) in &candidates {
            if sized_ids.contains(id) {
                continue;
            }
            let sig = self.signatures.get(id).cloned().unwrap();
            let family_lower = sig.family.to_lowercase();
            let is_monospace = ["mono", "courier", "consolas", "code"]
                .iter()
                .any(|m| family_lower.contains(m));
            let all_caps = sig
                .sample_texts
                .iter()
                .any(|t| !t.is_empty() && t.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase()));

            let label = if is_monospace {
                FontLabel::Code
            } else if *size < 8.0 {
                FontLabel::Skip
            } else if all_caps {
                FontLabel::H4
            } else {
                FontLabel::Body
            };
            if let Some(sig) = self.signatures.get_mut(id) {
                sig.label = Some(label);
            }
        }
    }

    /// Replace labels wholesale per an external reviewer's decision (Phase
    /// 7 step 7.10). Unknown signature IDs in the map are ignored rather
    /// than erroring — a stale override from a prior run should not halt
    /// the pipeline.
    pub fn apply_user_overrides(&mut self, overrides: &HashMap<String, FontLabel>) {
        for (id, label) in overrides {
            if let Some(sig) = self.signatures.get_mut(id) {
                sig.label = Some(label.clone());
            }
        }
    }

    pub fn to_json(&self) -> Vec<FontSignature> {
        self.iter().cloned().collect()
    }

    /// Rebuild a registry from persisted signatures, preserving first-seen
    /// order and re-deriving the `(family,size,weight,style) → id` index so
    /// `intern` stays idempotent across a resumed run.
    pub fn from_json(signatures: Vec<FontSignature>) -> Self {
        let mut reg = FontRegistry::new();
        for sig in signatures {
            let key = FontKey::new(sig.family.clone(), sig.size, sig.weight, sig.style);
            reg.order.push(key.clone());
            reg.ids.insert(key, sig.id.clone());
            reg.signatures.insert(sig.id.clone(), sig);
        }
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FontStyle;

    #[test]
    fn intern_is_idempotent_and_sequential() {
        let mut reg = FontRegistry::new();
        let a = reg.intern(FontKey::new("Times", 18.0, 700, FontStyle::Normal), 1);
        let b = reg.intern(FontKey::new("Times", 14.0, 400, FontStyle::Normal), 1);
        let a2 = reg.intern(FontKey::new("Times", 18.0, 700, FontStyle::Normal), 5);
        assert_eq!(a, "sig001");
        assert_eq!(b, "sig002");
        assert_eq!(a, a2);
    }

    #[test]
    fn distinct_weight_and_style_get_distinct_signatures() {
        let mut reg = FontRegistry::new();
        let bold = reg.intern(FontKey::new("Times", 12.0, 700, FontStyle::Normal), 1);
        let normal = reg.intern(FontKey::new("Times", 12.0, 400, FontStyle::Normal), 1);
        let italic = reg.intern(FontKey::new("Times", 12.0, 400, FontStyle::Italic), 1);
        assert_ne!(bold, normal);
        assert_ne!(normal, italic);
    }

    #[test]
    fn samples_are_capped() {
        let mut reg = FontRegistry::new();
        let id = reg.intern(FontKey::new("Times", 12.0, 400, FontStyle::Normal), 1);
        for i in 0..20 {
            reg.record_sample(&id, &format!("line {i}"));
        }
        assert_eq!(reg.get(&id).unwrap().sample_texts.len(), MAX_SAMPLE_TEXTS);
        assert_eq!(reg.get(&id).unwrap().usage_count, 20);
    }

    #[test]
    fn monospace_family_labeled_code() {
        let mut reg = FontRegistry::new();
        let id = reg.intern(FontKey::new("Courier New", 10.0, 400, FontStyle::Normal), 1);
        reg.record_sample(&id, "fn main() {}");
        reg.infer_fallback_labels();
        assert_eq!(reg.get(&id).unwrap().label, Some(FontLabel::Code));
    }

    #[test]
    fn round_trips_through_json_preserving_order() {
        let mut reg = FontRegistry::new();
        reg.intern(FontKey::new("A", 10.0, 400, FontStyle::Normal), 1);
        reg.intern(FontKey::new("B", 20.0, 700, FontStyle::Normal), 1);
        let json = reg.to_json();
        let reloaded = FontRegistry::from_json(json);
        let again = reloaded
            .id_for(&FontKey::new("A", 10.0, 400, FontStyle::Normal))
            .unwrap();
        assert_eq!(again, "sig001");
    }
}
