//! Phase 2 — Image Removal.
//!
//! Removes image references from the PDF page tree and compacts the
//! object stream, producing a small, text-only PDF for Phase 4 to extract
//! from. This is deletion-by-dereference, not redaction: the original
//! image bytes already live in `images/` from Phase 1.

use crate::error::ConvertError;
use crate::pdfsrc;
use crate::pipeline::{Phase, PhaseContext, PhaseOutcome, StepOutcome};

pub struct Phase2;

impl Phase for Phase2 {
    fn number(&self) -> u8 {
        2
    }

    fn name(&self) -> &'static str {
        "image-removal"
    }

    fn run(&self, ctx: &PhaseContext, _from_step: Option<&str>) -> Result<PhaseOutcome, ConvertError> {
        let out_path = ctx.artifact(&format!("{}-textonly.pdf", ctx.doc_stem));
        pdfsrc::strip_images_to(ctx.pdf_path, &out_path)?;

        let steps = vec![StepOutcome::success(
            "2.1",
            "remove image xrefs and compact object stream",
        )];

        Ok(PhaseOutcome {
            steps,
            output_file: Some(out_path),
        })
    }
}
