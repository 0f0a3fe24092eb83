//! Phase 1 — Image Extraction.
//!
//! Writes every embedded raster image to `images/`, deterministically
//! named `pageNNN_imgMM.ext` (1-indexed, zero-padded), and records page,
//! bounding box, and filename in `images/image-manifest.json`.

use crate::error::ConvertError;
use crate::model::ImageManifestEntry;
use crate::pdfsrc;
use crate::pipeline::{Phase, PhaseContext, PhaseOutcome, StepOutcome};
use std::collections::HashMap;
use std::fs;

pub struct Phase1;

impl Phase for Phase1 {
    fn number(&self) -> u8 {
        1
    }

    fn name(&self) -> &'static str {
        "image-extraction"
    }

    fn run(&self, ctx: &PhaseContext, _from_step: Option<&str>) -> Result<PhaseOutcome, ConvertError> {
        let mut steps = Vec::new();
        let images_dir = ctx.artifact("images");
        fs::create_dir_all(&images_dir)?;

        let xrefs = pdfsrc::read_image_xrefs(ctx.pdf_path)?;
        let mut per_page_counter: HashMap<u32, u32> = HashMap::new();
        let mut manifest = Vec::with_capacity(xrefs.len());

        for xref in &xrefs {
            let counter = per_page_counter.entry(xref.page).or_insert(0);
            *counter += 1;
            let filename = format!(
                "page{:03}_img{:02}.{}",
                xref.page, *counter, xref.extension
            );
            fs::write(images_dir.join(&filename), &xref.bytes)?;
            manifest.push(ImageManifestEntry {
                page: xref.page,
                x: xref.x,
                y: xref.y,
                width: xref.width,
                height: xref.height,
                filename,
                extension: xref.extension.clone(),
            });
        }
        steps.push(StepOutcome::success("1.1", "write images to disk"));

        let manifest_path = images_dir.join("image-manifest.json");
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest).unwrap())?;
        steps.push(StepOutcome::success("1.2", "write image manifest"));

        Ok(PhaseOutcome {
            steps,
            output_file: Some(manifest_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_filename_format() {
        let filename = format!("page{:03}_img{:02}.{}", 3, 1, "png");
        assert_eq!(filename, "page003_img01.png");
    }
}
