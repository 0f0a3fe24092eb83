//! Configuration types for PDF-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to serialise a config alongside run output for diagnostics,
//! and to diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A handful of independent, optional knobs (diagnostics, non-interactive,
//! callout config path, GM keywords) do not warrant a positional
//! constructor that breaks on every new field. The builder lets callers set
//! only what they care about and rely on documented defaults for the rest.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Built-in GM-note keyword patterns scanned for during Phase 7 callout
/// detection, before any user-supplied `--gm-keyword` additions.
pub const DEFAULT_GM_KEYWORDS: &[&str] = &["Keeper's Note:", "GM Note:", "Read Aloud:"];

/// Configuration for a single PDF-to-Markdown conversion run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use rpgmd_convert::PipelineConfig;
///
/// let config = PipelineConfig::builder("./out")
///     .diagnostics(true)
///     .gm_keyword("Keeper's Note:")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Emit extra diagnostic artifacts (column-crossover pages, list-split
    /// counters, heading-gap reports) alongside the normal output. Default:
    /// false.
    pub diagnostics: bool,

    /// Skip every interactive confirmation point (pre-flight report at step
    /// 0.6, font-mapping review at step 7.10) and auto-accept the core's
    /// inferred defaults. Default: false.
    ///
    /// Set by `--yes` on the CLI. Scripted/CI invocations should always set
    /// this; without it, a run against a real TTY blocks on
    /// [`crate::interaction::UserInteraction`].
    pub non_interactive: bool,

    /// Path to a user-editable `callout_config.json` describing callout
    /// start/end text boundaries. If `None`, an empty array is written to
    /// the output directory at step 0.6 so the user can populate it before
    /// the run reaches Phase 7.
    pub callout_config_path: Option<PathBuf>,

    /// Additional GM-note keyword patterns beyond [`DEFAULT_GM_KEYWORDS`],
    /// supplied via repeated `--gm-keyword` flags.
    pub gm_keywords: Vec<String>,

    /// Directory advisory-locked and written to during the run. Required;
    /// validated for writability in Phase 0.
    pub output_dir: PathBuf,
}

impl PipelineConfig {
    /// Create a new builder for [`PipelineConfig`].
    pub fn builder(output_dir: impl Into<PathBuf>) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: PipelineConfig {
                diagnostics: false,
                non_interactive: false,
                callout_config_path: None,
                gm_keywords: Vec::new(),
                output_dir: output_dir.into(),
            },
        }
    }

    /// All keyword patterns that should trigger callout detection: the
    /// built-ins plus any user additions, in that order.
    pub fn all_gm_keywords(&self) -> Vec<&str> {
        DEFAULT_GM_KEYWORDS
            .iter()
            .copied()
            .chain(self.gm_keywords.iter().map(String::as_str))
            .collect()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn diagnostics(mut self, v: bool) -> Self {
        self.config.diagnostics = v;
        self
    }

    pub fn non_interactive(mut self, v: bool) -> Self {
        self.config.non_interactive = v;
        self
    }

    pub fn callout_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.callout_config_path = Some(path.into());
        self
    }

    pub fn gm_keyword(mut self, kw: impl Into<String>) -> Self {
        self.config.gm_keywords.push(kw.into());
        self
    }

    pub fn gm_keywords(mut self, kws: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.gm_keywords.extend(kws.into_iter().map(Into::into));
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ConvertError> {
        let c = &self.config;
        if c.output_dir.as_os_str().is_empty() {
            return Err(ConvertError::InvalidArgument {
                detail: "output directory must not be empty".to_string(),
            });
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keywords_come_before_user_additions() {
        let cfg = PipelineConfig::builder("/tmp/out")
            .gm_keyword("Sidebar:")
            .build()
            .unwrap();
        let all = cfg.all_gm_keywords();
        assert_eq!(all.last(), Some(&"Sidebar:"));
        assert!(all.contains(&"GM Note:"));
    }

    #[test]
    fn empty_output_dir_rejected() {
        let err = PipelineConfig::builder("").build().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
