//! `pdf-convert` — CLI front-end over [`rpgmd_convert::orchestrator`].
//!
//! A thin clap-derived shim: parse arguments, build a
//! [`rpgmd_convert::PipelineConfig`], dispatch to exactly one orchestrator
//! operation, and translate [`rpgmd_convert::ConvertError`] into the
//! five-bucket exit-code taxonomy. No pipeline logic lives here.

use anyhow::Context;
use clap::Parser;
use rpgmd_convert::{orchestrator, ConvertError, NonInteractive, PipelineConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "pdf-convert",
    about = "Convert a tabletop-RPG scenario PDF into structured Markdown"
)]
struct Cli {
    /// Path to the source PDF. Required unless one of --resume/--phase/
    /// --from-step/--status is given.
    pdf_path: Option<PathBuf>,

    /// Output directory for conversion artifacts.
    #[arg(long, short = 'o', default_value = "./out")]
    output: PathBuf,

    /// Emit extra diagnostic artifacts alongside the normal output.
    #[arg(long)]
    diagnostics: bool,

    /// Skip every interactive confirmation and accept inferred defaults.
    #[arg(long)]
    yes: bool,

    /// Additional GM-note keyword pattern (repeatable).
    #[arg(long = "gm-keyword")]
    gm_keyword: Vec<String>,

    /// Path to a user-supplied callout_config.json.
    #[arg(long = "gm-callout-config-file")]
    gm_callout_config_file: Option<PathBuf>,

    /// Resume a prior conversion from this output directory.
    #[arg(long, conflicts_with_all = ["phase", "from_step", "status"])]
    resume: Option<PathBuf>,

    /// Run exactly one phase (0..10) against this output directory.
    #[arg(long, conflicts_with_all = ["from_step", "status"])]
    phase: Option<u8>,

    /// Resume execution from a specific N.M step within the output directory.
    #[arg(long = "from-step", conflicts_with = "status")]
    from_step: Option<String>,

    /// Print the current run status for this output directory and exit.
    #[arg(long)]
    status: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(
            "info".parse().expect("static directive always parses"),
        ))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<ConvertError>() {
        Some(convert_err) => ExitCode::from(convert_err.exit_code() as u8),
        None => ExitCode::FAILURE,
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Some(dir) = cli.status {
        let report = orchestrator::status(&dir)?;
        println!("phase: {} step: {}", report.current_phase, report.current_step);
        println!("status: {:?}", report.status);
        println!("completed phases: {:?}", report.completed_phases);
        for (num, name, status) in &report.phase_summaries {
            println!("  phase {num} ({name}): {status:?}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(dir) = cli.resume {
        let interaction = interaction_for(cli.yes);
        let state = orchestrator::resume_with_interaction(&dir, interaction.as_ref())?;
        println!("resume finished: {:?}", state.status);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(phase) = cli.phase {
        let dir = cli
            .pdf_path
            .clone()
            .context("`--phase N` requires an output directory argument")?;
        let interaction = interaction_for(cli.yes);
        let state = orchestrator::run_phase_with_interaction(&dir, phase, interaction.as_ref())?;
        println!("phase {phase} finished: {:?}", state.status);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(step_id) = cli.from_step {
        let dir = cli
            .pdf_path
            .clone()
            .context("`--from-step N.M` requires an output directory argument")?;
        let interaction = interaction_for(cli.yes);
        let state = orchestrator::run_from_step_with_interaction(&dir, &step_id, interaction.as_ref())?;
        println!("resumed from {step_id}: {:?}", state.status);
        return Ok(ExitCode::SUCCESS);
    }

    let pdf_path = cli
        .pdf_path
        .context("a PDF path is required for a fresh conversion")?;

    let mut builder = PipelineConfig::builder(cli.output)
        .diagnostics(cli.diagnostics)
        .non_interactive(cli.yes)
        .gm_keywords(cli.gm_keyword);
    if let Some(path) = cli.gm_callout_config_file {
        builder = builder.callout_config_path(path);
    }
    let config = builder.build()?;

    let interaction = interaction_for(cli.yes);
    let state = orchestrator::run_with_interaction(&pdf_path, config, interaction.as_ref())?;
    println!("conversion finished: {:?}", state.status);
    Ok(ExitCode::SUCCESS)
}

fn interaction_for(non_interactive: bool) -> Box<dyn rpgmd_convert::UserInteraction> {
    // A real TTY confirmation dialog is an external collaborator's
    // responsibility per `crate::interaction`'s design; --yes or not, this
    // CLI only ever auto-confirms.
    let _ = non_interactive;
    Box::new(NonInteractive)
}
