//! One-shot "Other" handler: generate, run, save the figure.

use std::path::Path;

use anyhow::{Context, Result};

use super::OutputOptions;
use crate::printer;
use mathsense::{
    error::PipelineError,
    llm::CompletionBackend,
    pipeline::Pipeline,
    sandbox::{ExecutionResult, Figure},
    session::Session,
};

/// Returns `Ok(false)` when a pipeline phase failed (already reported).
pub async fn run<B: CompletionBackend>(
    pipeline: &Pipeline<B>,
    prompt: &str,
    opts: &OutputOptions,
) -> Result<bool> {
    let session = Session::new();

    printer::status("Generating visualization...");
    let code = tokio::select! {
        r = pipeline.generate(&session, prompt) => r,
        _ = tokio::signal::ctrl_c() => {
            printer::status("Cancelled.");
            return Ok(false);
        }
    };
    let code = match code {
        Ok(code) => code,
        Err(e) => {
            printer::print_failure(&e);
            return Ok(false);
        }
    };
    if opts.show_code {
        printer::print_code(&code, opts.markdown);
    }

    printer::status(&format!(
        "Running generated code (timeout {:.1}s)...",
        pipeline.executor().timeout().as_secs_f64()
    ));
    let outcome = tokio::select! {
        r = pipeline.run_stored(&session) => r,
        _ = tokio::signal::ctrl_c() => {
            printer::status("Cancelled.");
            return Ok(false);
        }
    };
    present(outcome, opts)
}

/// Run a local file through the same sandbox, skipping generation.
pub async fn run_file<B: CompletionBackend>(
    pipeline: &Pipeline<B>,
    path: &Path,
    opts: &OutputOptions,
) -> Result<bool> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    printer::status(&format!("Running {} in the sandbox...", path.display()));
    let outcome = match pipeline.executor().execute_source(&source).await {
        ExecutionResult::Success(fig) => Ok(fig),
        ExecutionResult::Failure(e) => Err(PipelineError::from(e)),
    };
    present(outcome, opts)
}

/// Save and summarize a figure, or report the failure. Shared with the REPL.
pub fn present(outcome: Result<Figure, PipelineError>, opts: &OutputOptions) -> Result<bool> {
    match outcome {
        Ok(fig) => {
            let path = printer::artifact_path(opts.output.as_deref(), &opts.output_dir);
            printer::save_figure(&fig, &path)?;
            printer::print_figure(&fig, &path);
            Ok(true)
        }
        Err(e) => {
            printer::print_failure(&e);
            Ok(false)
        }
    }
}
