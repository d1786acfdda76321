//! Line-oriented session: prompts generate code, `:run` re-executes the stored code.

use std::io::Write as _;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{other::present, OutputOptions};
use crate::printer;
use mathsense::{
    concepts,
    error::PipelineError,
    llm::CompletionBackend,
    pipeline::{Attempt, Pipeline},
    session::Session,
};

const HELP: &str = "\
Type a description to generate and run a visualization.
  :run            run the stored code again
  :code           show the stored code
  :save <path>    write the stored code to a file
  :concepts       list built-in concepts
  :clear          forget the stored code
  :help           this text
  :quit           end the session
Ctrl-C cancels the request in flight.";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Prompt(&'a str),
    Run,
    Code,
    Save(&'a str),
    Concepts,
    Clear,
    Help,
    Quit,
    Unknown(&'a str),
    Empty,
}

fn parse(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Command::Prompt(line);
    };
    let (cmd, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    match cmd {
        "run" | "r" => Command::Run,
        "code" | "c" => Command::Code,
        "save" | "s" if !arg.trim().is_empty() => Command::Save(arg.trim()),
        "concepts" => Command::Concepts,
        "clear" => Command::Clear,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        _ => Command::Unknown(line),
    }
}

pub async fn run<B: CompletionBackend>(
    pipeline: &Pipeline<B>,
    init_prompt: Option<&str>,
    opts: &OutputOptions,
) -> Result<()> {
    let session = Session::new();
    printer::status("MathSense session. Type :help for commands.");

    if let Some(p) = init_prompt.filter(|p| !p.trim().is_empty()) {
        prompt_once(pipeline, &session, p, opts).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("mathsense> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        match parse(&line) {
            Command::Empty => {}
            Command::Prompt(p) => prompt_once(pipeline, &session, p, opts).await?,
            Command::Run => {
                let outcome = tokio::select! {
                    r = pipeline.run_stored(&session) => r,
                    _ = tokio::signal::ctrl_c() => { printer::status("Cancelled."); continue; }
                };
                present(outcome, opts)?;
            }
            Command::Code => match session.current() {
                Some(code) => printer::print_code(&code, opts.markdown),
                None => printer::print_failure(&PipelineError::NothingToRun),
            },
            Command::Save(path) => match session.current() {
                Some(code) => match std::fs::write(path, &code.source) {
                    Ok(()) => printer::status(&format!("Saved code to {path}")),
                    Err(e) => tracing::error!(%path, error = %e, "could not save code"),
                },
                None => printer::print_failure(&PipelineError::NothingToRun),
            },
            Command::Concepts => printer::print_concepts(concepts::CONCEPTS),
            Command::Clear => {
                session.clear();
                printer::status("Stored code cleared.");
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
            Command::Unknown(s) => printer::status(&format!("Unknown command {s}; try :help")),
        }
    }
    Ok(())
}

async fn prompt_once<B: CompletionBackend>(
    pipeline: &Pipeline<B>,
    session: &Session,
    prompt: &str,
    opts: &OutputOptions,
) -> Result<()> {
    if let Some(c) = concepts::find(prompt).filter(|c| c.name != "Other") {
        printer::status(&format!("{} is a built-in concept ({}); generating anyway.", c.name, c.used_in));
    }
    printer::status("Generating visualization...");
    let outcome = tokio::select! {
        r = pipeline.generate_and_run(session, prompt) => r,
        _ = tokio::signal::ctrl_c() => {
            printer::status("Cancelled.");
            return Ok(());
        }
    };
    match outcome {
        Ok(Attempt { code, figure }) => {
            if opts.show_code {
                printer::print_code(&code, opts.markdown);
            }
            present(figure, opts)?;
        }
        Err(e) => {
            present(Err(e), opts)?;
        }
    }
    Ok(())
}
