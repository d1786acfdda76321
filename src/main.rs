mod cli;
mod handlers;
mod printer;

use std::{
    io::{self, Read},
    process::ExitCode,
};

use anyhow::{bail, Context, Result};
use is_terminal::IsTerminal;
use mathsense::{
    concepts,
    config::{self, Config},
    generation::CodeGenerator,
    llm::LlmClient,
    pipeline::Pipeline,
    sandbox::SandboxExecutor,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("mathsense=debug")
    } else {
        EnvFilter::try_from_env("MATHSENSE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    let mut cfg = Config::load();
    if let Some(model) = &args.model {
        cfg.set("DEFAULT_MODEL", model.clone());
    }
    if let Some(python) = &args.python {
        cfg.set("PYTHON_BIN", python.clone());
    }
    if let Some(secs) = args.timeout {
        let Some(limit) = config::timeout_from_secs(secs) else {
            bail!("--timeout must be a positive number of seconds");
        };
        cfg.set("EXECUTION_TIMEOUT", limit.as_secs_f64().to_string());
    }

    if args.list_concepts {
        printer::print_concepts(concepts::CONCEPTS);
        return Ok(ExitCode::SUCCESS);
    }

    // stdin handling (pipe support)
    let mut prompt_from_stdin = String::new();
    let stdin_is_tty = io::stdin().is_terminal();
    if !stdin_is_tty && !args.repl && args.run_file.is_none() {
        io::stdin()
            .read_to_string(&mut prompt_from_stdin)
            .context("reading prompt from stdin")?;
    }
    let arg_prompt = args.prompt.clone().unwrap_or_default();
    let prompt = match (prompt_from_stdin.trim().is_empty(), arg_prompt.trim().is_empty()) {
        (false, false) => format!("{}\n\n{}", prompt_from_stdin.trim(), arg_prompt),
        (false, true) => prompt_from_stdin.trim().to_string(),
        _ => arg_prompt,
    };

    let opts = handlers::OutputOptions {
        output: args.output.clone(),
        output_dir: cfg.output_dir(),
        show_code: args.show_code || args.repl,
        markdown: !args.no_md && io::stdout().is_terminal(),
    };

    let client = LlmClient::from_config(&cfg).context("building HTTP client")?;
    tracing::debug!(model = client.model(), "generation client ready");
    let executor = SandboxExecutor::from_config(&cfg);
    tracing::debug!(timeout = ?executor.timeout(), python = %cfg.python_bin(), "sandbox ready");
    let pipeline = Pipeline::new(CodeGenerator::new(client), executor);

    if args.repl {
        handlers::repl::run(&pipeline, Some(prompt.as_str()), &opts).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let ok = if let Some(path) = &args.run_file {
        handlers::other::run_file(&pipeline, path, &opts).await?
    } else {
        handlers::other::run(&pipeline, &prompt, &opts).await?
    };
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
