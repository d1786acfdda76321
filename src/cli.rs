use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "mathsense", about = "Visualize math concepts with generated, sandboxed plotting code", version)]
#[command(group(ArgGroup::new("mode").args(["repl", "run_file", "list_concepts"]).multiple(false)))]
pub struct Cli {
    /// Describe the concept you want to visualize.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Large language model to use.
    #[arg(long)]
    pub model: Option<String>,

    /// Seconds the generated code may run before it is killed (at most 3600).
    #[arg(long, value_parser = clap::value_parser!(f64))]
    pub timeout: Option<f64>,

    /// Python interpreter used for the sandbox.
    #[arg(long)]
    pub python: Option<String>,

    /// Where to write the figure (PNG). Defaults to a timestamped file in OUTPUT_DIR.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Print the generated code.
    #[arg(long = "show-code")]
    pub show_code: bool,

    /// Print code as plain text instead of rendered Markdown.
    #[arg(long = "no-md")]
    pub no_md: bool,

    /// Run a local Python file through the sandbox instead of generating code.
    #[arg(long = "run-file", value_name = "FILE")]
    pub run_file: Option<PathBuf>,

    /// Start an interactive session.
    #[arg(long)]
    pub repl: bool,

    /// List the built-in concepts.
    #[arg(short = 'l', long = "list-concepts")]
    pub list_concepts: bool,

    /// Verbose logging (debug level) on stderr.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_are_exclusive() {
        assert!(Cli::try_parse_from(["mathsense", "--repl", "--list-concepts"]).is_err());
        let cli = Cli::try_parse_from(["mathsense", "--timeout", "2.5", "-o", "out.png", "plot sin"]).unwrap();
        assert_eq!(cli.timeout, Some(2.5));
        assert_eq!(cli.prompt.as_deref(), Some("plot sin"));
    }
}
