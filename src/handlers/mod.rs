pub mod other;
pub mod repl;

use std::path::PathBuf;

/// How results are presented, resolved from flags and config.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub output: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub show_code: bool,
    pub markdown: bool,
}
