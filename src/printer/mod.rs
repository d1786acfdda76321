//! Printers: colored status lines, markdown (termimad), and artifact output.

use std::{
    borrow::Cow,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use owo_colors::OwoColorize;
use termimad::MadSkin;

use mathsense::{concepts::Concept, error::PipelineError, generation::GeneratedCode, sandbox::Figure};

pub struct TextPrinter {
    pub color: Option<&'static str>,
}

impl TextPrinter {
    pub fn print(&self, text: &str) {
        let text = printable(text);
        let text = text.as_ref();
        if let Some(c) = self.color {
            match c {
                "green" => println!("{}", text.green()),
                "cyan" => println!("{}", text.cyan()),
                "magenta" => println!("{}", text.magenta()),
                "yellow" => println!("{}", text.yellow()),
                "red" => println!("{}", text.red()),
                "dimmed" => println!("{}", text.dimmed()),
                _ => println!("{}", text),
            }
        } else {
            println!("{}", text);
        }
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}

/// Drop terminal control characters (escape sequences included) from text that
/// came from the model or the interpreter. Newlines and tabs are kept.
pub fn printable(text: &str) -> Cow<'_, str> {
    let keep = |c: char| !c.is_control() || c == '\n' || c == '\t';
    if text.chars().all(keep) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| keep(c)).collect())
    }
}

pub fn status(text: &str) {
    TextPrinter { color: Some("cyan") }.print(text);
}

pub fn print_code(code: &GeneratedCode, markdown: bool) {
    let source = printable(&code.source);
    if markdown {
        MarkdownPrinter::default().print(&format!("```python\n{source}```"));
    } else {
        print!("{source}");
    }
}

pub fn print_failure(err: &PipelineError) {
    eprintln!("{}", printable(&err.to_string()).red());
}

/// Summarize a saved figure and echo anything the generated code printed.
pub fn print_figure(fig: &Figure, path: &Path) {
    let title = fig
        .title
        .as_deref()
        .map(|t| format!(" \"{t}\""))
        .unwrap_or_default();
    TextPrinter { color: Some("green") }.print(&format!(
        "Figure{title}: {}x{} px, {} axes -> {}",
        fig.width_px,
        fig.height_px,
        fig.axes,
        path.display()
    ));
    let out = fig.stdout.trim_end();
    if !out.is_empty() {
        TextPrinter { color: Some("dimmed") }.print(out);
    }
}

pub fn print_concepts(concepts: &[Concept]) {
    for (i, c) in concepts.iter().enumerate() {
        println!("{:>2}. {} {}", i + 1, c.name.bold(), format!("({})", c.used_in).dimmed());
    }
}

/// Where to write the artifact: an explicit path, or a timestamped file in `dir`.
pub fn artifact_path(explicit: Option<&Path>, dir: &Path) -> PathBuf {
    match explicit {
        Some(p) if p.extension().is_some() => p.to_path_buf(),
        Some(p) => p.with_extension("png"),
        None => dir.join(format!("mathsense-{}.png", Utc::now().format("%Y%m%d-%H%M%S%3f"))),
    }
}

pub fn save_figure(fig: &Figure, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    fs::write(path, &fig.png).with_context(|| format!("writing figure to {}", path.display()))
}
