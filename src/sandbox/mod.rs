//! Sandboxed executor for generated plotting code.
//!
//! Every run walks `Idle -> Validating -> Executing -> {Succeeded, Failed}`.
//! Validation is static and happens before any process exists; execution
//! happens in a fresh interpreter with a cleared environment, a private
//! working directory and a restricted evaluation scope.

pub mod policy;
pub mod runner;
pub mod validate;

use std::{fmt, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{config::Config, error::ExecutionError, generation::GeneratedCode};

use runner::{RunOutcome, SandboxCommand};

const BOOTSTRAP: &str = include_str!("bootstrap.py");
const MARKER: &str = "@@mathsense@@ ";
const ARTIFACT_NAME: &str = "figure.png";
const STDOUT_LIMIT: usize = 4000;
const FILE_SIZE_LIMIT: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    Validating,
    Executing,
    Succeeded,
    Failed,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionPhase::Idle => "idle",
            ExecutionPhase::Validating => "validating",
            ExecutionPhase::Executing => "executing",
            ExecutionPhase::Succeeded => "succeeded",
            ExecutionPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The renderable artifact of a successful run.
#[derive(Clone, PartialEq, Eq)]
pub struct Figure {
    pub png: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    pub axes: usize,
    pub title: Option<String>,
    /// Text the generated code printed, truncated.
    pub stdout: String,
}

impl fmt::Debug for Figure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Figure")
            .field("png", &format_args!("{} bytes", self.png.len()))
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("axes", &self.axes)
            .field("title", &self.title)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success(Figure),
    Failure(ExecutionError),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    pub fn into_result(self) -> Result<Figure, ExecutionError> {
        match self {
            ExecutionResult::Success(f) => Ok(f),
            ExecutionResult::Failure(e) => Err(e),
        }
    }
}

/// Records the phases one run passes through.
#[derive(Debug, Clone)]
pub struct PhaseTrace {
    phases: Vec<ExecutionPhase>,
}

impl PhaseTrace {
    fn new() -> Self {
        Self { phases: vec![ExecutionPhase::Idle] }
    }

    fn advance(&mut self, next: ExecutionPhase) {
        tracing::debug!(from = %self.current(), to = %next, "sandbox phase");
        self.phases.push(next);
    }

    pub fn current(&self) -> ExecutionPhase {
        *self.phases.last().unwrap_or(&ExecutionPhase::Idle)
    }

    pub fn phases(&self) -> &[ExecutionPhase] {
        &self.phases
    }

    pub fn reached(&self, phase: ExecutionPhase) -> bool {
        self.phases.contains(&phase)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Report {
    Ok {
        width: u32,
        height: u32,
        axes: usize,
        title: Option<String>,
        #[serde(default)]
        stdout: String,
    },
    Ambiguous {
        figures: usize,
    },
    Error {
        kind: ErrorKind,
        message: String,
        line: Option<usize>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ErrorKind {
    Runtime,
    Disallowed,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    python_bin: String,
    timeout: Duration,
    startup_timeout: Duration,
    dpi: u32,
    mpl_cache: Option<PathBuf>,
}

impl SandboxExecutor {
    pub fn new(python_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python_bin: python_bin.into(),
            timeout,
            startup_timeout: Duration::from_secs(30),
            dpi: 100,
            mpl_cache: None,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let mut exec = Self::new(cfg.python_bin(), cfg.execution_timeout());
        if let Some(secs) = cfg.get_u64("SANDBOX_STARTUP_TIMEOUT") {
            exec.startup_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(dpi) = cfg.get_u64("FIGURE_DPI") {
            exec.dpi = dpi.clamp(30, 600) as u32;
        }
        exec.mpl_cache = directories::BaseDirs::new()
            .map(|b| b.cache_dir().join("mathsense").join("matplotlib"));
        exec
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `code`. The stored value is only read.
    pub async fn execute(&self, code: &GeneratedCode) -> ExecutionResult {
        self.execute_traced(&code.source).await.0
    }

    pub async fn execute_source(&self, source: &str) -> ExecutionResult {
        self.execute_traced(source).await.0
    }

    /// Like [`execute_source`](Self::execute_source), also returning the phases visited.
    pub async fn execute_traced(&self, source: &str) -> (ExecutionResult, PhaseTrace) {
        let mut trace = PhaseTrace::new();

        trace.advance(ExecutionPhase::Validating);
        let report = match validate::validate(source) {
            Ok(r) => r,
            Err(v) => {
                tracing::warn!(line = v.line, reason = %v.reason, "generated code rejected");
                trace.advance(ExecutionPhase::Failed);
                let err = ExecutionError::DisallowedOperation { reason: v.reason, line: v.line };
                return (ExecutionResult::Failure(err), trace);
            }
        };
        tracing::debug!(imports = ?report.imports, "generated code validated");

        trace.advance(ExecutionPhase::Executing);
        let result = match self.run_isolated(source).await {
            Ok(figure) => {
                trace.advance(ExecutionPhase::Succeeded);
                tracing::info!(
                    bytes = figure.png.len(),
                    axes = figure.axes,
                    "figure captured"
                );
                ExecutionResult::Success(figure)
            }
            Err(e) => {
                trace.advance(ExecutionPhase::Failed);
                tracing::warn!(error = %e, "execution failed");
                ExecutionResult::Failure(e)
            }
        };
        (result, trace)
    }

    async fn run_isolated(&self, source: &str) -> Result<Figure, ExecutionError> {
        let workdir = tempfile::Builder::new()
            .prefix("mathsense-sandbox-")
            .tempdir()
            .map_err(|e| unavailable(format!("could not create sandbox directory: {e}")))?;
        let artifact = workdir.path().join(ARTIFACT_NAME);

        let mpl_dir = match &self.mpl_cache {
            Some(dir) if std::fs::create_dir_all(dir).is_ok() => dir.clone(),
            _ => workdir.path().join("mpl"),
        };

        let submodules: serde_json::Map<String, serde_json::Value> = policy::ALLOWED_SUBMODULES
            .iter()
            .map(|(root, subs)| (root.to_string(), serde_json::json!(subs)))
            .collect();
        let denied_names: Vec<&str> = policy::DENIED_ATTRIBUTES
            .iter()
            .chain(policy::DENIED_NAMES)
            .copied()
            .collect();
        let cfg = serde_json::json!({
            "marker": MARKER,
            "allowed_roots": policy::ALLOWED_IMPORT_ROOTS,
            "submodules": submodules,
            "star_modules": policy::STAR_IMPORT_MODULES,
            "denied_names": denied_names,
            "builtins": policy::RUNTIME_BUILTINS,
            "artifact": artifact.to_string_lossy(),
            "dpi": self.dpi,
            "stdout_limit": STDOUT_LIMIT,
            "cpu_budget": cpu_budget_secs(self.timeout),
        });

        let home = workdir.path().to_string_lossy().into_owned();
        let mut env = vec![
            ("MPLBACKEND".to_string(), "Agg".to_string()),
            ("MPLCONFIGDIR".to_string(), mpl_dir.to_string_lossy().into_owned()),
            ("HOME".to_string(), home.clone()),
            ("TMPDIR".to_string(), home),
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
            ("OPENBLAS_NUM_THREADS".to_string(), "1".to_string()),
            ("OMP_NUM_THREADS".to_string(), "1".to_string()),
        ];
        if let Ok(path) = std::env::var("PATH") {
            env.push(("PATH".to_string(), path));
        }

        let spec = SandboxCommand {
            program: self.python_bin.clone(),
            args: vec!["-E".into(), "-c".into(), BOOTSTRAP.into(), cfg.to_string()],
            env,
            cwd: workdir.path().to_path_buf(),
            // covers start-up; the bootstrap lowers it to `cpu_budget` once ready
            cpu_limit_secs: Some(
                cpu_budget_secs(self.startup_timeout).saturating_add(cpu_budget_secs(self.timeout)),
            ),
            file_size_limit: Some(FILE_SIZE_LIMIT),
        };

        let outcome = runner::run(&spec, MARKER, source.as_bytes(), self.startup_timeout, self.timeout)
            .await
            .map_err(|e| unavailable(format!("could not start `{}`: {e}", self.python_bin)))?;

        match outcome {
            RunOutcome::TimedOut => Err(ExecutionError::Timeout(self.timeout)),
            RunOutcome::StartupTimedOut => Err(unavailable(format!(
                "`{}` did not start within {:?}",
                self.python_bin, self.startup_timeout
            ))),
            RunOutcome::Finished { report: None, status, stderr, ready: false } => {
                Err(unavailable(format!(
                    "`{}` exited ({status}) before it was ready{}",
                    self.python_bin,
                    stderr_tail(&stderr)
                )))
            }
            RunOutcome::Finished { report: None, status, stderr, ready: true } => {
                if runner::killed_by_limit(&status) {
                    return Err(ExecutionError::Timeout(self.timeout));
                }
                Err(ExecutionError::GeneratedCodeRuntime(format!(
                    "interpreter exited ({status}) without a result{}",
                    stderr_tail(&stderr)
                )))
            }
            RunOutcome::Finished { report: Some(line), ready: false, .. } => {
                match serde_json::from_str::<Report>(&line) {
                    Ok(report @ Report::Error { kind: ErrorKind::Unavailable, .. }) => {
                        self.interpret(report, &artifact)
                    }
                    _ => Err(unavailable(format!("unexpected start-up message: {line}"))),
                }
            }
            RunOutcome::Finished { report: Some(line), .. } => {
                let report: Report = serde_json::from_str(&line).map_err(|e| {
                    ExecutionError::GeneratedCodeRuntime(format!("unreadable sandbox report: {e}"))
                })?;
                self.interpret(report, &artifact)
            }
        }
        // workdir is removed here
    }

    fn interpret(&self, report: Report, artifact: &std::path::Path) -> Result<Figure, ExecutionError> {
        match report {
            Report::Ok { width, height, axes, title, stdout } => {
                let png = std::fs::read(artifact).map_err(|e| {
                    ExecutionError::GeneratedCodeRuntime(format!("figure was not written: {e}"))
                })?;
                Ok(Figure {
                    png,
                    width_px: width,
                    height_px: height,
                    axes,
                    title: title.filter(|t| !t.trim().is_empty()),
                    stdout,
                })
            }
            Report::Ambiguous { figures } => Err(ExecutionError::AmbiguousOutput { figures }),
            Report::Error { kind: ErrorKind::Disallowed, message, line } => {
                Err(ExecutionError::DisallowedOperation { reason: message, line: line.unwrap_or(0) })
            }
            Report::Error { kind: ErrorKind::Runtime, message, line } => {
                Err(ExecutionError::GeneratedCodeRuntime(match line {
                    Some(l) => format!("{message} (line {l})"),
                    None => message,
                }))
            }
            Report::Error { kind: ErrorKind::Unavailable, message, .. } => Err(unavailable(message)),
        }
    }
}

/// Whole CPU seconds covering `limit`, plus one for scheduling slack.
fn cpu_budget_secs(limit: Duration) -> u64 {
    limit
        .as_secs()
        .saturating_add(u64::from(limit.subsec_nanos() > 0))
        .saturating_add(1)
}

fn unavailable(msg: impl Into<String>) -> ExecutionError {
    ExecutionError::SandboxUnavailable(msg.into())
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return String::new();
    }
    let tail = &lines[lines.len().saturating_sub(3)..];
    format!(": {}", tail.join(" | "))
}
