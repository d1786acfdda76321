//! Interpreter subprocess management: spawn, handshake, feed source, bounded wait.

use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines},
    process::{ChildStdout, Command},
    time::timeout,
};

/// Time allowed for a killed child to be reaped before we stop waiting on it.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Cap on captured stderr, enough for a traceback tail.
const STDERR_LIMIT: usize = 16 * 1024;

/// How to launch the interpreter. Built by the executor, kept separate for testing.
#[derive(Debug, Clone)]
pub struct SandboxCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    /// Kernel CPU-seconds ceiling (Unix only).
    pub cpu_limit_secs: Option<u64>,
    /// Largest file the child may write (Unix only).
    pub file_size_limit: Option<u64>,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// The child exited; `report` is the protocol line it emitted, if any.
    /// `ready` is false when it never completed the handshake.
    Finished {
        report: Option<String>,
        status: ExitStatus,
        stderr: String,
        ready: bool,
    },
    /// No handshake within the startup window.
    StartupTimedOut,
    /// Handshake done, but the source did not finish in time.
    TimedOut,
}

/// Run one program to completion under the handshake protocol.
///
/// The child first prints `marker` + a ready payload, then receives `stdin`,
/// then prints `marker` + its report. Anything else on stdout is ignored.
pub async fn run(
    spec: &SandboxCommand,
    marker: &str,
    stdin: &[u8],
    startup: Duration,
    limit: Duration,
) -> std::io::Result<RunOutcome> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .env_clear()
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&spec.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    apply_limits(&mut cmd, spec);

    let mut child = cmd.spawn()?;
    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("no stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("no stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("no stderr"))?;

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.take(STDERR_LIMIT as u64).read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    });
    let collect_stderr = |task: tokio::task::JoinHandle<String>| async move {
        timeout(KILL_GRACE, task)
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default()
    };

    let mut lines = BufReader::new(stdout).lines();

    let handshake = match timeout(startup, next_report(&mut lines, marker)).await {
        Ok(r) => r?,
        Err(_) => {
            tracing::warn!(?startup, "interpreter did not become ready");
            let _ = child.start_kill();
            let _ = timeout(KILL_GRACE, child.wait()).await;
            return Ok(RunOutcome::StartupTimedOut);
        }
    };

    match handshake {
        Some(payload) if is_ready(&payload) => {}
        // bootstrap failed before it could accept source
        other => {
            drop(child_stdin);
            let status = match timeout(KILL_GRACE, child.wait()).await {
                Ok(s) => s?,
                Err(_) => {
                    let _ = child.start_kill();
                    child.wait().await?
                }
            };
            return Ok(RunOutcome::Finished {
                report: other,
                status,
                stderr: collect_stderr(stderr_task).await,
                ready: false,
            });
        }
    }

    let started = tokio::time::Instant::now();
    let work = async {
        // A child that dies early closes its end; the wait below reports why.
        let _ = child_stdin.write_all(stdin).await;
        let _ = child_stdin.shutdown().await;
        drop(child_stdin);
        let report = next_report(&mut lines, marker).await?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((report, status))
    };

    let finished = timeout(limit, work).await;
    match finished {
        Ok(done) => {
            let (report, status) = done?;
            tracing::debug!(elapsed = ?started.elapsed(), %status, "interpreter finished");
            Ok(RunOutcome::Finished {
                report,
                status,
                stderr: collect_stderr(stderr_task).await,
                ready: true,
            })
        }
        Err(_) => {
            tracing::warn!(?limit, "execution timed out, killing interpreter");
            let _ = child.start_kill();
            let _ = timeout(KILL_GRACE, child.wait()).await;
            stderr_task.abort();
            Ok(RunOutcome::TimedOut)
        }
    }
}

async fn next_report(
    lines: &mut Lines<BufReader<ChildStdout>>,
    marker: &str,
) -> std::io::Result<Option<String>> {
    while let Some(line) = lines.next_line().await? {
        if let Some(payload) = line.strip_prefix(marker) {
            return Ok(Some(payload.to_string()));
        }
    }
    Ok(None)
}

fn is_ready(payload: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(|s| s == "ready"))
        .unwrap_or(false)
}

#[cfg(unix)]
fn apply_limits(cmd: &mut Command, spec: &SandboxCommand) {
    let cpu = spec.cpu_limit_secs;
    let fsize = spec.file_size_limit;
    if cpu.is_none() && fsize.is_none() {
        return;
    }
    // SAFETY: the closure runs between fork and exec and only calls setrlimit,
    // which is async-signal-safe; it touches no heap state.
    unsafe {
        cmd.pre_exec(move || {
            let set = |resource, value: u64| {
                let lim = libc::rlimit {
                    rlim_cur: value as libc::rlim_t,
                    rlim_max: value as libc::rlim_t,
                };
                if libc::setrlimit(resource, &lim) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            };
            if let Some(secs) = cpu {
                set(libc::RLIMIT_CPU, secs)?;
            }
            if let Some(bytes) = fsize {
                set(libc::RLIMIT_FSIZE, bytes)?;
            }
            set(libc::RLIMIT_CORE, 0)?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_limits(_cmd: &mut Command, _spec: &SandboxCommand) {}

/// True when the child was killed by a resource-limit or kill signal.
pub fn killed_by_limit(status: &ExitStatus) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        matches!(status.signal(), Some(libc::SIGXCPU) | Some(libc::SIGKILL))
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        false
    }
}
