//! External command execution.
//!
//! [`run`] spawns a command, captures stdout and stderr, and folds every
//! failure mode (spawn error, nonzero exit, signal) into `false`. Callers
//! get a boolean, never an error, so a broken external tool degrades one
//! job instead of tearing down a batch. No retries are attempted.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Captured output longer than this is truncated before being logged.
const MAX_LOGGED_BYTES: usize = 64 * 1024;

/// Per-stream cap on output kept in memory (10 MiB). The remainder is
/// read and discarded so the child never stalls on a full pipe.
const MAX_CAPTURED_BYTES: usize = 10 * 1024 * 1024;

/// A fully described external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program followed by its arguments. With `shell` set, the elements
    /// are joined by spaces and handed to `sh -c`.
    pub argv: Vec<String>,
    pub shell: bool,
    /// Working directory (inherits the current one if `None`).
    pub working_dir: Option<PathBuf>,
    /// Additional environment variables for the child.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Run the command through `sh -c`.
    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command line as it would be typed, arguments separated by spaces.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    fn build(&self) -> Option<Command> {
        let mut cmd = if self.shell {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(self.command_line());
            cmd
        } else {
            let (program, args) = self.argv.split_first()?;
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        Some(cmd)
    }
}

/// Run `argv` once. Returns `true` iff the process exited with code zero.
pub async fn execute(argv: &[String], shell: bool, working_dir: Option<&Path>) -> bool {
    let spec = CommandSpec {
        argv: argv.to_vec(),
        shell,
        working_dir: working_dir.map(Path::to_path_buf),
        env: Vec::new(),
    };
    run(&spec).await
}

/// Run `spec` once. Returns `true` iff the process exited with code zero.
///
/// On failure the full command line is logged at info level, followed by
/// the captured stdout and stderr.
pub async fn run(spec: &CommandSpec) -> bool {
    capture(spec).await.is_some()
}

/// Like [`run`], but hands back the captured stdout of a successful run.
pub async fn capture(spec: &CommandSpec) -> Option<String> {
    let command_line = spec.command_line();

    let Some(mut cmd) = spec.build() else {
        tracing::error!("Refusing to execute an empty command");
        return None;
    };

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(command = %command_line, error = %e, "Failed to spawn command");
            return None;
        }
    };

    let stdout_task = tokio::spawn(read_capped(child.stdout.take(), MAX_CAPTURED_BYTES));
    let stderr_task = tokio::spawn(read_capped(child.stderr.take(), MAX_CAPTURED_BYTES));

    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(command = %command_line, error = %e, "Failed to wait for command");
            return None;
        }
    };
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    for (stream, captured) in [("stdout", &stdout), ("stderr", &stderr)] {
        if captured.dropped > 0 {
            tracing::warn!(
                command = %command_line,
                stream,
                dropped_bytes = captured.dropped,
                "Command output exceeded the capture limit",
            );
        }
    }

    if status.success() {
        tracing::debug!(command = %command_line, "Command succeeded");
        return Some(String::from_utf8_lossy(&stdout.bytes).into_owned());
    }

    tracing::info!(
        command = %command_line,
        exit_code = status.code(),
        "The stdout and stderr of executed command",
    );
    tracing::warn!(stdout = %truncated(&stdout.bytes), "Captured stdout");
    tracing::warn!(stderr = %truncated(&stderr.bytes), "Captured stderr");
    None
}

/// Output kept from one stream, plus how much was thrown away.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: u64,
}

/// Read at most `cap` bytes from `handle`, then drain the rest.
async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>, cap: usize) -> Captured {
    let mut captured = Captured::default();
    let Some(mut h) = handle else {
        return captured;
    };
    let _ = (&mut h)
        .take(cap as u64)
        .read_to_end(&mut captured.bytes)
        .await;
    captured.dropped = tokio::io::copy(&mut h, &mut tokio::io::sink())
        .await
        .unwrap_or(0);
    captured
}

fn truncated(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_LOGGED_BYTES);
    let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
    if bytes.len() > MAX_LOGGED_BYTES {
        text.push_str(" [truncated]");
    }
    text
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
