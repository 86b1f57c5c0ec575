//! Process Runner
//!
//! Spawns one child through the dialect's interpreter with a fully escaped
//! command line, captures its output under a hard ceiling, and races it
//! against the execution timeout. The runner only reports what happened;
//! [`classify`](super::outcome::classify) decides success or failure.
//!
//! The interpreter starts a new process group on unix so that a timeout,
//! an output overflow or a dropped call takes the tool down with it, not
//! just the shell in front of it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tracing::{debug, info, warn};

use super::error::ToolError;
use super::escape::ShellDialect;
use super::outcome::RawOutput;
use super::timeout::ExecutionTimeout;

/// Maximum output size per stream in bytes (10MB)
pub const MAX_OUTPUT_SIZE: usize = 10 * 1024 * 1024;

/// How long to wait for a killed child to be reaped
const REAP_GRACE: Duration = Duration::from_secs(5);

/// A command line ready for a specific interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Interpreter dialect
    pub dialect: ShellDialect,

    /// Pre-escaped command line
    pub command_line: String,
}

impl Invocation {
    pub fn new(dialect: ShellDialect, command_line: impl Into<String>) -> Self {
        Self {
            dialect,
            command_line: command_line.into(),
        }
    }

    /// Interpreter program for this dialect
    pub fn interpreter(&self) -> String {
        match self.dialect {
            ShellDialect::Posix => "/bin/sh".to_string(),
            ShellDialect::Cmd => system32("cmd.exe"),
            ShellDialect::PowerShell => system32(r"WindowsPowerShell\v1.0\powershell.exe"),
        }
    }

    fn command(&self) -> TokioCommand {
        let mut command = TokioCommand::new(self.interpreter());
        match self.dialect {
            ShellDialect::Posix => {
                command.arg("-c").arg(&self.command_line);
            }
            ShellDialect::Cmd => {
                // /s strips exactly the outer quote pair, leaving the line intact
                command.args(["/d", "/s", "/c"]);
                push_raw_arg(&mut command, &format!("\"{}\"", self.command_line));
            }
            ShellDialect::PowerShell => {
                command.args(["-NoProfile", "-NonInteractive", "-Command"]);
                push_raw_arg(&mut command, &self.command_line);
            }
        }
        command
    }
}

fn system32(program: &str) -> String {
    match std::env::var("SystemRoot") {
        Ok(root) => format!(r"{}\System32\{}", root, program),
        Err(_) => program.rsplit('\\').next().unwrap_or(program).to_string(),
    }
}

#[cfg(windows)]
fn push_raw_arg(command: &mut TokioCommand, arg: &str) {
    command.raw_arg(arg);
}

#[cfg(not(windows))]
fn push_raw_arg(command: &mut TokioCommand, arg: &str) {
    command.arg(arg);
}

/// Per-call execution limits and environment
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Wall-clock budget
    pub timeout: ExecutionTimeout,

    /// Ceiling for each of stdout and stderr
    pub max_output_bytes: usize,

    /// Working directory (default: inherited)
    pub cwd: Option<PathBuf>,

    /// Extra environment merged over the inherited one
    pub env: HashMap<String, String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: ExecutionTimeout::default(),
            max_output_bytes: MAX_OUTPUT_SIZE,
            cwd: None,
            env: HashMap::new(),
        }
    }
}

impl RunOptions {
    /// Options with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: ExecutionTimeout::new(timeout),
            ..Default::default()
        }
    }

    /// Set the output ceiling
    pub fn max_output_bytes(mut self, size: usize) -> Self {
        self.max_output_bytes = size;
        self
    }

    /// Set the working directory
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Something that can run an [`Invocation`]
///
/// The gateway depends on this trait rather than on process spawning
/// directly, so tests can substitute a recording runner.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation, options: &RunOptions)
        -> Result<RawOutput, ToolError>;
}

/// Runner that spawns real processes through the shell
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellProcessRunner;

impl ShellProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for ShellProcessRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        options: &RunOptions,
    ) -> Result<RawOutput, ToolError> {
        let start = Instant::now();
        let program = invocation.interpreter();

        let mut command = invocation.command();
        if let Some(ref dir) = options.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &options.env {
            if key.eq_ignore_ascii_case("PATH") {
                warn!("Ignoring PATH override in extra environment");
                continue;
            }
            command.env(key, value);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        debug!(interpreter = %program, dialect = %invocation.dialect, "Spawning process");
        let mut child = command.spawn().map_err(|e| ToolError::Spawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        let mut tree = ProcessTree::new(child.id());

        let stdout = child.stdout.take().ok_or_else(|| ToolError::Spawn {
            program: program.clone(),
            reason: "stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ToolError::Spawn {
            program: program.clone(),
            reason: "stderr was not captured".to_string(),
        })?;

        let limit = options.max_output_bytes;
        let collected = options
            .timeout
            .run(async {
                let (stdout, stderr) =
                    tokio::try_join!(read_capped(stdout, limit), read_capped(stderr, limit))?;
                let status = child.wait().await.map_err(|e| ToolError::ProcessError {
                    exit_code: None,
                    diagnostic: format!("failed to wait for process: {}", e),
                })?;
                Ok::<_, ToolError>((status, stdout, stderr))
            })
            .await;

        match collected {
            Ok((status, stdout, stderr)) => {
                tree.release();
                info!(
                    exit_code = ?status.code(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    stdout_bytes = stdout.len(),
                    stderr_bytes = stderr.len(),
                    "Process finished"
                );
                Ok(RawOutput {
                    exit_code: status.code(),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                })
            }
            Err(err) => {
                warn!(
                    error = %err,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Terminating process"
                );
                terminate(&mut child, &mut tree).await;
                Err(err)
            }
        }
    }
}

/// Descendants of a spawned interpreter
///
/// Killed when dropped unless released, so a cancelled call leaves nothing
/// running behind it.
#[derive(Debug)]
struct ProcessTree {
    pid: Option<u32>,
}

impl ProcessTree {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    /// The interpreter exited on its own; nothing left to kill
    fn release(&mut self) {
        self.pid = None;
    }

    fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_tree(pid);
        }
    }
}

impl Drop for ProcessTree {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_tree(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The interpreter leads its own group, so the group id is its pid
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "Killed process group"),
        Err(e) => debug!(pid, "Process group kill failed (likely exited): {}", e),
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    // Must run while the interpreter is alive, or /T cannot find the children
    let status = std::process::Command::new(system32("taskkill.exe"))
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => debug!(pid, "Killed process tree"),
        Ok(status) => debug!(pid, ?status, "taskkill did not succeed (process likely exited)"),
        Err(e) => warn!(pid, "Failed to run taskkill: {}", e),
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(_pid: u32) {}

/// Kill and reap a child that lost the race, along with everything it started
async fn terminate(child: &mut Child, tree: &mut ProcessTree) {
    tree.kill();
    if let Err(e) = child.start_kill() {
        debug!("Kill failed (process likely exited): {}", e);
    }
    if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
        warn!("Killed process was not reaped within {:?}", REAP_GRACE);
    }
}

/// Read a stream to EOF, failing as soon as it exceeds `limit` bytes
async fn read_capped<R>(mut reader: R, limit: usize) -> Result<Vec<u8>, ToolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| ToolError::ProcessError {
                exit_code: None,
                diagnostic: format!("failed to read process output: {}", e),
            })?;
        if n == 0 {
            return Ok(buf);
        }
        if buf.len() + n > limit {
            return Err(ToolError::OutputLimitExceeded { limit });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Wait up to two seconds for `pid` to exit; true once it is gone or a zombie
#[cfg(all(test, target_os = "linux"))]
pub(crate) async fn wait_until_gone(pid: u32) -> bool {
    for _ in 0..40 {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            return true;
        };
        // State follows the parenthesised command name
        let state = stat.rsplit(')').next().unwrap_or("").trim_start();
        if state.starts_with('Z') || state.starts_with('X') {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
