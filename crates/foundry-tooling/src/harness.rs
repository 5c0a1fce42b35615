//! Bounded child-process execution.
//!
//! Every external tool runs through [`ProcessHarness`]: no shell, a fixed
//! working directory, a cleared environment with an explicit `PATH`, a hard
//! wall-clock timeout and a cap on captured output. Infrastructure failures
//! (missing binary, spawn error, timeout) are reported as unsuccessful
//! [`CommandOutput`] values rather than errors.

use async_trait::async_trait;
use core::mem::take;
use foundry_core::{HarnessConfig, IgnoreLock as _, ToolingConfig};
use std::env;
use std::ffi::{OsStr, OsString};
use std::future::pending;
use std::io::{ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::command::LogicalCommand;
use crate::resolver::ToolResolver;

/// Locations searched before anything configured or inherited.
pub const STANDARD_PATHS: [&str; 4] = ["/usr/local/bin", "/opt/homebrew/bin", "/usr/bin", "/bin"];

/// Appended once when output passes the cap.
pub const TRUNCATION_MARKER: &str = "[Output truncated]";

/// Appended when the hard timeout fired.
pub const TIMEOUT_MARKER: &str = "[Process killed due to timeout]";

/// Appended when the owning job was cancelled mid-command.
pub const CANCELLED_MARKER: &str = "[Process terminated: job cancelled]";

/// How long reader tasks may keep draining after the child is gone.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8192;

/// Result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code 0; the only success signal.
    pub success: bool,
    /// Interleaved stdout/stderr, bounded.
    pub output: String,
    /// Exit code when the process exited normally.
    pub exit_code: Option<i32>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// The hard timeout fired.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Successful exit with the given output.
    pub fn success<S: Into<String>>(output: S) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_code: Some(0),
            duration_ms: 0,
            timed_out: false,
        }
    }

    /// Non-zero exit with the given output.
    pub fn failure<S: Into<String>>(exit_code: i32, output: S) -> Self {
        Self {
            success: false,
            output: output.into(),
            exit_code: Some(exit_code),
            duration_ms: 0,
            timed_out: false,
        }
    }

    /// The command never ran.
    pub fn not_started<S: Into<String>>(message: S, elapsed: Duration) -> Self {
        Self {
            success: false,
            output: message.into(),
            exit_code: None,
            duration_ms: elapsed.as_millis() as u64,
            timed_out: false,
        }
    }

    /// Last `max_bytes` of the output, cut on a character boundary.
    pub fn tail(&self, max_bytes: usize) -> &str {
        tail_str(&self.output, max_bytes)
    }
}

/// Last `max_bytes` of `text`, cut on a character boundary.
pub fn tail_str(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Cancellation latch shared between a job and its in-flight command.
///
/// Once [`ProcessSlot::terminate`] is called the flag stays set; the harness
/// signals the running child and any child later started on the same slot.
#[derive(Debug)]
pub struct ProcessSlot {
    terminated: watch::Sender<bool>,
    active_pid: Mutex<Option<u32>>,
}

impl ProcessSlot {
    /// Fresh, un-terminated slot.
    pub fn new() -> Self {
        let (terminated, _receiver) = watch::channel(false);
        Self {
            terminated,
            active_pid: Mutex::new(None),
        }
    }

    /// Request graceful termination of the current and any future child.
    pub fn terminate(&self) {
        self.terminated.send_replace(true);
        if let Some(pid) = self.active_pid() {
            tracing::info!(pid, "termination requested for running command");
        }
    }

    /// Whether termination was requested.
    pub fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Pid of the child currently running on this slot.
    pub fn active_pid(&self) -> Option<u32> {
        *self.active_pid.lock_ignore_poison()
    }

    /// Resolves once termination is requested.
    pub async fn wait_terminated(&self) {
        let mut receiver = self.terminated.subscribe();
        if receiver.wait_for(|flag| *flag).await.is_err() {
            // Sender lives as long as the slot; never fires.
            pending::<()>().await;
        }
    }

    fn set_active(&self, pid: Option<u32>) {
        *self.active_pid.lock_ignore_poison() = pid;
    }
}

impl Default for ProcessSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs logical commands in a working directory.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `working_dir`.
    ///
    /// Never fails: problems starting or finishing the process are folded
    /// into an unsuccessful [`CommandOutput`].
    async fn run(
        &self,
        working_dir: &Path,
        command: &LogicalCommand,
        description: &str,
        slot: &ProcessSlot,
    ) -> CommandOutput;
}

/// Build the `PATH` handed to children: standard locations, configured
/// extras, then whatever was inherited. Duplicates keep their first position.
pub fn build_search_path(extra: &[PathBuf], inherited: Option<&OsStr>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    let candidates = STANDARD_PATHS
        .iter()
        .map(PathBuf::from)
        .chain(extra.iter().cloned())
        .chain(inherited.map(env::split_paths).into_iter().flatten());
    for dir in candidates {
        if !dir.as_os_str().is_empty() && !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

/// Interleaved output capped at a byte limit.
#[derive(Debug)]
struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(limit.min(64 * 1024)),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.truncated {
            return;
        }
        let remaining = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() <= remaining {
            self.bytes.extend_from_slice(chunk);
        } else {
            self.bytes.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
        }
    }

    fn take_text(&mut self) -> String {
        let mut text = String::from_utf8_lossy(&take(&mut self.bytes)).into_owned();
        if self.truncated {
            append_marker(&mut text, TRUNCATION_MARKER);
        }
        text
    }
}

fn append_marker(text: &mut String, marker: &str) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(marker);
}

/// Copy a pipe into the shared buffer, draining it past the cap.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, buffer: Arc<Mutex<OutputBuffer>>) -> IoResult<()> {
    let mut chunk = [0_u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buffer.lock_ignore_poison().push(&chunk[..read]);
    }
}

enum Outcome {
    Exited(IoResult<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawns resolved tool invocations under the configured limits.
#[derive(Debug)]
pub struct ProcessHarness {
    config: HarnessConfig,
    resolver: ToolResolver,
    search_path: OsString,
}

impl ProcessHarness {
    /// Create a harness whose resolver probes the same `PATH` children get.
    pub fn new(config: HarnessConfig, tooling: &ToolingConfig) -> Self {
        let dirs = build_search_path(&config.extra_path, env::var_os("PATH").as_deref());
        let resolver = ToolResolver::new(tooling, dirs);
        Self::with_resolver(config, resolver)
    }

    /// Create a harness around an existing resolver.
    pub fn with_resolver(config: HarnessConfig, resolver: ToolResolver) -> Self {
        let search_path = env::join_paths(resolver.search_path()).unwrap_or_else(|error| {
            tracing::warn!(%error, "search path has an invalid entry, using standard locations");
            OsString::from(STANDARD_PATHS.join(":"))
        });
        Self {
            config,
            resolver,
            search_path,
        }
    }

    /// Resolver used for logical commands.
    pub fn resolver(&self) -> &ToolResolver {
        &self.resolver
    }

    /// Limits in effect.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run an explicit program with an explicit argument list.
    pub async fn run_program(
        &self,
        working_dir: &Path,
        program: &str,
        args: &[String],
        description: &str,
        slot: &ProcessSlot,
    ) -> CommandOutput {
        let started = Instant::now();
        tracing::info!(
            command = description,
            program,
            args = ?args,
            cwd = %working_dir.display(),
            "running command"
        );

        let mut command = self.command(working_dir, program, args);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                let message = if error.kind() == ErrorKind::NotFound {
                    format!("{description} failed: command not found: {program}")
                } else {
                    format!("{description} failed: could not start {program}: {error}")
                };
                tracing::warn!(command = description, %error, "spawn failed");
                return CommandOutput::not_started(message, started.elapsed());
            }
        };
        slot.set_active(child.id());

        let buffer = Arc::new(Mutex::new(OutputBuffer::new(self.config.max_output_bytes)));
        let readers: Vec<JoinHandle<IoResult<()>>> = [
            child
                .stdout
                .take()
                .map(|stdout| tokio::spawn(pump(stdout, Arc::clone(&buffer)))),
            child
                .stderr
                .take()
                .map(|stderr| tokio::spawn(pump(stderr, Arc::clone(&buffer)))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            () = sleep(self.config.command_timeout()) => Outcome::TimedOut,
            () = slot.wait_terminated() => Outcome::Cancelled,
        };

        let (status, marker, timed_out) = match outcome {
            Outcome::Exited(Ok(status)) => (Some(status), None, false),
            Outcome::Exited(Err(error)) => {
                tracing::warn!(command = description, %error, "waiting on child failed");
                (None, None, false)
            }
            Outcome::TimedOut => {
                tracing::warn!(
                    command = description,
                    timeout_secs = self.config.command_timeout_seconds,
                    "command timed out, terminating"
                );
                (self.terminate(&mut child).await, Some(TIMEOUT_MARKER), true)
            }
            Outcome::Cancelled => {
                tracing::info!(command = description, "job cancelled, terminating command");
                (self.terminate(&mut child).await, Some(CANCELLED_MARKER), false)
            }
        };
        slot.set_active(None);

        for reader in readers {
            collect_reader(reader, description).await;
        }

        let mut output = buffer.lock_ignore_poison().take_text();
        if let Some(marker) = marker {
            append_marker(&mut output, marker);
        }

        let exit_code = status.as_ref().and_then(ExitStatus::code);
        let success = marker.is_none() && status.as_ref().is_some_and(ExitStatus::success);
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(command = description, success, ?exit_code, duration_ms, "command finished");

        CommandOutput {
            success,
            output,
            exit_code,
            duration_ms,
            timed_out,
        }
    }

    fn command(&self, working_dir: &Path, program: &str, args: &[String]) -> Command {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .env_clear()
            .env("PATH", &self.search_path)
            .env("CI", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        for name in &self.config.passthrough_env {
            if let Some(value) = env::var_os(name) {
                command.env(name, value);
            }
        }
        command
    }

    /// Send the graceful signal and wait a bounded time for exit.
    async fn terminate(&self, child: &mut Child) -> Option<ExitStatus> {
        send_terminate(child);

        match timeout(self.config.termination_grace(), child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(error)) => {
                tracing::warn!(%error, "waiting on terminated child failed");
                None
            }
            Err(_elapsed) => {
                tracing::warn!(
                    pid = child.id(),
                    grace_secs = self.config.termination_grace_seconds,
                    "child still running after termination signal"
                );
                None
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessHarness {
    async fn run(
        &self,
        working_dir: &Path,
        command: &LogicalCommand,
        description: &str,
        slot: &ProcessSlot,
    ) -> CommandOutput {
        let invocation = self.resolver.resolve(command);
        self.run_program(working_dir, &invocation.program, &invocation.args, description, slot)
            .await
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(error) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::warn!(pid = raw, %error, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    if let Err(error) = child.start_kill() {
        tracing::warn!(%error, "failed to terminate child");
    }
}

async fn collect_reader(reader: JoinHandle<IoResult<()>>, description: &str) {
    let abort = reader.abort_handle();
    match timeout(IO_CAPTURE_TIMEOUT, reader).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => tracing::warn!(command = description, %error, "output capture failed"),
        Ok(Err(error)) => tracing::warn!(command = description, %error, "output reader task failed"),
        Err(_elapsed) => {
            tracing::warn!(command = description, "output capture timed out");
            abort.abort();
        }
    }
}
