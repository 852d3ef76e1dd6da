//! Subprocess runner with timeout, output cap, and launch controls.
//!
//! Every probe in hostfacts ends up here: query engine invocations, shell
//! probes, and hardware identity tools. The runner guarantees:
//!
//! - The caller is never blocked past the per-command timeout
//! - Timed-out commands are killed (SIGTERM → SIGKILL) and reaped
//! - No child is left running on any error path
//! - Output size is capped to prevent memory exhaustion
//! - Command paths are validated against shell injection
//!
//! There is no retry policy; retries and fallbacks belong to callers.
//!
//! # Example
//!
//! ```ignore
//! use hf_core::collect::{CommandRunner, ToolRunnerBuilder, ToolSpec};
//!
//! let runner = ToolRunnerBuilder::new().build();
//! let output = runner.run(&ToolSpec::new("sw_vers", vec!["-productVersion".into()]))?;
//! println!("{}", output.stdout_text()?.trim());
//! ```

use super::session::{InteractiveSession, ProcessSession};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, instrument, trace, warn};

/// Default timeout per command in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum output size in bytes (10MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Grace period between SIGTERM and SIGKILL in milliseconds.
const SIGTERM_GRACE_MS: u64 = 500;

/// Errors that can occur during command execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {command}: {cause}")]
    LaunchFailed { command: String, cause: String },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("output of {command} is not valid UTF-8: {cause}")]
    DecodeFailed { command: String, cause: String },

    #[error("invalid command path: {0}")]
    InvalidPath(String),

    #[error("command not in allowlist: {0}")]
    NotAllowed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ToolError> for hf_common::Error {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::LaunchFailed { command, cause } => {
                hf_common::Error::LaunchFailed { command, cause }
            }
            ToolError::Timeout { command, timeout } => {
                hf_common::Error::Timeout { command, timeout }
            }
            ToolError::DecodeFailed { cause, .. } => hf_common::Error::DecodeFailed(cause),
            ToolError::InvalidPath(path) | ToolError::NotAllowed(path) => {
                hf_common::Error::LaunchFailed {
                    command: path,
                    cause: "rejected by runner policy".to_string(),
                }
            }
            ToolError::Io(e) => hf_common::Error::Io(e),
        }
    }
}

/// Output from a completed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Command that was executed.
    pub command: String,

    /// Arguments passed to the command.
    pub args: Vec<String>,

    /// Standard output (may be truncated).
    pub stdout: Vec<u8>,

    /// Standard error (may be truncated).
    pub stderr: Vec<u8>,

    /// Exit code (None when terminated by a signal).
    pub exit_code: Option<i32>,

    /// Whether output was truncated.
    pub truncated: bool,

    /// Execution duration.
    pub duration: Duration,
}

impl ToolOutput {
    /// Decode stdout as UTF-8.
    pub fn stdout_text(&self) -> Result<&str, ToolError> {
        std::str::from_utf8(&self.stdout).map_err(|e| ToolError::DecodeFailed {
            command: self.command.clone(),
            cause: e.to_string(),
        })
    }

    /// Get stderr as string (lossy UTF-8 conversion).
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Configuration for the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Default timeout per command.
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,

    /// Maximum output size per stream in bytes.
    pub max_output_bytes: usize,

    /// Use nice to lower priority.
    pub use_nice: bool,

    /// Nice value (0-19, higher = lower priority).
    pub nice_value: i32,

    /// Allowed commands (empty = all allowed).
    pub allowed_commands: HashSet<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            use_nice: false,
            nice_value: 10,
            allowed_commands: HashSet::new(),
        }
    }
}

/// Specification for a command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Command to execute.
    pub command: String,

    /// Arguments to pass.
    pub args: Vec<String>,

    /// Bytes written to stdin before it is closed (None = null stdin).
    pub stdin: Option<Vec<u8>>,

    /// Override timeout (None = use default).
    pub timeout: Option<Duration>,

    /// Override max output (None = use default).
    pub max_output: Option<usize>,
}

impl ToolSpec {
    /// Create a new command specification.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            stdin: None,
            timeout: None,
            max_output: None,
        }
    }

    /// Feed the given bytes to stdin.
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Set custom timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set custom max output.
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = Some(max_output);
        self
    }

    /// Whether any argument equals `flag`.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

/// Executes external programs.
///
/// `ToolRunner` is the production implementation; tests substitute a
/// scripted spy to observe argument lists without spawning processes.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion (or until its timeout).
    fn run(&self, spec: &ToolSpec) -> Result<ToolOutput, ToolError>;

    /// Start a command with piped stdin for line-oriented interaction.
    ///
    /// The session's child is killed if the session is dropped unfinished.
    fn open_session(&self, spec: &ToolSpec) -> Result<Box<dyn InteractiveSession>, ToolError>;
}

/// Runner that spawns real OS processes.
#[derive(Debug, Default)]
pub struct ToolRunner {
    config: ToolConfig,
}

impl ToolRunner {
    /// Create a new runner with the given configuration.
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Run a single command with the given arguments.
    #[instrument(skip(self), fields(cmd = %cmd))]
    pub fn run_tool(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        let mut spec = ToolSpec::new(cmd, args.iter().map(|s| s.to_string()).collect());
        spec.timeout = timeout;
        self.run(&spec)
    }

    /// Validate that a command is allowed and safe to execute.
    fn validate_command(&self, cmd: &str) -> Result<(), ToolError> {
        if !self.config.allowed_commands.is_empty() {
            let basename = Path::new(cmd)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(cmd);

            if !self.config.allowed_commands.contains(cmd)
                && !self.config.allowed_commands.contains(basename)
            {
                return Err(ToolError::NotAllowed(cmd.to_string()));
            }
        }

        if cmd.is_empty() {
            return Err(ToolError::InvalidPath("empty command".to_string()));
        }

        if cmd.contains(['|', '&', ';', '$', '`', '\n', '\r']) {
            return Err(ToolError::InvalidPath(format!(
                "command contains shell metacharacters: {}",
                cmd
            )));
        }

        if cmd.starts_with('/') && !Path::new(cmd).exists() {
            return Err(ToolError::LaunchFailed {
                command: cmd.to_string(),
                cause: "no such file".to_string(),
            });
        }

        Ok(())
    }

    /// Build the command with the nice wrapper if configured.
    pub(crate) fn build_command(&self, cmd: &str, args: &[String]) -> Command {
        let mut command;

        #[cfg(unix)]
        if self.config.use_nice {
            command = Command::new("nice");
            command.arg("-n").arg(self.config.nice_value.to_string());
            command.arg(cmd);
        } else {
            command = Command::new(cmd);
        }

        #[cfg(not(unix))]
        {
            command = Command::new(cmd);
        }

        command.args(args);

        // Minimal environment so probe output is locale-stable
        command.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            command.env("PATH", path);
        }
        if let Ok(home) = std::env::var("HOME") {
            command.env("HOME", home);
        }
        command.env("LC_ALL", "C");
        command.env("LANG", "C");

        command
    }

    fn spawn(&self, spec: &ToolSpec, command: &mut Command) -> Result<Child, ToolError> {
        let stdin = if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        command
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!(command = %spec.command, error = %e, "failed to spawn");
                ToolError::LaunchFailed {
                    command: spec.command.clone(),
                    cause: e.to_string(),
                }
            })
    }

    /// Execute a child process with timeout and output capture.
    ///
    /// Returns `(stdout, stderr, exit_code, truncated)`, or `Timeout` after
    /// the child has been killed and reaped.
    #[allow(clippy::type_complexity)]
    fn execute_with_timeout(
        &self,
        child: &mut Child,
        command: &str,
        timeout: Duration,
        max_output: usize,
    ) -> Result<(Vec<u8>, Vec<u8>, Option<i32>, bool), ToolError> {
        let deadline = Instant::now() + timeout;
        let mut stdout_buf = Vec::with_capacity(max_output.min(65536));
        let mut stderr_buf = Vec::with_capacity(max_output.min(65536));
        let mut truncated = false;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let mut chunk = vec![0u8; 8192];

        loop {
            if Instant::now() >= deadline {
                warn!(command, "command timed out, sending SIGTERM");
                terminate(child);
                return Err(ToolError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }

            let mut did_read = false;

            if let Some(ref mut out) = stdout {
                if let Ok(n) = try_read_nonblocking(out, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        append_capped(&mut stdout_buf, &chunk[..n], max_output, &mut truncated);
                    }
                }
            }

            if let Some(ref mut err) = stderr {
                if let Ok(n) = try_read_nonblocking(err, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        append_capped(&mut stderr_buf, &chunk[..n], max_output, &mut truncated);
                    }
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    // Process exited, drain remaining output
                    if let Some(ref mut out) = stdout {
                        let _ = drain_to_limit(out, &mut stdout_buf, max_output, &mut truncated);
                    }
                    if let Some(ref mut err) = stderr {
                        let _ = drain_to_limit(err, &mut stderr_buf, max_output, &mut truncated);
                    }

                    let exit_code = status.code();
                    trace!(exit_code = ?exit_code, "process exited");
                    return Ok((stdout_buf, stderr_buf, exit_code, truncated));
                }
                Ok(None) => {
                    if !did_read {
                        thread::sleep(Duration::from_millis(10));
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to wait for child");
                    terminate(child);
                    return Err(ToolError::Io(e));
                }
            }
        }
    }
}

impl CommandRunner for ToolRunner {
    #[instrument(skip(self, spec), fields(cmd = %spec.command))]
    fn run(&self, spec: &ToolSpec) -> Result<ToolOutput, ToolError> {
        self.validate_command(&spec.command)?;

        let timeout = spec.timeout.unwrap_or(self.config.default_timeout);
        let max_output = spec.max_output.unwrap_or(self.config.max_output_bytes);

        debug!(
            command = %spec.command,
            args = ?spec.args,
            timeout_ms = timeout.as_millis() as u64,
            stdin_bytes = spec.stdin.as_ref().map(|s| s.len()).unwrap_or(0),
            "running command"
        );

        let start = Instant::now();
        let mut command = self.build_command(&spec.command, &spec.args);
        let mut child = self.spawn(spec, &mut command)?;

        // Feed stdin from a helper thread so a chatty child cannot deadlock us
        let writer = match (spec.stdin.clone(), child.stdin.take()) {
            (Some(input), Some(mut pipe)) => Some(thread::spawn(move || {
                if let Err(e) = pipe.write_all(&input) {
                    trace!(error = %e, "stdin closed before all input was written");
                }
            })),
            _ => None,
        };

        let result = self.execute_with_timeout(&mut child, &spec.command, timeout, max_output);

        if let Some(handle) = writer {
            let _ = handle.join();
        }

        let duration = start.elapsed();
        debug!(
            command = %spec.command,
            duration_ms = duration.as_millis() as u64,
            success = result.is_ok(),
            "command complete"
        );

        let (stdout, stderr, exit_code, truncated) = result?;
        Ok(ToolOutput {
            command: spec.command.clone(),
            args: spec.args.clone(),
            stdout,
            stderr,
            exit_code,
            truncated,
            duration,
        })
    }

    #[instrument(skip(self, spec), fields(cmd = %spec.command))]
    fn open_session(&self, spec: &ToolSpec) -> Result<Box<dyn InteractiveSession>, ToolError> {
        self.validate_command(&spec.command)?;

        let mut command = self.build_command(&spec.command, &spec.args);
        let child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::LaunchFailed {
                command: spec.command.clone(),
                cause: e.to_string(),
            })?;

        debug!(command = %spec.command, args = ?spec.args, pid = child.id(), "session started");
        let max_output = spec.max_output.unwrap_or(self.config.max_output_bytes);
        Ok(Box::new(ProcessSession::start(spec, child, max_output)))
    }
}

/// Append `data` to `buf` without exceeding `max` bytes.
pub(crate) fn append_capped(buf: &mut Vec<u8>, data: &[u8], max: usize, truncated: &mut bool) {
    let space = max.saturating_sub(buf.len());
    if space > 0 {
        let to_copy = data.len().min(space);
        buf.extend_from_slice(&data[..to_copy]);
        if data.len() > space {
            *truncated = true;
        }
    } else if !data.is_empty() {
        *truncated = true;
    }
}

/// Drain remaining data from a stream up to the limit.
///
/// Uses non-blocking reads to avoid hanging on grandchild processes
/// that may still hold the pipe open after the direct child exits.
fn drain_to_limit<R: Read + AsFd>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    loop {
        if *truncated {
            break;
        }
        match try_read_nonblocking(stream, &mut chunk) {
            Ok(0) => break,
            Ok(n) => append_capped(buf, &chunk[..n], max, truncated),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Kill a process with SIGTERM, then SIGKILL after the grace period, and reap it.
#[cfg(unix)]
pub(crate) fn terminate(child: &mut Child) {
    let pid = child.id() as i32;

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM");

    let grace_deadline = Instant::now() + Duration::from_millis(SIGTERM_GRACE_MS);
    while Instant::now() < grace_deadline {
        match child.try_wait() {
            Ok(Some(_)) => {
                trace!(pid, "process exited after SIGTERM");
                return;
            }
            Ok(None) => thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                error!(pid, error = %e, "failed to check process status");
                break;
            }
        }
    }

    warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
pub(crate) fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
use std::os::unix::io::AsRawFd as AsFd;

#[cfg(not(unix))]
trait AsFd {}
#[cfg(not(unix))]
impl<T> AsFd for T {}

/// Try to read from a stream without blocking.
///
/// Sets O_NONBLOCK for the duration of a single read, then restores the
/// original flags. Returns Ok(0) if no data is available.
#[cfg(unix)]
fn try_read_nonblocking<R: Read + AsFd>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

/// Blocking read fallback for non-Unix platforms.
#[cfg(not(unix))]
fn try_read_nonblocking<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    stream.read(buf)
}

/// Builder for creating a runner with custom configuration.
#[derive(Debug, Default)]
pub struct ToolRunnerBuilder {
    config: ToolConfig,
}

impl ToolRunnerBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Set the maximum output size.
    pub fn max_output(mut self, max_bytes: usize) -> Self {
        self.config.max_output_bytes = max_bytes;
        self
    }

    /// Enable or disable nice.
    pub fn use_nice(mut self, enable: bool) -> Self {
        self.config.use_nice = enable;
        self
    }

    /// Set the nice value.
    pub fn nice_value(mut self, value: i32) -> Self {
        self.config.nice_value = value;
        self
    }

    /// Add allowed commands (restrict to only these).
    pub fn allow_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for cmd in commands {
            self.config.allowed_commands.insert(cmd.into());
        }
        self
    }

    /// Build the runner.
    pub fn build(self) -> ToolRunner {
        ToolRunner::new(self.config)
    }
}

// Duration serialized as integer milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
