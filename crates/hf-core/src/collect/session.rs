//! Line-oriented interactive sessions with a child process.
//!
//! Used by the query client to hold one engine process open across a
//! readiness handshake and the real query.

use super::tool_runner::{append_capped, terminate, ToolError, ToolOutput, ToolSpec};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How long to keep collecting output after the child exits.
///
/// Grandchildren that inherited the pipes may hold them open indefinitely.
const POST_EXIT_DRAIN: Duration = Duration::from_millis(200);

/// A running child process accepting input line by line.
pub trait InteractiveSession: Send {
    /// Write `input` to the child's stdin and flush.
    fn send(&mut self, input: &str) -> Result<(), ToolError>;

    /// Read stdout until `marker` appears, returning everything up to and
    /// including the marker.
    ///
    /// Returns whatever was buffered if the child closes stdout first, and
    /// `Timeout` if neither happens within `timeout`.
    fn read_until(&mut self, marker: &str, timeout: Duration) -> Result<String, ToolError>;

    /// Close stdin, wait for exit, and return the remaining output.
    ///
    /// The child is killed and `Timeout` returned if it outlives `timeout`.
    fn finish(self: Box<Self>, timeout: Duration) -> Result<ToolOutput, ToolError>;
}

/// Session backed by a real OS process.
pub struct ProcessSession {
    command: String,
    args: Vec<String>,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout_rx: Receiver<Vec<u8>>,
    stderr_rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    stderr_buf: Vec<u8>,
    max_output: usize,
    truncated: bool,
    started: Instant,
    reaped: bool,
}

impl ProcessSession {
    pub(crate) fn start(spec: &ToolSpec, mut child: Child, max_output: usize) -> Self {
        let stdin = child.stdin.take();
        let stdout_rx = spawn_reader(child.stdout.take());
        let stderr_rx = spawn_reader(child.stderr.take());

        Self {
            command: spec.command.clone(),
            args: spec.args.clone(),
            child,
            stdin,
            stdout_rx,
            stderr_rx,
            pending: Vec::new(),
            stderr_buf: Vec::new(),
            max_output,
            truncated: false,
            started: Instant::now(),
            reaped: false,
        }
    }

    fn drain_stderr(&mut self) {
        while let Ok(chunk) = self.stderr_rx.try_recv() {
            append_capped(
                &mut self.stderr_buf,
                &chunk,
                self.max_output,
                &mut self.truncated,
            );
        }
    }

    fn timeout_error(&self, timeout: Duration) -> ToolError {
        ToolError::Timeout {
            command: self.command.clone(),
            timeout,
        }
    }

    /// Collect output that is still in flight after the child exited.
    fn drain_after_exit(&mut self) {
        let deadline = Instant::now() + POST_EXIT_DRAIN;
        let mut stdout_open = true;
        while stdout_open {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.stdout_rx.recv_timeout(remaining) {
                Ok(chunk) => append_capped(
                    &mut self.pending,
                    &chunk,
                    self.max_output,
                    &mut self.truncated,
                ),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => stdout_open = false,
            }
        }
        self.drain_stderr();
    }
}

impl InteractiveSession for ProcessSession {
    fn send(&mut self, input: &str) -> Result<(), ToolError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| ToolError::LaunchFailed {
            command: self.command.clone(),
            cause: "stdin already closed".to_string(),
        })?;
        trace!(command = %self.command, bytes = input.len(), "session send");
        stdin.write_all(input.as_bytes())?;
        stdin.flush()?;
        Ok(())
    }

    fn read_until(&mut self, marker: &str, timeout: Duration) -> Result<String, ToolError> {
        let deadline = Instant::now() + timeout;
        let needle = marker.as_bytes();

        loop {
            self.drain_stderr();

            if let Some(pos) = find(&self.pending, needle) {
                let end = pos + needle.len();
                let head: Vec<u8> = self.pending.drain(..end).collect();
                return Ok(String::from_utf8_lossy(&head).into_owned());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timeout_error(timeout));
            }

            match self.stdout_rx.recv_timeout(remaining) {
                Ok(chunk) => append_capped(
                    &mut self.pending,
                    &chunk,
                    self.max_output,
                    &mut self.truncated,
                ),
                Err(RecvTimeoutError::Timeout) => return Err(self.timeout_error(timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    debug!(command = %self.command, "stdout closed before marker");
                    let rest = std::mem::take(&mut self.pending);
                    return Ok(String::from_utf8_lossy(&rest).into_owned());
                }
            }
        }
    }

    fn finish(mut self: Box<Self>, timeout: Duration) -> Result<ToolOutput, ToolError> {
        // EOF on stdin ends the engine's shell loop
        self.stdin.take();

        let deadline = Instant::now() + timeout;
        let status = loop {
            while let Ok(chunk) = self.stdout_rx.try_recv() {
                append_capped(
                    &mut self.pending,
                    &chunk,
                    self.max_output,
                    &mut self.truncated,
                );
            }
            self.drain_stderr();

            match self.child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    warn!(command = %self.command, "session did not exit in time");
                    terminate(&mut self.child);
                    self.reaped = true;
                    return Err(self.timeout_error(timeout));
                }
                None => thread::sleep(Duration::from_millis(10)),
            }
        };
        self.reaped = true;
        self.drain_after_exit();

        let duration = self.started.elapsed();
        debug!(
            command = %self.command,
            exit_code = ?status.code(),
            duration_ms = duration.as_millis() as u64,
            "session finished"
        );

        Ok(ToolOutput {
            command: std::mem::take(&mut self.command),
            args: std::mem::take(&mut self.args),
            stdout: std::mem::take(&mut self.pending),
            stderr: std::mem::take(&mut self.stderr_buf),
            exit_code: status.code(),
            truncated: self.truncated,
            duration,
        })
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        self.stdin.take();
        if let Ok(None) = self.child.try_wait() {
            debug!(command = %self.command, "killing abandoned session");
            terminate(&mut self.child);
        } else {
            let _ = self.child.wait();
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut stream) = stream {
        thread::spawn(move || {
            let mut chunk = vec![0u8; 8192];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
    rx
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{CommandRunner, ToolRunnerBuilder};

    fn cat_session() -> Box<dyn InteractiveSession> {
        let runner = ToolRunnerBuilder::new().build();
        runner
            .open_session(&ToolSpec::new("cat", vec![]))
            .expect("cat should start")
    }

    #[test]
    fn test_read_until_marker() {
        let mut session = cat_session();
        session.send("first line\nready-1\nleftover\n").unwrap();

        let head = session
            .read_until("ready-1", Duration::from_secs(5))
            .unwrap();
        assert_eq!(head, "first line\nready-1");

        let output = session.finish(Duration::from_secs(5)).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_text().unwrap(), "\nleftover\n");
    }

    #[test]
    fn test_read_until_times_out() {
        let mut session = cat_session();
        session.send("nothing useful\n").unwrap();
        let result = session.read_until("never-printed", Duration::from_millis(100));
        assert!(matches!(result, Err(ToolError::Timeout { .. })));
    }

    #[test]
    fn test_finish_kills_hung_child() {
        let runner = ToolRunnerBuilder::new().build();
        let session = runner
            .open_session(&ToolSpec::new(
                "sh",
                vec!["-c".into(), "exec sleep 30".into()],
            ))
            .unwrap();

        let start = Instant::now();
        let result = session.finish(Duration::from_millis(100));
        assert!(matches!(result, Err(ToolError::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_read_until_returns_buffer_on_eof() {
        let runner = ToolRunnerBuilder::new().build();
        let mut session = runner
            .open_session(&ToolSpec::new(
                "sh",
                vec!["-c".into(), "echo partial".into()],
            ))
            .unwrap();

        let text = session
            .read_until("missing-marker", Duration::from_secs(5))
            .unwrap();
        assert_eq!(text, "partial\n");
    }

    #[test]
    fn test_read_until_respects_output_cap() {
        let runner = ToolRunnerBuilder::new().build();
        let mut session = runner
            .open_session(&ToolSpec::new("cat", vec![]).with_max_output(16))
            .unwrap();
        session.send(&format!("{}\n", "x".repeat(64))).unwrap();

        let result = session.read_until("never-printed", Duration::from_millis(300));
        assert!(matches!(result, Err(ToolError::Timeout { .. })));

        let output = session.finish(Duration::from_secs(5)).unwrap();
        assert!(output.truncated);
        assert!(output.stdout.len() <= 16);
    }

    #[test]
    fn test_find() {
        assert_eq!(find(b"abc=> mdm", b"=> mdm"), Some(3));
        assert_eq!(find(b"abc", b"zz"), None);
    }
}
