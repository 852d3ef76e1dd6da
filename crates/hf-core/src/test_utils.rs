//! Scripted command runner for tests.
//!
//! [`ScriptedRunner`] implements [`CommandRunner`] without spawning anything.
//! It answers one-shot invocations from an ordered rule list (first match
//! wins) and opens [`ScriptedSession`]s that emulate the engine's interactive
//! shell closely enough for the extension readiness handshake. Every
//! invocation and every line sent to a session is recorded for assertions.

use crate::collect::{CommandRunner, InteractiveSession, ToolError, ToolOutput, ToolSpec};
use crate::probe::FallbackExecutor;
use crate::query::{QueryClient, QueryOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Engine binary name used by scripted executors.
pub const SCRIPTED_ENGINE: &str = "osqueryi";

/// Extension path used by scripted executors with the extension enabled.
pub const SCRIPTED_EXTENSION: &str = "/opt/hostfacts/hostfacts.ext";

/// Canned outcome of a one-shot invocation.
#[derive(Debug, Clone)]
pub enum Reply {
    Output {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    LaunchFailed(String),
    Timeout,
    Panic,
}

impl Reply {
    pub fn stdout(text: impl Into<String>) -> Self {
        Reply::Output {
            stdout: text.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Reply::Output {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    fn produce(&self, spec: &ToolSpec) -> Result<ToolOutput, ToolError> {
        match self {
            Reply::Output {
                stdout,
                stderr,
                exit_code,
            } => Ok(ToolOutput {
                command: spec.command.clone(),
                args: spec.args.clone(),
                stdout: stdout.clone().into_bytes(),
                stderr: stderr.clone().into_bytes(),
                exit_code: Some(*exit_code),
                truncated: false,
                duration: Duration::from_millis(1),
            }),
            Reply::LaunchFailed(cause) => Err(ToolError::LaunchFailed {
                command: spec.command.clone(),
                cause: cause.clone(),
            }),
            Reply::Timeout => Err(ToolError::Timeout {
                command: spec.command.clone(),
                timeout: spec.timeout.unwrap_or(Duration::from_secs(1)),
            }),
            Reply::Panic => panic!("scripted panic for {}", spec.command),
        }
    }
}

type Matcher = Box<dyn Fn(&ToolSpec) -> bool + Send + Sync>;

struct Rule {
    matcher: Matcher,
    reply: Reply,
}

/// Whether `spec` is a fast-path engine query containing `fragment`.
pub fn is_query(spec: &ToolSpec, fragment: &str) -> bool {
    spec.args.len() == 2 && spec.args[0] == "--json" && spec.args[1].contains(fragment)
}

/// Whether `spec` is a shell probe whose script contains `fragment`.
pub fn is_shell(spec: &ToolSpec, fragment: &str) -> bool {
    spec.args.len() == 2 && spec.args[0] == "-c" && spec.args[1].contains(fragment)
}

/// Spy runner with canned replies.
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    session: Option<SessionScript>,
    calls: Mutex<Vec<ToolSpec>>,
    sessions: Mutex<Vec<(ToolSpec, Arc<Mutex<Vec<String>>>)>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            session: None,
            calls: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Add a rule. Unmatched invocations fail to launch.
    pub fn on<F>(mut self, matcher: F, reply: Reply) -> Self
    where
        F: Fn(&ToolSpec) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            reply,
        });
        self
    }

    /// Answer fast-path queries containing `fragment` with `rows_json`.
    pub fn on_query(self, fragment: &str, rows_json: &str) -> Self {
        let fragment = fragment.to_string();
        self.on(move |s| is_query(s, &fragment), Reply::stdout(rows_json))
    }

    /// Fail fast-path queries containing `fragment` with a nonzero exit.
    pub fn fail_query(self, fragment: &str, stderr: &str) -> Self {
        let fragment = fragment.to_string();
        self.on(move |s| is_query(s, &fragment), Reply::failure(1, stderr))
    }

    /// Answer shell probes whose script contains `fragment`.
    pub fn on_shell(self, fragment: &str, stdout: &str) -> Self {
        let fragment = fragment.to_string();
        self.on(move |s| is_shell(s, &fragment), Reply::stdout(stdout))
    }

    /// Answer invocations of `command` (by file name) regardless of arguments.
    pub fn on_command(self, command: &str, reply: Reply) -> Self {
        let command = command.to_string();
        self.on(
            move |s| {
                std::path::Path::new(&s.command)
                    .file_name()
                    .map(|n| n.to_string_lossy() == command.as_str())
                    .unwrap_or(false)
            },
            reply,
        )
    }

    /// Script for every interactive session opened on this runner.
    pub fn with_session(mut self, script: SessionScript) -> Self {
        self.session = Some(script);
        self
    }

    /// One-shot invocations seen so far.
    pub fn calls(&self) -> Vec<ToolSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Specs of sessions opened so far.
    pub fn session_specs(&self) -> Vec<ToolSpec> {
        self.sessions
            .lock()
            .map(|s| s.iter().map(|(spec, _)| spec.clone()).collect())
            .unwrap_or_default()
    }

    /// Everything sent to each session, in session order.
    pub fn session_inputs(&self) -> Vec<Vec<String>> {
        self.sessions
            .lock()
            .map(|s| {
                s.iter()
                    .map(|(_, log)| log.lock().map(|l| l.clone()).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every argument list handed to the engine, one-shot and interactive.
    pub fn engine_invocations(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .chain(self.session_specs())
            .filter(|s| s.command.ends_with(SCRIPTED_ENGINE))
            .map(|s| s.args)
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &ToolSpec) -> Result<ToolOutput, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        match self.rules.iter().find(|r| (r.matcher)(spec)) {
            Some(rule) => rule.reply.produce(spec),
            None => Err(ToolError::LaunchFailed {
                command: spec.command.clone(),
                cause: "no scripted reply".to_string(),
            }),
        }
    }

    fn open_session(&self, spec: &ToolSpec) -> Result<Box<dyn InteractiveSession>, ToolError> {
        let Some(script) = self.session.clone() else {
            return Err(ToolError::LaunchFailed {
                command: spec.command.clone(),
                cause: "no scripted session".to_string(),
            });
        };
        let log = Arc::new(Mutex::new(Vec::new()));
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push((spec.clone(), log.clone()));
        }
        Ok(Box::new(ScriptedSession::new(script, log)))
    }
}

/// Behavior of scripted interactive sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    tables: Vec<String>,
    ready_after: usize,
    replies: Vec<(String, String)>,
    stderr: String,
    hang_on_finish: bool,
    silent_handshake: bool,
}

impl SessionScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables listed by `.tables` once the extension is "ready".
    pub fn tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Number of `.tables` checks that list nothing before tables appear.
    pub fn ready_after(mut self, checks: usize) -> Self {
        self.ready_after = checks;
        self
    }

    /// Append `stdout` when a sent line contains `fragment`.
    pub fn reply(mut self, fragment: &str, stdout: &str) -> Self {
        self.replies.push((fragment.to_string(), stdout.to_string()));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.to_string();
        self
    }

    /// Never answer handshake marker rows.
    pub fn silent_handshake(mut self) -> Self {
        self.silent_handshake = true;
        self
    }

    /// Never exit; `finish` times out.
    pub fn hang_on_finish(mut self) -> Self {
        self.hang_on_finish = true;
        self
    }
}

/// Emulated engine shell.
pub struct ScriptedSession {
    script: SessionScript,
    log: Arc<Mutex<Vec<String>>>,
    pending: String,
    checks: usize,
    closed: bool,
}

impl ScriptedSession {
    fn new(script: SessionScript, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            script,
            log,
            pending: String::new(),
            checks: 0,
            closed: false,
        }
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if let Some(table) = line.strip_prefix(".tables") {
            self.checks += 1;
            let table = table.trim();
            if self.checks > self.script.ready_after
                && self.script.tables.iter().any(|t| t == table)
            {
                self.pending.push_str(&format!("  => {}\n", table));
            }
        } else if line.contains("AS hf_marker") {
            if self.script.silent_handshake {
                return;
            }
            if let Some(marker) = line.split('\'').nth(1) {
                self.pending
                    .push_str(&format!("[\n  {{\"hf_marker\":\"{}\"}}\n]\n", marker));
            }
        } else if line == ".exit" {
            self.closed = true;
        } else {
            for (fragment, stdout) in &self.script.replies {
                if line.contains(fragment.as_str()) {
                    self.pending.push_str(stdout);
                    self.pending.push('\n');
                }
            }
        }
    }
}

impl InteractiveSession for ScriptedSession {
    fn send(&mut self, input: &str) -> Result<(), ToolError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(input.to_string());
        }
        for line in input.lines() {
            self.handle_line(line);
        }
        Ok(())
    }

    fn read_until(&mut self, marker: &str, timeout: Duration) -> Result<String, ToolError> {
        if let Some(pos) = self.pending.find(marker) {
            let end = pos + marker.len();
            return Ok(self.pending.drain(..end).collect());
        }
        if self.closed {
            return Ok(std::mem::take(&mut self.pending));
        }
        Err(ToolError::Timeout {
            command: SCRIPTED_ENGINE.to_string(),
            timeout,
        })
    }

    fn finish(self: Box<Self>, timeout: Duration) -> Result<ToolOutput, ToolError> {
        if self.script.hang_on_finish {
            return Err(ToolError::Timeout {
                command: SCRIPTED_ENGINE.to_string(),
                timeout,
            });
        }
        Ok(ToolOutput {
            command: SCRIPTED_ENGINE.to_string(),
            args: Vec::new(),
            stdout: self.pending.into_bytes(),
            stderr: self.script.stderr.into_bytes(),
            exit_code: Some(0),
            truncated: false,
            duration: Duration::from_millis(1),
        })
    }
}

/// Query options pointing at the scripted engine.
pub fn scripted_options(extension: bool) -> QueryOptions {
    let options = QueryOptions::new(SCRIPTED_ENGINE)
        .with_timeout(Duration::from_secs(5))
        .with_ready_timeout(Duration::from_secs(2));
    if extension {
        options.with_extension(SCRIPTED_EXTENSION)
    } else {
        options
    }
}

/// Executor wired to `runner` for both queries and shell probes.
pub fn scripted_executor(runner: &Arc<ScriptedRunner>, extension: bool) -> FallbackExecutor {
    let runner: Arc<dyn CommandRunner> = runner.clone();
    let client = Arc::new(QueryClient::new(runner.clone(), scripted_options(extension)));
    FallbackExecutor::new(client, runner, "/bin/sh", Duration::from_secs(5))
}
