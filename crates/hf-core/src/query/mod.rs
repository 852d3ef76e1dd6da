//! Structured query engine client.
//!
//! Queries run on one of two paths:
//!
//! - **Fast path**: `engine --json <query>` as a one-shot process. Used when
//!   no extension is configured or the query names no extension table.
//! - **Extension path**: an interactive engine session started with the
//!   extension loaded. The client polls `.tables` until the extension has
//!   registered its tables, then feeds the query and reads the rows back.
//!
//! Failures are classified and returned; the client never retries.

pub mod extension;
pub mod output;

pub use extension::{
    ExtensionLocator, ExtensionSocket, ExtensionTableSet, DEFAULT_EXTENSION_TABLES,
};

use crate::collect::{CommandRunner, InteractiveSession, ToolError, ToolSpec};
use hf_config::AgentConfig;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// One result row: column name to string value.
pub type Row = BTreeMap<String, String>;

/// Ordered rows; empty is a valid result.
pub type QueryResult = Vec<Row>;

/// Value passed to the engine's `--extensions_timeout`.
pub const EXTENSIONS_TIMEOUT_SECS: u64 = 15;

/// First delay between readiness checks.
pub const READY_POLL_INITIAL: Duration = Duration::from_millis(250);

/// Backoff ceiling between readiness checks.
pub const READY_POLL_MAX: Duration = Duration::from_secs(2);

/// Column name of the handshake marker row.
const MARKER_COLUMN: &str = "hf_marker";

/// Wait for the tail of a marker row after the marker itself was seen.
const MARKER_TAIL_WAIT: Duration = Duration::from_millis(250);

/// Query client errors.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query execution failed: {0}")]
    ExecutionFailed(String),

    #[error("failed to launch query engine: {0}")]
    LaunchFailed(String),

    #[error("invalid engine output: {0}")]
    InvalidOutput(String),

    #[error("engine output could not be decoded: {0}")]
    DecodeFailed(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ToolError> for QueryError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::LaunchFailed { command, cause } => {
                QueryError::LaunchFailed(format!("{}: {}", command, cause))
            }
            ToolError::InvalidPath(msg) | ToolError::NotAllowed(msg) => {
                QueryError::LaunchFailed(msg)
            }
            ToolError::Timeout { timeout, .. } => QueryError::Timeout(timeout),
            ToolError::DecodeFailed { cause, .. } => QueryError::DecodeFailed(cause),
            ToolError::Io(e) => QueryError::ExecutionFailed(e.to_string()),
        }
    }
}

impl From<QueryError> for hf_common::Error {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::ExecutionFailed(msg) => hf_common::Error::ExecutionFailed(msg),
            QueryError::LaunchFailed(cause) => hf_common::Error::LaunchFailed {
                command: "query engine".to_string(),
                cause,
            },
            QueryError::InvalidOutput(msg) => hf_common::Error::InvalidOutput(msg),
            QueryError::DecodeFailed(msg) => hf_common::Error::DecodeFailed(msg),
            QueryError::Timeout(timeout) => hf_common::Error::Timeout {
                command: "query engine".to_string(),
                timeout,
            },
        }
    }
}

/// Settings the client reads once at construction.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub engine_path: PathBuf,
    /// Resolved extension binary; None disables the extension path.
    pub extension_path: Option<PathBuf>,
    pub timeout: Duration,
    pub ready_timeout: Duration,
    pub extension_tables: ExtensionTableSet,
}

impl QueryOptions {
    /// Options with the extension disabled.
    pub fn new(engine_path: impl Into<PathBuf>) -> Self {
        let defaults = AgentConfig::default();
        Self {
            engine_path: engine_path.into(),
            extension_path: None,
            timeout: defaults.probe_timeout(),
            ready_timeout: defaults.extension_ready_timeout(),
            extension_tables: ExtensionTableSet::default(),
        }
    }

    /// Build options from agent configuration, resolving the extension binary.
    pub fn from_config(config: &AgentConfig) -> Self {
        let extension_path = if config.extension_enabled {
            ExtensionLocator::for_current_process(config.extension_path.clone()).resolve()
        } else {
            None
        };
        if config.extension_enabled && extension_path.is_none() {
            debug!("no extension binary found; extension tables unavailable");
        }

        Self {
            engine_path: config.engine_path.clone(),
            extension_path,
            timeout: config.probe_timeout(),
            ready_timeout: config.extension_ready_timeout(),
            extension_tables: ExtensionTableSet::default(),
        }
    }

    pub fn with_extension(mut self, path: impl Into<PathBuf>) -> Self {
        self.extension_path = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// Client for the local structured query engine.
pub struct QueryClient {
    runner: Arc<dyn CommandRunner>,
    options: QueryOptions,
    /// Tables confirmed available; misses are never cached.
    confirmed_tables: RwLock<HashSet<String>>,
    marker_seq: AtomicU64,
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl QueryClient {
    pub fn new(runner: Arc<dyn CommandRunner>, options: QueryOptions) -> Self {
        Self {
            runner,
            options,
            confirmed_tables: RwLock::new(HashSet::new()),
            marker_seq: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn extension_path(&self) -> Option<&Path> {
        self.options.extension_path.as_deref()
    }

    /// Whether `query` would be sent down the extension path.
    pub fn uses_extension(&self, query: &str) -> bool {
        self.options.extension_path.is_some()
            && self.options.extension_tables.requires_extension(query)
    }

    /// Run a query and return its rows.
    #[instrument(skip(self), fields(extension = self.uses_extension(query)))]
    pub fn execute_query(&self, query: &str) -> Result<QueryResult, QueryError> {
        match self.options.extension_path.as_deref() {
            Some(ext) => {
                let tables = self.options.extension_tables.referenced_tables(query);
                if tables.is_empty() {
                    self.execute_fast(query)
                } else {
                    self.execute_with_extension(query, ext, &tables)
                }
            }
            None => self.execute_fast(query),
        }
    }

    /// Whether the engine currently exposes `table`.
    ///
    /// Positive answers are cached for the lifetime of the client.
    pub fn is_table_available(&self, table: &str) -> bool {
        let table = table.to_ascii_lowercase();
        if self.is_confirmed(&table) {
            return true;
        }

        let available = match self.options.extension_path.as_deref() {
            Some(ext) if self.options.extension_tables.contains(&table) => {
                self.probe_extension_table(ext, &table)
            }
            _ => self.probe_builtin_table(&table),
        };

        match available {
            Ok(true) => {
                self.confirm(&table);
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(table = %table, error = %e, "table availability probe failed");
                false
            }
        }
    }

    fn is_confirmed(&self, table: &str) -> bool {
        self.confirmed_tables
            .read()
            .map(|set| set.contains(table))
            .unwrap_or(false)
    }

    fn confirm(&self, table: &str) {
        if let Ok(mut set) = self.confirmed_tables.write() {
            set.insert(table.to_string());
        }
    }

    fn engine_command(&self) -> String {
        self.options.engine_path.to_string_lossy().into_owned()
    }

    fn execute_fast(&self, query: &str) -> Result<QueryResult, QueryError> {
        let spec = ToolSpec::new(
            self.engine_command(),
            vec!["--json".to_string(), query.to_string()],
        )
        .with_timeout(self.options.timeout);

        let output = self.runner.run(&spec)?;
        if !output.success() {
            let stderr = output.stderr_lossy();
            let message = match stderr.trim() {
                "" => format!("engine exited with {:?}", output.exit_code),
                msg => msg.to_string(),
            };
            return Err(QueryError::ExecutionFailed(message));
        }

        output::parse_rows(output.stdout_text()?)
    }

    fn extension_spec(&self, ext: &Path, socket: &ExtensionSocket) -> ToolSpec {
        ToolSpec::new(
            self.engine_command(),
            vec![
                "--json".to_string(),
                "--extension".to_string(),
                ext.to_string_lossy().into_owned(),
                "--extensions_timeout".to_string(),
                EXTENSIONS_TIMEOUT_SECS.to_string(),
                "--extensions_socket".to_string(),
                socket.path().to_string_lossy().into_owned(),
            ],
        )
        .with_timeout(self.options.timeout)
    }

    fn execute_with_extension(
        &self,
        query: &str,
        ext: &Path,
        tables: &[String],
    ) -> Result<QueryResult, QueryError> {
        let socket = ExtensionSocket::new();
        let spec = self.extension_spec(ext, &socket);
        let mut session = self.runner.open_session(&spec)?;

        for table in tables {
            if !self.await_table(session.as_mut(), table)? {
                warn!(
                    table = %table,
                    wait_ms = self.options.ready_timeout.as_millis() as u64,
                    "extension table not registered in time; running query anyway"
                );
                break;
            }
        }

        let statement = query.trim().trim_end_matches(';');
        session.send(&format!("{};\n.exit\n", statement))?;
        let output = session.finish(self.options.timeout)?;

        let stdout = output::strip_marker_lines(output.stdout_text()?, MARKER_COLUMN);
        output::parse_session_output(&stdout, &output.stderr_lossy())
    }

    /// Poll `.tables <table>` with backoff until the table is listed or the
    /// readiness timeout elapses.
    fn await_table(
        &self,
        session: &mut dyn InteractiveSession,
        table: &str,
    ) -> Result<bool, QueryError> {
        let deadline = Instant::now() + self.options.ready_timeout;
        let mut delay = READY_POLL_INITIAL;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let marker = format!("hf-ready-{}", self.marker_seq.fetch_add(1, Ordering::Relaxed));
            session.send(&format!(
                ".tables {}\nSELECT '{}' AS {};\n",
                table, marker, MARKER_COLUMN
            ))?;

            let wait = deadline
                .saturating_duration_since(Instant::now())
                .max(MARKER_TAIL_WAIT);
            let text = match session.read_until(&marker, wait) {
                Ok(text) => text,
                Err(ToolError::Timeout { .. }) => {
                    debug!(table, attempt, "no handshake reply before readiness deadline");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };
            if !text.contains(&marker) {
                return Err(QueryError::ExecutionFailed(
                    "engine exited during extension startup".to_string(),
                ));
            }
            // Consume the closing bracket of the marker row
            let _ = session.read_until("]", MARKER_TAIL_WAIT);

            if output::lists_table(&text, table) {
                debug!(table, attempt, "extension table registered");
                self.confirm(table);
                return Ok(true);
            }

            if Instant::now() + delay >= deadline {
                return Ok(false);
            }
            thread::sleep(delay);
            delay = (delay * 2).min(READY_POLL_MAX);
        }
    }

    fn probe_extension_table(&self, ext: &Path, table: &str) -> Result<bool, QueryError> {
        let socket = ExtensionSocket::new();
        let spec = self.extension_spec(ext, &socket);
        let mut session = self.runner.open_session(&spec)?;
        let ready = self.await_table(session.as_mut(), table)?;
        session.send(".exit\n")?;
        let _ = session.finish(self.options.timeout);
        Ok(ready)
    }

    fn probe_builtin_table(&self, table: &str) -> Result<bool, QueryError> {
        let spec = ToolSpec::new(self.engine_command(), Vec::new())
            .with_stdin(format!(".tables {}\n", table))
            .with_timeout(self.options.timeout);
        let output = self.runner.run(&spec)?;
        Ok(output::lists_table(output.stdout_text()?, table))
    }
}
