//! Probe fallback executor.
//!
//! A probe names one fact and up to two ways of obtaining it: a structured
//! query and a shell script. The executor tries the query first; a query
//! failure is logged and the shell script runs instead. Whichever source
//! answers, the result is normalized into a [`NormalizedRecord`].

pub mod record;

pub use record::{parse_flag, NormalizedRecord, ITEMS_KEY};

use crate::collect::{CommandRunner, ToolError, ToolSpec};
use crate::query::{QueryClient, QueryError};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};

/// One fact to gather.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    /// Module that owns the probe (for error attribution).
    pub module: String,
    /// Probe name; also the key for plain-text shell output.
    pub name: String,
    pub query: Option<String>,
    pub shell: Option<String>,
    /// Treat an empty row set as a miss and try the shell script.
    pub fallback_on_empty: bool,
}

impl ProbeSpec {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            query: None,
            shell: None,
            fallback_on_empty: false,
        }
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn shell(mut self, script: impl Into<String>) -> Self {
        self.shell = Some(script.into());
        self
    }

    pub fn fallback_on_empty(mut self, enabled: bool) -> Self {
        self.fallback_on_empty = enabled;
        self
    }
}

/// Probe failures.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("shell probe could not run: {0}")]
    Shell(#[from] ToolError),

    #[error("shell probe exited with {code:?}: {stderr}")]
    ShellFailed { code: Option<i32>, stderr: String },

    #[error("probe '{probe}' in module '{module}' has neither a query nor a shell script")]
    NoSourceAvailable { module: String, probe: String },

    #[error("probe '{0}' panicked")]
    Panicked(String),
}

impl From<ProbeError> for hf_common::Error {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Query(e) => e.into(),
            ProbeError::Shell(e) => e.into(),
            ProbeError::ShellFailed { code, stderr } => hf_common::Error::ExecutionFailed(
                format!("shell probe exited with {:?}: {}", code, stderr.trim()),
            ),
            ProbeError::NoSourceAvailable { module, probe } => {
                hf_common::Error::NoSourceAvailable { module, probe }
            }
            ProbeError::Panicked(probe) => hf_common::Error::ModuleFailed {
                module: probe,
                message: "probe panicked".to_string(),
            },
        }
    }
}

/// Runs probes: query first, shell script second.
pub struct FallbackExecutor {
    client: Arc<QueryClient>,
    runner: Arc<dyn CommandRunner>,
    shell: PathBuf,
    timeout: Duration,
}

impl std::fmt::Debug for FallbackExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackExecutor")
            .field("client", &self.client)
            .field("shell", &self.shell)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FallbackExecutor {
    pub fn new(
        client: Arc<QueryClient>,
        runner: Arc<dyn CommandRunner>,
        shell: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            runner,
            shell: shell.into(),
            timeout,
        }
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Runner for modules that invoke tools directly.
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one probe.
    #[instrument(skip(self, spec), fields(module = %spec.module, probe = %spec.name))]
    pub fn execute(&self, spec: &ProbeSpec) -> Result<NormalizedRecord, ProbeError> {
        let mut query_error = None;
        let mut answered_empty = false;

        if let Some(query) = &spec.query {
            match self.client.execute_query(query) {
                Ok(rows) if rows.is_empty() && spec.fallback_on_empty && spec.shell.is_some() => {
                    debug!("query returned no rows; trying shell probe");
                    answered_empty = true;
                }
                Ok(rows) => return Ok(NormalizedRecord::from_rows(rows)),
                Err(e) => {
                    debug!(error = %e, "query failed; trying shell probe");
                    query_error = Some(e);
                }
            }
        }

        match (&spec.shell, query_error) {
            (Some(script), _) => match self.run_shell(spec, script) {
                Err(e) if answered_empty => {
                    debug!(error = %e, "shell probe failed; keeping empty query result");
                    Ok(NormalizedRecord::from_rows(Vec::new()))
                }
                result => result,
            },
            (None, Some(e)) => Err(ProbeError::Query(e)),
            (None, None) => Err(ProbeError::NoSourceAvailable {
                module: spec.module.clone(),
                probe: spec.name.clone(),
            }),
        }
    }

    /// Run independent probes concurrently; results keep input order.
    pub fn execute_all(&self, specs: &[ProbeSpec]) -> Vec<Result<NormalizedRecord, ProbeError>> {
        match specs {
            [] => Vec::new(),
            [single] => vec![self.execute(single)],
            _ => thread::scope(|s| {
                let handles: Vec<_> = specs
                    .iter()
                    .map(|spec| (spec, s.spawn(move || self.execute(spec))))
                    .collect();

                handles
                    .into_iter()
                    .map(|(spec, h)| {
                        h.join().unwrap_or_else(|_| {
                            error!(module = %spec.module, probe = %spec.name, "probe thread panicked");
                            Err(ProbeError::Panicked(spec.name.clone()))
                        })
                    })
                    .collect()
            }),
        }
    }

    fn run_shell(&self, spec: &ProbeSpec, script: &str) -> Result<NormalizedRecord, ProbeError> {
        let tool = ToolSpec::new(
            self.shell.to_string_lossy().into_owned(),
            vec!["-c".to_string(), script.to_string()],
        )
        .with_timeout(self.timeout);

        let output = self.runner.run(&tool)?;
        if !output.success() {
            return Err(ProbeError::ShellFailed {
                code: output.exit_code,
                stderr: output.stderr_lossy(),
            });
        }
        Ok(NormalizedRecord::from_shell_output(
            &spec.name,
            output.stdout_text()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::ToolRunnerBuilder;
    use crate::query::QueryOptions;

    fn live_executor() -> FallbackExecutor {
        let runner: Arc<dyn CommandRunner> = Arc::new(ToolRunnerBuilder::new().build());
        let client = Arc::new(QueryClient::new(
            runner.clone(),
            QueryOptions::new("/nonexistent/osqueryi"),
        ));
        FallbackExecutor::new(client, runner, "/bin/sh", Duration::from_secs(5))
    }

    #[test]
    fn test_spec_builder() {
        let spec = ProbeSpec::new("security", "gatekeeper")
            .query("SELECT enabled FROM gatekeeper;")
            .shell("spctl --status")
            .fallback_on_empty(true);
        assert_eq!(spec.module, "security");
        assert!(spec.query.is_some() && spec.shell.is_some());
        assert!(spec.fallback_on_empty);
    }

    #[test]
    fn test_no_source() {
        let exec = live_executor();
        match exec.execute(&ProbeSpec::new("system", "empty")) {
            Err(ProbeError::NoSourceAvailable { module, probe }) => {
                assert_eq!(module, "system");
                assert_eq!(probe, "empty");
            }
            other => panic!("expected NoSourceAvailable, got {:?}", other),
        }
    }

    #[test]
    fn test_query_failure_falls_back_to_shell() {
        let exec = live_executor();
        let spec = ProbeSpec::new("system", "greeting")
            .query("SELECT 1;")
            .shell("echo hello");
        let record = exec.execute(&spec).unwrap();
        assert_eq!(record.first_str("greeting").as_deref(), Some("hello"));
    }

    #[test]
    fn test_query_only_failure_propagates_query_error() {
        let exec = live_executor();
        let spec = ProbeSpec::new("system", "q").query("SELECT 1;");
        assert!(matches!(exec.execute(&spec), Err(ProbeError::Query(_))));
    }

    #[test]
    fn test_shell_nonzero_exit() {
        let exec = live_executor();
        let spec = ProbeSpec::new("system", "bad").shell("echo oops >&2; exit 3");
        match exec.execute(&spec) {
            Err(ProbeError::ShellFailed { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("oops"));
            }
            other => panic!("expected ShellFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_all_keeps_order() {
        let exec = live_executor();
        let specs: Vec<_> = (0..4)
            .map(|i| ProbeSpec::new("system", format!("p{i}")).shell(format!("echo {i}")))
            .collect();
        let results = exec.execute_all(&specs);
        assert_eq!(results.len(), 4);
        for (i, result) in results.into_iter().enumerate() {
            let record = result.unwrap();
            assert_eq!(record.first_str(&format!("p{i}")), Some(i.to_string()));
        }
    }
}
