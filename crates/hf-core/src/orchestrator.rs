//! Collection orchestrator.
//!
//! Runs modules, isolates their failures, and assembles the unified report.
//!
//! # Isolation
//!
//! A module that returns an error, panics, or reports that every probe
//! failed is logged and left out of the report. Siblings are unaffected.
//! There is no global deadline: a run returns once every module finishes,
//! and each module is bounded only by its own probe timeouts.

use crate::collect::{CommandRunner, ToolRunnerBuilder};
use crate::identity::{DeviceIdentity, DeviceIdentityProbe, HardwareIdentityProbe, UNKNOWN};
use crate::logging;
use crate::modules::{Module, ModuleRegistry};
use crate::probe::FallbackExecutor;
use crate::query::{QueryClient, QueryOptions};
use crate::report::{ModuleResult, ReportMetadata, UnifiedReport};
use chrono::Utc;
use hf_common::{Error, ModuleId, Result};
use hf_config::AgentConfig;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Agent version reported in metadata.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs modules and assembles reports.
pub struct DataCollectionService {
    registry: ModuleRegistry,
    executor: FallbackExecutor,
    identity: Arc<dyn DeviceIdentityProbe>,
    enabled_modules: Vec<String>,
}

impl std::fmt::Debug for DataCollectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCollectionService")
            .field("registry", &self.registry)
            .field("executor", &self.executor)
            .field("enabled_modules", &self.enabled_modules)
            .finish_non_exhaustive()
    }
}

impl DataCollectionService {
    pub fn new(
        registry: ModuleRegistry,
        executor: FallbackExecutor,
        identity: Arc<dyn DeviceIdentityProbe>,
        enabled_modules: Vec<String>,
    ) -> Self {
        Self {
            registry,
            executor,
            identity,
            enabled_modules,
        }
    }

    /// Production wiring: real processes, built-in modules, hardware identity.
    pub fn from_config(config: &AgentConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(
            ToolRunnerBuilder::new()
                .timeout(config.probe_timeout())
                .build(),
        );
        let client = Arc::new(QueryClient::new(
            runner.clone(),
            QueryOptions::from_config(config),
        ));
        let executor = FallbackExecutor::new(
            client,
            runner.clone(),
            config.shell.clone(),
            config.probe_timeout(),
        );
        let identity = Arc::new(HardwareIdentityProbe::new(runner, config.probe_timeout()));

        Self::new(
            ModuleRegistry::with_builtin(),
            executor,
            identity,
            config.enabled_modules.clone(),
        )
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &FallbackExecutor {
        &self.executor
    }

    pub fn enabled_modules(&self) -> &[String] {
        &self.enabled_modules
    }

    /// Collect the configured module set.
    pub fn collect_enabled(&self) -> UnifiedReport {
        self.collect_all(&self.enabled_modules)
    }

    /// Run the given modules concurrently and assemble a report.
    ///
    /// Unknown ids are skipped with a warning.
    #[instrument(skip(self, enabled), fields(requested = enabled.len()))]
    pub fn collect_all(&self, enabled: &[String]) -> UnifiedReport {
        let run_id = logging::generate_run_id();
        let start = Instant::now();
        let modules = self.resolve(enabled);
        info!(run_id = %run_id, modules = modules.len(), "collection started");

        let (identity, outcomes) = thread::scope(|s| {
            let identity = s.spawn(|| self.identity.identify());
            let handles: Vec<_> = modules
                .iter()
                .map(|module| {
                    let module = Arc::clone(module);
                    (module.id(), s.spawn(move || module.collect(&self.executor)))
                })
                .collect();

            let outcomes: Vec<_> = handles
                .into_iter()
                .map(|(id, handle)| {
                    let outcome = handle.join().map_err(|_| ());
                    (id, outcome)
                })
                .collect();

            let identity = identity.join().unwrap_or_else(|_| {
                warn!(run_id = %run_id, "identity probe panicked");
                DeviceIdentity::default()
            });
            (identity, outcomes)
        });

        let results: Vec<ModuleResult> = outcomes
            .into_iter()
            .filter_map(|(id, outcome)| accept(&id, outcome))
            .collect();

        info!(
            run_id = %run_id,
            collected = results.len(),
            requested = modules.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "collection finished"
        );
        UnifiedReport::assemble(self.metadata(identity, enabled, run_id), results)
    }

    /// Run the given modules one at a time and assemble a report.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub fn collect_specific(&self, ids: &[String]) -> UnifiedReport {
        let run_id = logging::generate_run_id();
        let modules = self.resolve(ids);
        info!(run_id = %run_id, modules = modules.len(), "collection started");

        let results: Vec<ModuleResult> = modules
            .iter()
            .filter_map(|module| accept(&module.id(), self.run_isolated(module.as_ref())))
            .collect();

        let identity = self.identity.identify();
        UnifiedReport::assemble(self.metadata(identity, ids, run_id), results)
    }

    /// Run one module.
    ///
    /// Returns `ModuleNotFound` for an unregistered id and `None` when the
    /// module failed.
    pub fn collect_module(&self, id: &str) -> Result<Option<ModuleResult>> {
        let module = self
            .registry
            .get(id)
            .ok_or_else(|| Error::ModuleNotFound(id.to_string()))?;
        Ok(accept(&module.id(), self.run_isolated(module.as_ref())))
    }

    fn run_isolated(&self, module: &dyn Module) -> std::result::Result<Result<ModuleResult>, ()> {
        catch_unwind(AssertUnwindSafe(|| module.collect(&self.executor))).map_err(|_| ())
    }

    /// Registered modules for `ids`, deduplicated, in request order.
    fn resolve(&self, ids: &[String]) -> Vec<Arc<dyn Module>> {
        let mut seen: Vec<ModuleId> = Vec::new();
        let mut modules = Vec::new();
        for raw in ids {
            let id = ModuleId::new(raw);
            if seen.contains(&id) {
                continue;
            }
            match self.registry.get(id.as_str()) {
                Some(module) => {
                    seen.push(id);
                    modules.push(module);
                }
                None => warn!(module = %raw, "unknown module id; skipping"),
            }
        }
        modules
    }

    fn metadata(&self, identity: DeviceIdentity, enabled: &[String], run_id: String) -> ReportMetadata {
        let device_id = if identity.has_serial() {
            identity.serial_number.clone()
        } else {
            logging::get_host_id()
        };
        ReportMetadata {
            device_id,
            hostname: logging::hostname().unwrap_or_else(|| UNKNOWN.to_string()),
            serial_number: identity.serial_number,
            model_identifier: identity.model_identifier,
            os_version: identity.os_version,
            architecture: std::env::consts::ARCH.to_string(),
            collected_at: Utc::now(),
            enabled_modules: enabled.to_vec(),
            agent_version: AGENT_VERSION.to_string(),
            schema_version: hf_common::SCHEMA_VERSION.to_string(),
            run_id,
        }
    }
}

/// Keep a module outcome only if it produced a usable result.
fn accept(
    id: &ModuleId,
    outcome: std::result::Result<Result<ModuleResult>, ()>,
) -> Option<ModuleResult> {
    match outcome {
        Ok(Ok(result)) if result.succeeded() => {
            if let Some(message) = result.error_message() {
                debug!(module = %id, detail = message, "module collected with probe failures");
            }
            Some(result)
        }
        Ok(Ok(result)) => {
            warn!(
                module = %id,
                detail = result.error_message().unwrap_or_default(),
                "module produced no data; omitting"
            );
            None
        }
        Ok(Err(e)) => {
            warn!(module = %id, error = %e, code = e.code(), "module failed; omitting");
            None
        }
        Err(()) => {
            warn!(module = %id, "module panicked; omitting");
            None
        }
    }
}
