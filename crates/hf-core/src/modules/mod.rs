//! Collection modules.
//!
//! A module owns the probes for one fact domain and turns their normalized
//! records into a typed document. Failed probes contribute defaults; a
//! module only reports failure when every probe failed.

pub mod hardware;
pub mod management;
pub mod network;
pub mod security;
pub mod system;

pub use hardware::{HardwareInfo, HardwareModule};
pub use management::{ManagementInfo, ManagementModule};
pub use network::{NetworkInfo, NetworkModule};
pub use security::{SecurityInfo, SecurityModule};
pub use system::{SystemInfo, SystemModule};

use crate::probe::{FallbackExecutor, NormalizedRecord, ProbeError, ProbeSpec};
use crate::report::{section_key, ModuleResult, SECTION_KEYS};
use hf_common::{Error, ModuleId, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// One fact domain.
pub trait Module: Send + Sync {
    fn id(&self) -> ModuleId;

    /// Run the module's probes and assemble its document.
    fn collect(&self, exec: &FallbackExecutor) -> Result<ModuleResult>;
}

/// Typed module documents.
///
/// `Custom` carries documents from modules outside the built-in set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModulePayload {
    Hardware(HardwareInfo),
    System(SystemInfo),
    Network(NetworkInfo),
    Security(SecurityInfo),
    Management(ManagementInfo),
    Custom(Value),
}

/// Counts probe outcomes for one module run.
#[derive(Debug)]
pub struct ProbeTally {
    module: ModuleId,
    attempted: usize,
    failed: Vec<String>,
}

impl ProbeTally {
    pub fn new(module: ModuleId) -> Self {
        Self {
            module,
            attempted: 0,
            failed: Vec::new(),
        }
    }

    /// Record a probe outcome, returning the record on success.
    pub fn record(
        &mut self,
        probe: &str,
        result: std::result::Result<NormalizedRecord, ProbeError>,
    ) -> Option<NormalizedRecord> {
        self.attempted += 1;
        match result {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(module = %self.module, probe, error = %e, "probe failed");
                self.failed.push(probe.to_string());
                None
            }
        }
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failed.len() == self.attempted
    }

    pub fn summary(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        Some(format!(
            "{} of {} probes failed: {}",
            self.failed.len(),
            self.attempted,
            self.failed.join(", ")
        ))
    }

    /// Build the module result from the tally and the assembled payload.
    pub fn finish(self, payload: ModulePayload) -> ModuleResult {
        match self.summary() {
            None => ModuleResult::success(self.module, payload),
            Some(message) => {
                let succeeded = !self.all_failed();
                ModuleResult::with_error(self.module, succeeded, message, payload)
            }
        }
    }
}

/// Modules keyed by id.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleId, Arc<dyn Module>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in module.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let builtin: [Arc<dyn Module>; 5] = [
            Arc::new(HardwareModule),
            Arc::new(SystemModule),
            Arc::new(NetworkModule),
            Arc::new(SecurityModule),
            Arc::new(ManagementModule),
        ];
        for module in builtin {
            // Built-in ids are distinct and unreserved
            let _ = registry.register(module);
        }
        registry
    }

    /// Add a module. Reserved and duplicate ids are rejected, as are ids whose
/// report section key is already taken.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<()> {
        let id = module.id();
        if ModuleId::parse(id.as_str()).is_none() {
            return Err(Error::Config(format!("malformed module id '{}'", id)));
        }
        if id.is_reserved() {
            return Err(Error::Config(format!(
                "module id '{}' is a reserved report key",
                id
            )));
        }
        if self.modules.contains_key(&id) {
            return Err(Error::Config(format!("duplicate module id '{}'", id)));
        }
        let key = section_key(&id);
        let claimed = SECTION_KEYS
            .iter()
            .any(|(owner, k)| *k == key && *owner != id.as_str());
        if claimed || self.modules.keys().any(|other| section_key(other) == key) {
            return Err(Error::Config(format!(
                "module id '{}' collides with report section '{}'",
                id, key
            )));
        }
        self.modules.insert(id, module);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(&ModuleId::new(id)).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(&ModuleId::new(id))
    }

    pub fn ids(&self) -> Vec<ModuleId> {
        self.modules.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

// ============================================================================
// Record readers shared by the built-in modules
// ============================================================================

/// Run `specs` concurrently, keeping successful records by probe name.
pub(crate) fn run_probes(
    exec: &FallbackExecutor,
    tally: &mut ProbeTally,
    specs: &[ProbeSpec],
) -> BTreeMap<String, NormalizedRecord> {
    let results = exec.execute_all(specs);
    specs
        .iter()
        .zip(results)
        .filter_map(|(spec, result)| {
            tally
                .record(&spec.name, result)
                .map(|record| (spec.name.clone(), record))
        })
        .collect()
}

/// First non-empty text among `keys`.
pub(crate) fn text(record: Option<&NormalizedRecord>, keys: &[&str]) -> Option<String> {
    let record = record?;
    keys.iter().find_map(|k| record.first_str(k))
}

/// First readable flag among `keys`, defaulting to false.
pub(crate) fn flag(record: Option<&NormalizedRecord>, keys: &[&str]) -> bool {
    record
        .and_then(|r| keys.iter().find_map(|k| r.get_bool(k)))
        .unwrap_or(false)
}

pub(crate) fn number(record: Option<&NormalizedRecord>, keys: &[&str]) -> Option<i64> {
    let record = record?;
    keys.iter().find_map(|k| record.get_i64(k))
}
