//! Module results and the unified report document.
//!
//! # Report shape
//!
//! ```json
//! {
//!   "metadata": { "deviceId": "...", "collectedAt": "...", "enabledModules": [...] },
//!   "modules": { "security": {...}, "network": {...} },
//!   "security": {...},
//!   "network": {...}
//! }
//! ```
//!
//! Payloads of collected modules appear twice: under `modules` and under a
//! top-level section key. Well-known ids map to fixed section keys; any other
//! id is its own section key.

use crate::modules::ModulePayload;
use chrono::{DateTime, Utc};
use hf_common::ModuleId;
use serde::Serialize;
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::warn;

/// Fixed top-level section keys for well-known module ids.
pub const SECTION_KEYS: &[(&str, &str)] = &[
    ("security", "security"),
    ("network", "network"),
    ("hardware", "hardware"),
    ("system", "system"),
    ("management", "mdm"),
];

/// Top-level section key for a module id.
pub fn section_key(id: &ModuleId) -> &str {
    SECTION_KEYS
        .iter()
        .find(|(module, _)| *module == id.as_str())
        .map(|(_, key)| *key)
        .unwrap_or_else(|| id.as_str())
}

/// Outcome of one module run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleResult {
    module_id: ModuleId,
    collected_at: DateTime<Utc>,
    succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    payload: ModulePayload,
}

impl ModuleResult {
    pub fn success(module_id: ModuleId, payload: ModulePayload) -> Self {
        Self {
            module_id,
            collected_at: Utc::now(),
            succeeded: true,
            error_message: None,
            payload,
        }
    }

    /// A result that still carries a payload but records what went wrong.
    pub fn with_error(
        module_id: ModuleId,
        succeeded: bool,
        message: impl Into<String>,
        payload: ModulePayload,
    ) -> Self {
        Self {
            module_id,
            collected_at: Utc::now(),
            succeeded,
            error_message: Some(message.into()),
            payload,
        }
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    pub fn collected_at(&self) -> DateTime<Utc> {
        self.collected_at
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn payload(&self) -> &ModulePayload {
        &self.payload
    }

    pub fn into_payload(self) -> ModulePayload {
        self.payload
    }
}

/// Device identity and run metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub device_id: String,
    pub hostname: String,
    pub serial_number: String,
    pub model_identifier: String,
    pub os_version: String,
    pub architecture: String,
    pub collected_at: DateTime<Utc>,
    pub enabled_modules: Vec<String>,
    pub agent_version: String,
    pub schema_version: String,
    pub run_id: String,
}

/// The assembled report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedReport {
    pub metadata: ReportMetadata,
    pub modules: BTreeMap<ModuleId, ModulePayload>,
    #[serde(flatten)]
    pub sections: BTreeMap<String, ModulePayload>,
}

impl UnifiedReport {
    /// Assemble a report from successful module results.
    pub fn assemble(
        metadata: ReportMetadata,
        results: impl IntoIterator<Item = ModuleResult>,
    ) -> Self {
        let mut modules = BTreeMap::new();
        let mut sections = BTreeMap::new();
        for result in results {
            let id = result.module_id.clone();
            let payload = result.into_payload();
            match sections.entry(section_key(&id).to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(payload.clone());
                }
                Entry::Occupied(slot) => {
                    warn!(module = %id, section = %slot.key(), "report section already taken");
                }
            }
            modules.insert(id, payload);
        }
        Self {
            metadata,
            modules,
            sections,
        }
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            device_id: "C02TEST".into(),
            hostname: "mac-01".into(),
            serial_number: "C02TEST".into(),
            model_identifier: "Mac14,2".into(),
            os_version: "14.5".into(),
            architecture: "arm64".into(),
            collected_at: Utc::now(),
            enabled_modules: vec!["management".into(), "custom_probe".into()],
            agent_version: "0.1.0".into(),
            schema_version: hf_common::SCHEMA_VERSION.into(),
            run_id: "run-000000000000".into(),
        }
    }

    #[test]
    fn test_section_keys() {
        assert_eq!(section_key(&ModuleId::new("management")), "mdm");
        assert_eq!(section_key(&ModuleId::new("security")), "security");
        assert_eq!(section_key(&ModuleId::new("custom_probe")), "custom_probe");
    }

    #[test]
    fn test_assemble_duplicates_sections() {
        let report = UnifiedReport::assemble(
            metadata(),
            vec![
                ModuleResult::success(
                    ModuleId::new("management"),
                    ModulePayload::Custom(json!({"enrolled": true})),
                ),
                ModuleResult::success(
                    ModuleId::new("custom_probe"),
                    ModulePayload::Custom(json!({"x": 1})),
                ),
            ],
        );

        let value = report.to_value().unwrap();
        assert_eq!(value["modules"]["management"], json!({"enrolled": true}));
        assert_eq!(value["mdm"], json!({"enrolled": true}));
        assert_eq!(value["custom_probe"], json!({"x": 1}));
        assert_eq!(value["metadata"]["deviceId"], "C02TEST");
        assert_eq!(value["metadata"]["modelIdentifier"], "Mac14,2");
        assert!(value.get("management").is_none());
    }

    #[test]
    fn test_assemble_keeps_first_owner_of_a_section() {
        let report = UnifiedReport::assemble(
            metadata(),
            vec![
                ModuleResult::success(
                    ModuleId::new("management"),
                    ModulePayload::Custom(json!({"source": "management"})),
                ),
                ModuleResult::success(
                    ModuleId::new("mdm"),
                    ModulePayload::Custom(json!({"source": "mdm"})),
                ),
            ],
        );

        let value = report.to_value().unwrap();
        assert_eq!(value["mdm"], json!({"source": "management"}));
        assert_eq!(value["modules"]["mdm"], json!({"source": "mdm"}));
        assert_eq!(report.module_count(), 2);
    }

    #[test]
    fn test_module_result_serialization() {
        let result = ModuleResult::with_error(
            ModuleId::new("network"),
            true,
            "1 of 4 probes failed: dns",
            ModulePayload::Custom(json!({})),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["moduleId"], "network");
        assert_eq!(value["succeeded"], true);
        assert_eq!(value["errorMessage"], "1 of 4 probes failed: dns");
        assert!(value["collectedAt"].is_string());
    }
}
