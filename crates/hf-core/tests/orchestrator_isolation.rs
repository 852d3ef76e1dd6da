//! Module failures never take siblings down with them.

use hf_common::{Error, ModuleId, Result};
use hf_core::identity::{DeviceIdentity, StaticIdentityProbe, UNKNOWN};
use hf_core::modules::{Module, ModulePayload, ModuleRegistry};
use hf_core::probe::FallbackExecutor;
use hf_core::report::ModuleResult;
use hf_core::test_utils::{scripted_executor, ScriptedRunner};
use hf_core::DataCollectionService;
use serde_json::json;
use std::sync::Arc;

enum Behavior {
    Succeed,
    Fail,
    Panic,
    NoData,
}

struct FixtureModule {
    id: &'static str,
    behavior: Behavior,
}

impl Module for FixtureModule {
    fn id(&self) -> ModuleId {
        ModuleId::new(self.id)
    }

    fn collect(&self, _exec: &FallbackExecutor) -> Result<ModuleResult> {
        let payload = ModulePayload::Custom(json!({ "source": self.id }));
        match self.behavior {
            Behavior::Succeed => Ok(ModuleResult::success(self.id(), payload)),
            Behavior::Fail => Err(Error::ModuleFailed {
                module: self.id.to_string(),
                message: "fixture failure".to_string(),
            }),
            Behavior::Panic => panic!("fixture panic in {}", self.id),
            Behavior::NoData => Ok(ModuleResult::with_error(
                self.id(),
                false,
                "1 of 1 probes failed: only",
                payload,
            )),
        }
    }
}

fn registry(modules: Vec<(&'static str, Behavior)>) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    for (id, behavior) in modules {
        registry
            .register(Arc::new(FixtureModule { id, behavior }))
            .unwrap();
    }
    registry
}

fn service(registry: ModuleRegistry, identity: DeviceIdentity) -> DataCollectionService {
    let runner = Arc::new(ScriptedRunner::new());
    DataCollectionService::new(
        registry,
        scripted_executor(&runner, false),
        Arc::new(StaticIdentityProbe(identity)),
        Vec::new(),
    )
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn identity() -> DeviceIdentity {
    DeviceIdentity {
        serial_number: "C02ISOLATE".into(),
        model_identifier: "Mac15,3".into(),
        os_version: "14.5".into(),
    }
}

#[test]
fn one_failing_module_leaves_the_rest() {
    let svc = service(
        registry(vec![
            ("alpha", Behavior::Succeed),
            ("beta", Behavior::Fail),
            ("gamma", Behavior::Succeed),
            ("delta", Behavior::Succeed),
        ]),
        identity(),
    );

    let report = svc.collect_all(&ids(&["alpha", "beta", "gamma", "delta"]));
    assert_eq!(report.module_count(), 3);
    assert!(!report.modules.contains_key("beta"));
    assert!(report.sections.contains_key("gamma"));
    assert_eq!(
        report.metadata.enabled_modules,
        ids(&["alpha", "beta", "gamma", "delta"])
    );
}

#[test]
fn panics_and_empty_results_are_omitted() {
    let svc = service(
        registry(vec![
            ("alpha", Behavior::Succeed),
            ("boom", Behavior::Panic),
            ("hollow", Behavior::NoData),
        ]),
        identity(),
    );

    for report in [
        svc.collect_all(&ids(&["alpha", "boom", "hollow"])),
        svc.collect_specific(&ids(&["alpha", "boom", "hollow"])),
    ] {
        assert_eq!(report.module_count(), 1);
        assert!(report.modules.contains_key("alpha"));
    }
}

#[test]
fn unknown_modules_yield_empty_report_with_metadata() {
    let svc = service(registry(vec![("alpha", Behavior::Succeed)]), identity());

    let report = svc.collect_specific(&ids(&["doesNotExist"]));
    assert_eq!(report.module_count(), 0);

    let value = report.to_value().unwrap();
    assert_eq!(value["modules"], json!({}));
    assert_eq!(value["metadata"]["deviceId"], "C02ISOLATE");
    assert_eq!(value["metadata"]["modelIdentifier"], "Mac15,3");
    assert!(value["metadata"]["collectedAt"].as_str().unwrap().contains('T'));
    assert!(value["metadata"]["runId"].as_str().unwrap().starts_with("run-"));
    assert_eq!(value["metadata"]["enabledModules"], json!(["doesNotExist"]));
}

#[test]
fn missing_serial_falls_back_to_host_id() {
    let svc = service(registry(vec![]), DeviceIdentity::default());
    let report = svc.collect_all(&[]);
    assert!(report.metadata.device_id.starts_with("host-"));
    assert_eq!(report.metadata.serial_number, UNKNOWN);
    assert_eq!(report.metadata.architecture, std::env::consts::ARCH);
}

#[test]
fn single_module_errors_propagate_only_for_unknown_ids() {
    let svc = service(
        registry(vec![("alpha", Behavior::Succeed), ("beta", Behavior::Fail)]),
        identity(),
    );

    let alpha = svc.collect_module("alpha").unwrap().unwrap();
    assert!(alpha.succeeded());
    assert_eq!(alpha.module_id().as_str(), "alpha");

    assert!(svc.collect_module("beta").unwrap().is_none());
    assert!(matches!(
        svc.collect_module("doesNotExist"),
        Err(Error::ModuleNotFound(_))
    ));
}

#[test]
fn well_known_ids_get_their_section_key() {
    let svc = service(
        registry(vec![("management", Behavior::Succeed), ("custom_thing", Behavior::Succeed)]),
        identity(),
    );
    let value = svc
        .collect_all(&ids(&["management", "custom_thing"]))
        .to_value()
        .unwrap();

    assert_eq!(value["mdm"]["source"], "management");
    assert_eq!(value["custom_thing"]["source"], "custom_thing");
    assert_eq!(value["modules"]["management"]["source"], "management");
}
