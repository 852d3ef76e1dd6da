//! Probe results reach modules in one normalized shape.

use hf_core::modules::security::SecurityModule;
use hf_core::modules::{Module, ModulePayload};
use hf_core::probe::{NormalizedRecord, ProbeError, ProbeSpec};
use hf_core::test_utils::{is_shell, scripted_executor, Reply, ScriptedRunner};
use serde_json::json;
use std::sync::Arc;

#[test]
fn query_rows_are_wrapped_under_items() {
    let runner = Arc::new(
        ScriptedRunner::new().on_query("FROM gatekeeper", r#"[{"enabled":"1"}]"#),
    );
    let exec = scripted_executor(&runner, false);

    let record = exec
        .execute(&ProbeSpec::new("security", "gatekeeper").query("SELECT enabled FROM gatekeeper;"))
        .unwrap();
    assert_eq!(record.into_value(), json!({ "items": [{ "enabled": "1" }] }));
}

#[test]
fn gatekeeper_row_enables_gatekeeper() {
    let runner = Arc::new(
        ScriptedRunner::new().on_query("FROM gatekeeper", r#"[{"enabled":"1"}]"#),
    );
    let exec = scripted_executor(&runner, false);

    let result = SecurityModule.collect(&exec).unwrap();
    let ModulePayload::Security(info) = result.payload() else {
        panic!("expected security payload");
    };
    assert!(info.gatekeeper.enabled);

    let value = serde_json::to_value(result.payload()).unwrap();
    assert_eq!(value["gatekeeper"]["enabled"], true);
}

#[test]
fn shell_objects_pass_through_unwrapped() {
    let runner = Arc::new(ScriptedRunner::new().on_shell("ARDAgent", r#"{"ard_enabled":"true"}"#));
    let exec = scripted_executor(&runner, false);

    let record = exec
        .execute(&ProbeSpec::new("security", "remote_desktop").shell("pgrep -q ARDAgent"))
        .unwrap();
    assert_eq!(record.into_value(), json!({ "ard_enabled": "true" }));
    assert!(runner.engine_invocations().is_empty());
}

#[test]
fn failed_query_falls_back_to_shell() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .fail_query("FROM alf", "Error: no such table: alf")
            .on_shell("socketfilterfw", "Firewall is enabled. (State = 1)\n"),
    );
    let exec = scripted_executor(&runner, false);

    let record = exec
        .execute(
            &ProbeSpec::new("security", "firewall")
                .query("SELECT global_state FROM alf;")
                .shell("socketfilterfw --getglobalstate"),
        )
        .unwrap();
    assert_eq!(
        record.first_str("firewall").as_deref(),
        Some("Firewall is enabled. (State = 1)")
    );
}

#[test]
fn identical_shell_output_normalizes_identically() {
    for text in [
        r#"{"ard_enabled":"true"}"#,
        r#"[{"name":"en0"},{"name":"en1"}]"#,
        "  plain text output\n",
        "",
    ] {
        let first = NormalizedRecord::from_shell_output("probe", text);
        let second = NormalizedRecord::from_shell_output("probe", text);
        assert_eq!(first, second);

        let again = NormalizedRecord::from_shell_output(
            "probe",
            &serde_json::to_string(&first).unwrap(),
        );
        assert_eq!(again, first, "renormalizing {:?}", text);
    }
}

#[test]
fn probe_without_sources_is_rejected() {
    let runner = Arc::new(ScriptedRunner::new());
    let exec = scripted_executor(&runner, false);

    let err = exec.execute(&ProbeSpec::new("security", "nothing")).unwrap_err();
    assert!(matches!(
        err,
        ProbeError::NoSourceAvailable { ref module, ref probe }
            if module == "security" && probe == "nothing"
    ));
    assert!(runner.calls().is_empty());
}

#[test]
fn query_only_probe_surfaces_the_query_error() {
    let runner = Arc::new(ScriptedRunner::new().fail_query("FROM uptime", "Error: boom"));
    let exec = scripted_executor(&runner, false);

    let err = exec
        .execute(&ProbeSpec::new("system", "uptime").query("SELECT total_seconds FROM uptime;"))
        .unwrap_err();
    assert!(matches!(err, ProbeError::Query(_)));
}

#[test]
fn empty_rows_fall_through_when_requested() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on_query("FROM dns_resolvers", "[]")
            .on_shell("resolv.conf", r#"[{"address":"1.1.1.1"}]"#),
    );
    let exec = scripted_executor(&runner, false);
    let spec = ProbeSpec::new("network", "dns")
        .query("SELECT address FROM dns_resolvers;")
        .shell("awk '/^nameserver/' /etc/resolv.conf");

    let strict = exec.execute(&spec).unwrap();
    assert!(strict.is_empty());

    let lenient = exec.execute(&spec.clone().fallback_on_empty(true)).unwrap();
    assert_eq!(lenient.first_str("address").as_deref(), Some("1.1.1.1"));
}

#[test]
fn empty_rows_survive_a_failed_shell_fallback() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on_query("FROM dns_resolvers", "[]")
            .on(|s| is_shell(s, "resolv.conf"), Reply::failure(2, "awk: cannot open")),
    );
    let exec = scripted_executor(&runner, false);
    let spec = ProbeSpec::new("network", "dns")
        .query("SELECT address FROM dns_resolvers;")
        .shell("awk '/^nameserver/' /etc/resolv.conf")
        .fallback_on_empty(true);

    let record = exec.execute(&spec).unwrap();
    assert!(record.is_empty());
    assert_eq!(record.into_value(), json!({ "items": [] }));
    assert_eq!(runner.calls().len(), 2);
}
