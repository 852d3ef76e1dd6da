//! Security posture: Gatekeeper, SIP, firewall, FileVault, remote desktop.

use super::{flag, number, run_probes, text, Module, ModulePayload, ProbeTally};
use crate::probe::{FallbackExecutor, NormalizedRecord, ProbeSpec};
use crate::report::ModuleResult;
use hf_common::{ModuleId, Result};
use serde::Serialize;
use std::collections::BTreeMap;

const ID: &str = "security";

/// An on/off control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleState {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallState {
    pub enabled: bool,
    pub stealth_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDesktopState {
    pub ard_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityInfo {
    pub gatekeeper: ToggleState,
    pub sip: ToggleState,
    pub firewall: FirewallState,
    pub filevault: ToggleState,
    pub remote_desktop: RemoteDesktopState,
}

fn probes() -> Vec<ProbeSpec> {
    vec![
        // {"items":[{"enabled":"1"}]} or {"enabled":"1"}
        ProbeSpec::new(ID, "gatekeeper")
            .query("SELECT enabled FROM gatekeeper;")
            .shell(
                "if spctl --status 2>/dev/null | grep -q 'assessments enabled'; \
                 then echo '{\"enabled\":\"1\"}'; else echo '{\"enabled\":\"0\"}'; fi",
            ),
        // {"items":[{"enabled":"1"}]} or {"enabled":"1"}
        ProbeSpec::new(ID, "sip")
            .query("SELECT enabled FROM sip_config WHERE config_flag = 'sip';")
            .shell(
                "if csrutil status 2>/dev/null | grep -q 'enabled'; \
                 then echo '{\"enabled\":\"1\"}'; else echo '{\"enabled\":\"0\"}'; fi",
            ),
        // {"items":[{"global_state":"1","stealth_enabled":"0"}]} or {"firewall":"Firewall is enabled. (State = 1)"}
        ProbeSpec::new(ID, "firewall")
            .query("SELECT global_state, stealth_enabled FROM alf;")
            .shell("/usr/libexec/ApplicationFirewall/socketfilterfw --getglobalstate"),
        // {"items":[{"encrypted":"1"}]} or {"filevault":"FileVault is On."}
        ProbeSpec::new(ID, "filevault")
            .query(
                "SELECT de.encrypted FROM mounts m \
                 JOIN disk_encryption de ON m.device_alias = de.name WHERE m.path = '/';",
            )
            .shell("fdesetup status"),
        // {"ard_enabled":"true"}
        ProbeSpec::new(ID, "remote_desktop").shell(
            "if pgrep -q ARDAgent 2>/dev/null; \
             then echo '{\"ard_enabled\":\"true\"}'; else echo '{\"ard_enabled\":\"false\"}'; fi",
        ),
    ]
}

/// Whether a plain-text status line reports the control as on.
fn status_text_on(record: Option<&NormalizedRecord>, label: &str) -> bool {
    text(record, &[label])
        .map(|s| {
            let s = s.to_lowercase();
            (s.contains("enabled") || s.contains(" is on")) && !s.contains("disabled")
        })
        .unwrap_or(false)
}

impl SecurityInfo {
    fn from_records(records: &BTreeMap<String, NormalizedRecord>) -> Self {
        let firewall = records.get("firewall");
        let firewall_enabled = match number(firewall, &["global_state"]) {
            // 1 = on, 2 = essential services only
            Some(state) => state > 0,
            None => flag(firewall, &["enabled"]) || status_text_on(firewall, "firewall"),
        };

        let filevault = records.get("filevault");

        Self {
            gatekeeper: ToggleState {
                enabled: flag(records.get("gatekeeper"), &["enabled"]),
            },
            sip: ToggleState {
                enabled: flag(records.get("sip"), &["enabled"]),
            },
            firewall: FirewallState {
                enabled: firewall_enabled,
                stealth_mode: flag(firewall, &["stealth_enabled"]),
            },
            filevault: ToggleState {
                enabled: flag(filevault, &["encrypted", "enabled"])
                    || status_text_on(filevault, "filevault"),
            },
            remote_desktop: RemoteDesktopState {
                ard_enabled: flag(records.get("remote_desktop"), &["ard_enabled"]),
            },
        }
    }
}

/// Security posture module.
#[derive(Debug, Default)]
pub struct SecurityModule;

impl Module for SecurityModule {
    fn id(&self) -> ModuleId {
        ModuleId::new(ID)
    }

    fn collect(&self, exec: &FallbackExecutor) -> Result<ModuleResult> {
        let mut tally = ProbeTally::new(self.id());
        let records = run_probes(exec, &mut tally, &probes());
        let info = SecurityInfo::from_records(&records);
        Ok(tally.finish(ModulePayload::Security(info)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{scripted_executor, ScriptedRunner};
    use std::sync::Arc;

    #[test]
    fn test_engine_answers() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_query("FROM gatekeeper", r#"[{"enabled":"1"}]"#)
                .on_query("FROM sip_config", r#"[{"enabled":"0"}]"#)
                .on_query("FROM alf", r#"[{"global_state":"2","stealth_enabled":"1"}]"#)
                .on_query("disk_encryption", r#"[{"encrypted":"1"}]"#)
                .on_shell("ARDAgent", r#"{"ard_enabled":"true"}"#),
        );
        let exec = scripted_executor(&runner, false);

        let result = SecurityModule.collect(&exec).unwrap();
        assert!(result.succeeded());
        assert_eq!(result.error_message(), None);

        let ModulePayload::Security(info) = result.payload() else {
            panic!("expected security payload");
        };
        assert!(info.gatekeeper.enabled);
        assert!(!info.sip.enabled);
        assert!(info.firewall.enabled);
        assert!(info.firewall.stealth_mode);
        assert!(info.filevault.enabled);
        assert!(info.remote_desktop.ard_enabled);
    }

    #[test]
    fn test_shell_text_fallbacks() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_shell("socketfilterfw", "Firewall is enabled. (State = 1)\n")
                .on_shell("fdesetup", "FileVault is On.\n")
                .on_shell("spctl", r#"{"enabled":"0"}"#)
                .on_shell("csrutil", r#"{"enabled":"1"}"#)
                .on_shell("ARDAgent", r#"{"ard_enabled":"false"}"#),
        );
        let exec = scripted_executor(&runner, false);

        let result = SecurityModule.collect(&exec).unwrap();
        let ModulePayload::Security(info) = result.payload() else {
            panic!("expected security payload");
        };
        assert!(info.firewall.enabled);
        assert!(info.filevault.enabled);
        assert!(!info.gatekeeper.enabled);
        assert!(info.sip.enabled);
        assert!(!info.remote_desktop.ard_enabled);
    }

    #[test]
    fn test_failed_probes_contribute_defaults() {
        let runner = Arc::new(
            ScriptedRunner::new().on_query("FROM gatekeeper", r#"[{"enabled":"1"}]"#),
        );
        let exec = scripted_executor(&runner, false);

        let result = SecurityModule.collect(&exec).unwrap();
        assert!(result.succeeded());
        assert_eq!(
            result.error_message(),
            Some("4 of 5 probes failed: sip, firewall, filevault, remote_desktop")
        );
        let ModulePayload::Security(info) = result.payload() else {
            panic!("expected security payload");
        };
        assert!(info.gatekeeper.enabled);
        assert_eq!(info.firewall, FirewallState::default());
    }

    #[test]
    fn test_disabled_text_is_off() {
        let record = NormalizedRecord::from_shell_output("firewall", "Firewall is disabled. (State = 0)");
        assert!(!status_text_on(Some(&record), "firewall"));
    }
}
