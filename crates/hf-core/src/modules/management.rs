//! Device management: MDM enrollment, configuration profiles, Munki.
//!
//! The tables used here come from the side-loaded extension, so these
//! probes exercise the extension path of the query client.

use super::{flag, run_probes, text, Module, ModulePayload, ProbeTally};
use crate::probe::{FallbackExecutor, NormalizedRecord, ProbeSpec};
use crate::report::ModuleResult;
use hf_common::{ModuleId, Result};
use serde::Serialize;
use std::collections::BTreeMap;

const ID: &str = "management";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MdmInfo {
    pub enrolled: bool,
    pub server_url: Option<String>,
    pub dep_enrolled: bool,
    pub user_approved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub identifier: String,
    pub display_name: Option<String>,
    pub install_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MunkiInfo {
    pub version: Option<String>,
    pub manifest: Option<String>,
    pub last_run_succeeded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementInfo {
    pub mdm: MdmInfo,
    pub profiles: Vec<ProfileInfo>,
    pub munki: Option<MunkiInfo>,
}

fn probes() -> Vec<ProbeSpec> {
    vec![
        // {"items":[{"enrolled":"true","server_url":..,"installed_from_dep":..,"user_approved":..}]}
        // or {"mdm":"Enrolled via DEP: Yes\nMDM enrollment: Yes (User Approved)"}
        ProbeSpec::new(ID, "mdm")
            .query(
                "SELECT enrolled, server_url, installed_from_dep, user_approved FROM mdm;",
            )
            .shell("profiles status -type enrollment 2>/dev/null"),
        // {"items":[{"identifier":..,"display_name":..,"install_date":..}, ...]}
        ProbeSpec::new(ID, "profiles").query(
            "SELECT identifier, display_name, install_date FROM macos_profiles \
             WHERE type = 'Configuration';",
        ),
        // {"items":[{"version":..,"manifest_name":..,"success":..}]}; no rows without Munki
        ProbeSpec::new(ID, "munki")
            .query("SELECT version, manifest_name, success FROM munki_info;"),
    ]
}

fn mdm(record: Option<&NormalizedRecord>) -> MdmInfo {
    if let Some(status) = text(record, &["mdm"]) {
        // `profiles status` text output
        let line_says_yes = |prefix: &str| {
            status.lines().any(|l| {
                let l = l.trim().to_ascii_lowercase();
                l.starts_with(prefix) && l.contains("yes")
            })
        };
        return MdmInfo {
            enrolled: line_says_yes("mdm enrollment"),
            server_url: None,
            dep_enrolled: line_says_yes("enrolled via dep"),
            user_approved: status.to_ascii_lowercase().contains("user approved"),
        };
    }

    MdmInfo {
        enrolled: flag(record, &["enrolled"]),
        server_url: text(record, &["server_url"]),
        dep_enrolled: flag(record, &["installed_from_dep"]),
        user_approved: flag(record, &["user_approved"]),
    }
}

fn profiles(record: Option<&NormalizedRecord>) -> Vec<ProfileInfo> {
    record
        .map(|r| r.items())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|row| {
            let row = NormalizedRecord::new(row.clone());
            Some(ProfileInfo {
                identifier: row.first_str("identifier")?,
                display_name: row.first_str("display_name"),
                install_date: row.first_str("install_date"),
            })
        })
        .collect()
}

fn munki(record: Option<&NormalizedRecord>) -> Option<MunkiInfo> {
    let record = record.filter(|r| !r.is_empty())?;
    let r = Some(record);
    Some(MunkiInfo {
        version: text(r, &["version"]),
        manifest: text(r, &["manifest_name"]),
        last_run_succeeded: flag(r, &["success"]),
    })
}

impl ManagementInfo {
    fn from_records(records: &BTreeMap<String, NormalizedRecord>) -> Self {
        Self {
            mdm: mdm(records.get("mdm")),
            profiles: profiles(records.get("profiles")),
            munki: munki(records.get("munki")),
        }
    }
}

/// Device management module.
#[derive(Debug, Default)]
pub struct ManagementModule;

impl Module for ManagementModule {
    fn id(&self) -> ModuleId {
        ModuleId::new(ID)
    }

    fn collect(&self, exec: &FallbackExecutor) -> Result<ModuleResult> {
        let mut tally = ProbeTally::new(self.id());
        let records = run_probes(exec, &mut tally, &probes());
        Ok(tally.finish(ModulePayload::Management(ManagementInfo::from_records(
            &records,
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{scripted_executor, ScriptedRunner, SessionScript};
    use std::sync::Arc;

    #[test]
    fn test_collect_through_extension() {
        let runner = Arc::new(
            ScriptedRunner::new().with_session(
                SessionScript::new()
                    .tables(["mdm", "macos_profiles", "munki_info"])
                    .reply(
                        "FROM mdm",
                        r#"[{"enrolled":"true","server_url":"https://mdm.example.com","installed_from_dep":"1","user_approved":"0"}]"#,
                    )
                    .reply(
                        "FROM macos_profiles",
                        r#"[{"identifier":"com.example.wifi","display_name":"Wi-Fi"}]"#,
                    )
                    .reply("FROM munki_info", "[]"),
            ),
        );
        let exec = scripted_executor(&runner, true);

        let result = ManagementModule.collect(&exec).unwrap();
        assert!(result.succeeded(), "{:?}", result.error_message());
        let ModulePayload::Management(info) = result.payload() else {
            panic!("expected management payload");
        };
        assert!(info.mdm.enrolled);
        assert!(info.mdm.dep_enrolled);
        assert!(!info.mdm.user_approved);
        assert_eq!(
            info.mdm.server_url.as_deref(),
            Some("https://mdm.example.com")
        );
        assert_eq!(info.profiles.len(), 1);
        assert_eq!(info.profiles[0].identifier, "com.example.wifi");
        assert!(info.munki.is_none());

        assert_eq!(runner.session_specs().len(), 3);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_mdm_text_fallback() {
        let record = NormalizedRecord::from_shell_output(
            "mdm",
            "Enrolled via DEP: Yes\nMDM enrollment: Yes (User Approved)\n",
        );
        let info = mdm(Some(&record));
        assert!(info.enrolled);
        assert!(info.dep_enrolled);
        assert!(info.user_approved);

        let record = NormalizedRecord::from_shell_output(
            "mdm",
            "Enrolled via DEP: No\nMDM enrollment: No\n",
        );
        assert_eq!(mdm(Some(&record)), MdmInfo::default());
    }
}
