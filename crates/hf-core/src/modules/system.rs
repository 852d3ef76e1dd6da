//! Operating system facts and local accounts.

use super::{number, run_probes, text, Module, ModulePayload, ProbeTally};
use crate::probe::{FallbackExecutor, NormalizedRecord, ProbeSpec};
use crate::report::ModuleResult;
use hf_common::{ModuleId, Result};
use serde::Serialize;
use std::collections::BTreeMap;

const ID: &str = "system";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUser {
    pub username: String,
    pub uid: Option<i64>,
    pub shell: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub hostname: Option<String>,
    pub computer_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub os_build: Option<String>,
    pub platform: Option<String>,
    pub architecture: Option<String>,
    pub uptime_seconds: Option<i64>,
    pub local_users: Vec<LocalUser>,
}

fn probes() -> Vec<ProbeSpec> {
    vec![
        // {"items":[{"name":..,"version":..,"build":..,"platform":..,"arch":..}]}
        ProbeSpec::new(ID, "os_version")
            .query("SELECT name, version, build, platform, arch FROM os_version;")
            .shell(
                "printf '{\"name\":\"%s\",\"version\":\"%s\",\"build\":\"%s\",\"arch\":\"%s\"}' \
                 \"$(sw_vers -productName 2>/dev/null || uname -s)\" \
                 \"$(sw_vers -productVersion 2>/dev/null || uname -r)\" \
                 \"$(sw_vers -buildVersion 2>/dev/null)\" \"$(uname -m)\"",
            ),
        // {"items":[{"hostname":..,"computer_name":..}]} or {"hostname":"mac-01.local"}
        ProbeSpec::new(ID, "hostname")
            .query("SELECT hostname, computer_name FROM system_info;")
            .shell("hostname"),
        // {"items":[{"total_seconds":..}]}
        ProbeSpec::new(ID, "uptime").query("SELECT total_seconds FROM uptime;"),
        // {"items":[{"username":..,"uid":..,"shell":..}, ...]}
        ProbeSpec::new(ID, "local_users").query(
            "SELECT username, uid, shell FROM users \
             WHERE uid >= 500 AND shell NOT LIKE '%false' AND shell NOT LIKE '%nologin';",
        ),
    ]
}

fn local_users(record: Option<&NormalizedRecord>) -> Vec<LocalUser> {
    let Some(record) = record else {
        return Vec::new();
    };
    record
        .items()
        .into_iter()
        .filter_map(|row| {
            let row = NormalizedRecord::new(row.clone());
            let username = row.first_str("username")?;
            Some(LocalUser {
                username,
                uid: row.get_i64("uid"),
                shell: row.first_str("shell"),
            })
        })
        .collect()
}

impl SystemInfo {
    fn from_records(records: &BTreeMap<String, NormalizedRecord>) -> Self {
        let os = records.get("os_version");
        let host = records.get("hostname");
        Self {
            hostname: text(host, &["hostname"]),
            computer_name: text(host, &["computer_name"]),
            os_name: text(os, &["name"]),
            os_version: text(os, &["version"]),
            os_build: text(os, &["build"]),
            platform: text(os, &["platform"]),
            architecture: text(os, &["arch"]),
            uptime_seconds: number(records.get("uptime"), &["total_seconds"]),
            local_users: local_users(records.get("local_users")),
        }
    }
}

/// Operating system module.
#[derive(Debug, Default)]
pub struct SystemModule;

impl Module for SystemModule {
    fn id(&self) -> ModuleId {
        ModuleId::new(ID)
    }

    fn collect(&self, exec: &FallbackExecutor) -> Result<ModuleResult> {
        let mut tally = ProbeTally::new(self.id());
        let records = run_probes(exec, &mut tally, &probes());
        Ok(tally.finish(ModulePayload::System(SystemInfo::from_records(&records))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{scripted_executor, ScriptedRunner};
    use std::sync::Arc;

    #[test]
    fn test_collect() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_query(
                    "FROM os_version",
                    r#"[{"name":"macOS","version":"14.5","build":"23F79","platform":"darwin","arch":"arm64"}]"#,
                )
                .on_shell("hostname", "mac-01.local\n")
                .on_query("FROM uptime", r#"[{"total_seconds":"3600"}]"#)
                .on_query(
                    "FROM users",
                    r#"[{"username":"alice","uid":"501","shell":"/bin/zsh"},{"uid":"502"}]"#,
                ),
        );
        let exec = scripted_executor(&runner, false);

        let result = SystemModule.collect(&exec).unwrap();
        assert!(result.succeeded());
        let ModulePayload::System(info) = result.payload() else {
            panic!("expected system payload");
        };
        assert_eq!(info.os_version.as_deref(), Some("14.5"));
        assert_eq!(info.architecture.as_deref(), Some("arm64"));
        assert_eq!(info.hostname.as_deref(), Some("mac-01.local"));
        assert_eq!(info.uptime_seconds, Some(3600));
        assert_eq!(
            info.local_users,
            vec![LocalUser {
                username: "alice".into(),
                uid: Some(501),
                shell: Some("/bin/zsh".into()),
            }]
        );
    }

    #[test]
    fn test_all_probes_failing_marks_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        let exec = scripted_executor(&runner, false);

        let result = SystemModule.collect(&exec).unwrap();
        assert!(!result.succeeded());
        assert!(result.error_message().unwrap().starts_with("4 of 4"));
    }
}
