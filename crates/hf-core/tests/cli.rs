//! Command-line surface of the `hostfacts` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

/// Binary with config environment cleared and `config` as the config file.
fn hostfacts(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hostfacts").unwrap();
    for var in [
        "HOSTFACTS_CONFIG",
        "HOSTFACTS_CONFIG_DIR",
        "HOSTFACTS_ENGINE_PATH",
        "HOSTFACTS_EXTENSION_PATH",
        "HOSTFACTS_MODULES",
        "HOSTFACTS_DISABLE_EXTENSION",
        "HF_LOG",
        "HF_LOG_FORMAT",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.arg("--config").arg(config);
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.json");
    std::fs::write(&path, body).unwrap();
    path
}

const OFFLINE_CONFIG: &str = r#"{
    "engine_path": "/nonexistent/osqueryi",
    "extension_enabled": false,
    "enabled_modules": ["security"],
    "probe_timeout_secs": 2
}"#;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("hostfacts")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("collect")
                .and(predicate::str::contains("module"))
                .and(predicate::str::contains("check")),
        );
}

#[test]
fn modules_lists_builtin_ids() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), OFFLINE_CONFIG);
    hostfacts(&config)
        .arg("modules")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"security\"")
                .and(predicate::str::contains("\"management\""))
                .and(predicate::str::contains("\"hardware\"")),
        );
}

#[test]
fn unknown_module_exits_with_module_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), OFFLINE_CONFIG);
    hostfacts(&config)
        .args(["module", "doesNotExist"])
        .assert()
        .code(12)
        .stderr(predicate::str::contains("module not found"));
}

#[test]
fn invalid_config_exits_with_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "{ not json");
    hostfacts(&config).args(["collect"]).assert().code(11);
}

#[test]
fn collect_of_unknown_modules_prints_empty_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), OFFLINE_CONFIG);
    let output = hostfacts(&config)
        .args(["collect", "--modules", "doesNotExist"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["modules"], serde_json::json!({}));
    assert_eq!(report["metadata"]["enabledModules"], serde_json::json!(["doesNotExist"]));
    assert!(report["metadata"]["deviceId"].as_str().is_some());
}

#[test]
fn check_reports_config_source() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), OFFLINE_CONFIG);
    hostfacts(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("CLI argument")
                .and(predicate::str::contains("\"engine\"")),
        );
}
