//! Device identity for report metadata.

use crate::collect::{CommandRunner, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Placeholder for facts that could not be determined.
pub const UNKNOWN: &str = "Unknown";

/// Hardware identity of the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub serial_number: String,
    pub model_identifier: String,
    pub os_version: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            serial_number: UNKNOWN.to_string(),
            model_identifier: UNKNOWN.to_string(),
            os_version: UNKNOWN.to_string(),
        }
    }
}

impl DeviceIdentity {
    pub fn has_serial(&self) -> bool {
        !self.serial_number.is_empty() && self.serial_number != UNKNOWN
    }
}

/// Source of the device identity. Never fails; unknown facts are "Unknown".
pub trait DeviceIdentityProbe: Send + Sync {
    fn identify(&self) -> DeviceIdentity;
}

/// Identity read from the platform hardware description.
///
/// macOS: `system_profiler SPHardwareDataType -json` and `sw_vers`.
/// Elsewhere: DMI attributes under `/sys/class/dmi/id` and `/etc/os-release`.
pub struct HardwareIdentityProbe {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    dmi_root: PathBuf,
    os_release: PathBuf,
}

impl HardwareIdentityProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            dmi_root: PathBuf::from("/sys/class/dmi/id"),
            os_release: PathBuf::from("/etc/os-release"),
        }
    }

    pub fn with_dmi_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dmi_root = root.into();
        self
    }

    pub fn with_os_release(mut self, path: impl Into<PathBuf>) -> Self {
        self.os_release = path.into();
        self
    }

    fn from_sw_vers(&self) -> Option<String> {
        let spec = ToolSpec::new("/usr/bin/sw_vers", vec!["-productVersion".to_string()])
            .with_timeout(self.timeout);
        let output = self.runner.run(&spec).ok().filter(|o| o.success())?;
        let version = output.stdout_text().ok()?.trim().to_string();
        (!version.is_empty()).then_some(version)
    }

    fn from_system_profiler(&self) -> Option<DeviceIdentity> {
        let spec = ToolSpec::new(
            "/usr/sbin/system_profiler",
            vec!["SPHardwareDataType".to_string(), "-json".to_string()],
        )
        .with_timeout(self.timeout);

        let output = match self.runner.run(&spec) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                debug!(exit_code = ?output.exit_code, "system_profiler failed");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "system_profiler unavailable");
                return None;
            }
        };
        parse_system_profiler(output.stdout_text().ok()?)
    }
}

impl DeviceIdentityProbe for HardwareIdentityProbe {
    fn identify(&self) -> DeviceIdentity {
        let (hardware, os_version) = if cfg!(target_os = "macos") {
            (self.from_system_profiler(), self.from_sw_vers())
        } else {
            (read_dmi(&self.dmi_root), read_os_release(&self.os_release))
        };
        let mut identity = hardware.unwrap_or_default();
        if let Some(version) = os_version {
            identity.os_version = version;
        }
        identity
    }
}

/// Parse `system_profiler SPHardwareDataType -json` output.
pub fn parse_system_profiler(text: &str) -> Option<DeviceIdentity> {
    let value: Value = serde_json::from_str(text).ok()?;
    let hw = value.get("SPHardwareDataType")?.as_array()?.first()?;
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| hw.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN.to_string())
    };
    Some(DeviceIdentity {
        serial_number: field(&["serial_number"]),
        model_identifier: field(&["machine_model", "model_number"]),
        ..Default::default()
    })
}

/// Read DMI product attributes. The serial is usually root-only.
pub fn read_dmi(root: &Path) -> Option<DeviceIdentity> {
    let read = |name: &str| {
        std::fs::read_to_string(root.join(name))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let serial = read("product_serial");
    let model = read("product_name");
    if serial.is_none() && model.is_none() {
        return None;
    }
    Some(DeviceIdentity {
        serial_number: serial.unwrap_or_else(|| UNKNOWN.to_string()),
        model_identifier: model.unwrap_or_else(|| UNKNOWN.to_string()),
        ..Default::default()
    })
}

/// `VERSION_ID` from an os-release file.
pub fn read_os_release(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().find_map(|line| {
        line.strip_prefix("VERSION_ID=")
            .map(|v| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Identity fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProbe(pub DeviceIdentity);

impl DeviceIdentityProbe for StaticIdentityProbe {
    fn identify(&self) -> DeviceIdentity {
        self.0.clone()
    }
}
