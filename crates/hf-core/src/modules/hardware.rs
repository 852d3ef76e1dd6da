//! Hardware inventory.

use super::{number, run_probes, text, Module, ModulePayload, ProbeTally};
use crate::probe::{FallbackExecutor, NormalizedRecord, ProbeSpec};
use crate::report::ModuleResult;
use hf_common::{ModuleId, Result};
use serde::Serialize;
use std::collections::BTreeMap;

const ID: &str = "hardware";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInfo {
    pub total_bytes: Option<i64>,
    pub available_bytes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryInfo {
    pub cycle_count: Option<i64>,
    pub health: Option<String>,
    pub percent_remaining: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInfo {
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub cpu_brand: Option<String>,
    pub cpu_physical_cores: Option<i64>,
    pub cpu_logical_cores: Option<i64>,
    pub memory_bytes: Option<i64>,
    pub boot_disk: Option<DiskInfo>,
    pub battery: Option<BatteryInfo>,
}

fn probes() -> Vec<ProbeSpec> {
    vec![
        // {"items":[{"hardware_vendor":..,"hardware_model":..,"hardware_serial":..,"cpu_brand":..,...}]}
        // or {"cpu_brand":..,"physical_memory":..}
        ProbeSpec::new(ID, "system_info")
            .query(
                "SELECT hardware_vendor, hardware_model, hardware_serial, cpu_brand, \
                 cpu_physical_cores, cpu_logical_cores, physical_memory FROM system_info;",
            )
            .shell(
                "printf '{\"cpu_brand\":\"%s\",\"physical_memory\":\"%s\"}' \
                 \"$(sysctl -n machdep.cpu.brand_string 2>/dev/null)\" \
                 \"$(sysctl -n hw.memsize 2>/dev/null)\"",
            ),
        // {"items":[{"blocks":..,"blocks_size":..,"blocks_available":..}]}
        // or {"total_kb":..,"available_kb":..}
        ProbeSpec::new(ID, "boot_disk")
            .query("SELECT blocks, blocks_size, blocks_available FROM mounts WHERE path = '/';")
            .shell(
                "df -k / | awk 'NR==2 {printf \"{\\\"total_kb\\\":\\\"%s\\\",\\\"available_kb\\\":\\\"%s\\\"}\", $2, $4}'",
            ),
        // {"items":[{"cycle_count":..,"health":..,"percent_remaining":..}]}; no rows on desktops
        ProbeSpec::new(ID, "battery")
            .query("SELECT cycle_count, health, percent_remaining FROM battery;"),
    ]
}

fn boot_disk(record: Option<&NormalizedRecord>) -> Option<DiskInfo> {
    let record = record?;
    if record.is_empty() {
        return None;
    }
    let r = Some(record);
    let disk = match number(r, &["blocks_size"]) {
        Some(block) => DiskInfo {
            total_bytes: number(r, &["blocks"]).map(|b| b * block),
            available_bytes: number(r, &["blocks_available"]).map(|b| b * block),
        },
        None => DiskInfo {
            total_bytes: number(r, &["total_kb"]).map(|kb| kb * 1024),
            available_bytes: number(r, &["available_kb"]).map(|kb| kb * 1024),
        },
    };
    Some(disk)
}

fn battery(record: Option<&NormalizedRecord>) -> Option<BatteryInfo> {
    let record = record?;
    if record.is_empty() {
        return None;
    }
    let r = Some(record);
    Some(BatteryInfo {
        cycle_count: number(r, &["cycle_count"]),
        health: text(r, &["health"]),
        percent_remaining: number(r, &["percent_remaining"]),
    })
}

impl HardwareInfo {
    fn from_records(records: &BTreeMap<String, NormalizedRecord>) -> Self {
        let info = records.get("system_info");
        Self {
            vendor: text(info, &["hardware_vendor"]),
            model: text(info, &["hardware_model"]),
            serial_number: text(info, &["hardware_serial"]),
            cpu_brand: text(info, &["cpu_brand"]),
            cpu_physical_cores: number(info, &["cpu_physical_cores"]),
            cpu_logical_cores: number(info, &["cpu_logical_cores"]),
            memory_bytes: number(info, &["physical_memory"]),
            boot_disk: boot_disk(records.get("boot_disk")),
            battery: battery(records.get("battery")),
        }
    }
}

/// Hardware inventory module.
#[derive(Debug, Default)]
pub struct HardwareModule;

impl Module for HardwareModule {
    fn id(&self) -> ModuleId {
        ModuleId::new(ID)
    }

    fn collect(&self, exec: &FallbackExecutor) -> Result<ModuleResult> {
        let mut tally = ProbeTally::new(self.id());
        let records = run_probes(exec, &mut tally, &probes());
        Ok(tally.finish(ModulePayload::Hardware(HardwareInfo::from_records(&records))))
    }
}
