//! Network interfaces, Wi-Fi, DNS, and listening services.

use super::{run_probes, text, Module, ModulePayload, ProbeTally};
use crate::probe::{FallbackExecutor, NormalizedRecord, ProbeSpec};
use crate::report::ModuleResult;
use hf_common::{ModuleId, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const ID: &str = "network";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub addresses: Vec<String>,
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiInfo {
    pub ssid: Option<String>,
    pub security_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningPort {
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub interfaces: Vec<NetworkInterface>,
    pub wifi: Option<WifiInfo>,
    pub dns_servers: Vec<String>,
    pub listening_ports: Vec<ListeningPort>,
}

fn probes() -> Vec<ProbeSpec> {
    vec![
        // {"items":[{"interface":"en0","address":"10.0.0.5"}, ...]}
        ProbeSpec::new(ID, "addresses").query(
            "SELECT interface, address FROM interface_addresses WHERE interface NOT LIKE 'lo%';",
        ),
        // {"items":[{"interface":"en0","mac":"aa:bb:..."}, ...]}
        ProbeSpec::new(ID, "interfaces")
            .query("SELECT interface, mac FROM interface_details WHERE interface NOT LIKE 'lo%';"),
        // {"items":[{"ssid":..,"security_type":..}]}; no rows without Wi-Fi
        ProbeSpec::new(ID, "wifi").query("SELECT ssid, security_type FROM wifi_status;"),
        // {"items":[{"address":"1.1.1.1"}, ...]} or {"dns":"1.1.1.1\n8.8.8.8"}
        ProbeSpec::new(ID, "dns")
            .query("SELECT address FROM dns_resolvers WHERE type = 'nameserver';")
            .shell("awk '/^nameserver/ {print $2}' /etc/resolv.conf")
            .fallback_on_empty(true),
        // {"items":[{"port":"22","protocol":"6"}, ...]}
        ProbeSpec::new(ID, "listening_ports").query(
            "SELECT DISTINCT port, protocol FROM listening_ports \
             WHERE address NOT IN ('127.0.0.1', '::1') AND port != 0;",
        ),
    ]
}

fn interfaces(
    addresses: Option<&NormalizedRecord>,
    details: Option<&NormalizedRecord>,
) -> Vec<NetworkInterface> {
    let mut by_name: BTreeMap<String, NetworkInterface> = BTreeMap::new();

    for row in addresses.map(|r| r.items()).unwrap_or_default() {
        let row = NormalizedRecord::new(row.clone());
        let Some(name) = row.first_str("interface") else {
            continue;
        };
        let entry = by_name.entry(name.clone()).or_insert_with(|| NetworkInterface {
            name,
            ..Default::default()
        });
        if let Some(address) = row.first_str("address") {
            entry.addresses.push(address);
        }
    }

    for row in details.map(|r| r.items()).unwrap_or_default() {
        let row = NormalizedRecord::new(row.clone());
        let Some(name) = row.first_str("interface") else {
            continue;
        };
        let entry = by_name.entry(name.clone()).or_insert_with(|| NetworkInterface {
            name,
            ..Default::default()
        });
        entry.mac = row.first_str("mac").filter(|m| m != "00:00:00:00:00:00");
    }

    by_name.into_values().collect()
}

fn dns_servers(record: Option<&NormalizedRecord>) -> Vec<String> {
    let Some(record) = record else {
        return Vec::new();
    };
    let from_rows = record.column("address");
    if !from_rows.is_empty() {
        return from_rows;
    }
    // Plain-text fallback: one server per line
    text(Some(record), &["dns"])
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn protocol_name(raw: &str) -> String {
    match raw {
        "6" => "tcp".to_string(),
        "17" => "udp".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

fn listening_ports(record: Option<&NormalizedRecord>) -> Vec<ListeningPort> {
    let mut ports = BTreeSet::new();
    for row in record.map(|r| r.items()).unwrap_or_default() {
        let row = NormalizedRecord::new(row.clone());
        let port = row
            .get_i64("port")
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0);
        if let Some(port) = port {
            let protocol = row
                .first_str("protocol")
                .map(|p| protocol_name(&p))
                .unwrap_or_default();
            ports.insert(ListeningPort { port, protocol });
        }
    }
    ports.into_iter().collect()
}

impl NetworkInfo {
    fn from_records(records: &BTreeMap<String, NormalizedRecord>) -> Self {
        let wifi = records
            .get("wifi")
            .filter(|r| !r.is_empty())
            .map(|r| WifiInfo {
                ssid: r.first_str("ssid"),
                security_type: r.first_str("security_type"),
            });

        Self {
            interfaces: interfaces(records.get("addresses"), records.get("interfaces")),
            wifi,
            dns_servers: dns_servers(records.get("dns")),
            listening_ports: listening_ports(records.get("listening_ports")),
        }
    }
}

/// Network configuration module.
#[derive(Debug, Default)]
pub struct NetworkModule;

impl Module for NetworkModule {
    fn id(&self) -> ModuleId {
        ModuleId::new(ID)
    }

    fn collect(&self, exec: &FallbackExecutor) -> Result<ModuleResult> {
        let mut tally = ProbeTally::new(self.id());
        let records = run_probes(exec, &mut tally, &probes());
        Ok(tally.finish(ModulePayload::Network(NetworkInfo::from_records(&records))))
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
                    "FROM interface_addresses",
                    r#"[{"interface":"en0","address":"10.0.0.5"},
                        {"interface":"en0","address":"fe80::1"}]"#,
                )
                .on_query(
                    "FROM interface_details",
                    r#"[{"interface":"en0","mac":"aa:bb:cc:dd:ee:ff"},
                        {"interface":"utun0","mac":"00:00:00:00:00:00"}]"#,
                )
                .on_query("FROM wifi_status", r#"[{"ssid":"corp","security_type":"WPA2 Enterprise"}]"#)
                .on_query("FROM dns_resolvers", r#"[{"address":"10.0.0.1"}]"#)
                .on_query(
                    "FROM listening_ports",
                    r#"[{"port":"22","protocol":"6"},{"port":"5353","protocol":"17"},{"port":"0","protocol":"6"}]"#,
                ),
        );
        let exec = scripted_executor(&runner, false);

        let result = NetworkModule.collect(&exec).unwrap();
        assert!(result.succeeded());
        let ModulePayload::Network(info) = result.payload() else {
            panic!("expected network payload");
        };
        assert_eq!(info.interfaces.len(), 2);
        assert_eq!(info.interfaces[0].name, "en0");
        assert_eq!(info.interfaces[0].addresses, vec!["10.0.0.5", "fe80::1"]);
        assert_eq!(info.interfaces[0].mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(info.interfaces[1].mac, None);
        assert_eq!(info.wifi.as_ref().unwrap().ssid.as_deref(), Some("corp"));
        assert_eq!(info.dns_servers, vec!["10.0.0.1"]);
        assert_eq!(
            info.listening_ports,
            vec![
                ListeningPort { port: 22, protocol: "tcp".into() },
                ListeningPort { port: 5353, protocol: "udp".into() },
            ]
        );
    }

    #[test]
    fn test_empty_dns_rows_fall_back_to_resolv_conf() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_query("FROM dns_resolvers", "[]")
                .on_shell("resolv.conf", "1.1.1.1\n8.8.8.8\n"),
        );
        let exec = scripted_executor(&runner, false);

        let result = NetworkModule.collect(&exec).unwrap();
        let ModulePayload::Network(info) = result.payload() else {
            panic!("expected network payload");
        };
        assert_eq!(info.dns_servers, vec!["1.1.1.1", "8.8.8.8"]);
        assert!(info.wifi.is_none());
    }
}
