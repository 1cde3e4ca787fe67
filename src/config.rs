//! Declarative provisioning data for the controller, read from JSON.

use crate::error::ConfigError;
use crate::firewall::{FirewallNames, FirewallPolicy};
use crate::p4rt::switch::ElectionId;
use crate::util::value::MAC;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub election_id: ElectionId,
    #[serde(default)]
    pub mode: ProvisionMode,
    #[serde(default = "default_arbitration_timeout")]
    pub arbitration_timeout_secs: u64,
    #[serde(default)]
    pub pipeline: PipelineNames,
    #[serde(default)]
    pub firewall: FirewallSettings,
    #[serde(default)]
    pub poll: PollConfig,
    pub switches: Vec<SwitchConfig>,
}

fn default_arbitration_timeout() -> u64 {
    5
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionMode {
    /// one switch after another
    Sequential,
    /// every switch in its own future, joined
    Concurrent,
}

impl Default for ProvisionMode {
    fn default() -> Self {
        ProvisionMode::Sequential
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallSettings {
    /// Only warn about firewall rules of equal priority whose match spaces intersect.
    pub allow_equal_priority_overlap: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub counter: String,
    pub index: i64,
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            counter: "MyIngress.c".to_owned(),
            index: 1,
            interval_secs: 10,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// A single-key rewrite table: `key` selects the row, `action(param)` rewrites a MAC.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RewriteNames {
    pub table: String,
    pub key: String,
    pub action: String,
    pub param: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ForwardNames {
    pub table: String,
    pub key: String,
    pub action: String,
    pub next_hop_param: String,
    pub port_param: String,
}

/// Names of the tables, keys, actions and params the controller writes to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineNames {
    pub src_mac: RewriteNames,
    pub forward: ForwardNames,
    pub dst_mac: RewriteNames,
    pub firewall: FirewallNames,
}

impl Default for PipelineNames {
    fn default() -> Self {
        PipelineNames {
            src_mac: RewriteNames {
                table: "MyIngress.src_mac".to_owned(),
                key: "standard_metadata.egress_spec".to_owned(),
                action: "MyIngress.rewrite_src_mac".to_owned(),
                param: "src_mac".to_owned(),
            },
            forward: ForwardNames {
                table: "MyIngress.ipv4_lpm".to_owned(),
                key: "hdr.ipv4.dstAddr".to_owned(),
                action: "MyIngress.ipv4_fwd".to_owned(),
                next_hop_param: "nxt_hop".to_owned(),
                port_param: "port".to_owned(),
            },
            dst_mac: RewriteNames {
                table: "MyIngress.dst_mac".to_owned(),
                key: "meta.next_hop_ipv4".to_owned(),
                action: "MyIngress.rewrite_dst_mac".to_owned(),
                param: "dst_mac".to_owned(),
            },
            firewall: FirewallNames::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    pub address: String,
    pub device_id: u64,
    /// Append every request sent to this switch to the given file.
    #[serde(default)]
    pub proto_dump_file: Option<PathBuf>,
    /// Source MAC to put on frames leaving each egress port.
    pub port_macs: BTreeMap<u32, MAC>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub firewall: Vec<FirewallPolicy>,
}

/// Traffic to `dst` leaves through `port` towards `next_hop`, whose MAC is `next_hop_mac`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub dst: Ipv4Net,
    pub next_hop: Ipv4Addr,
    pub port: u32,
    pub next_hop_mac: MAC,
}

impl ControllerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ControllerConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_owned(),
            error,
        })?;
        let config: ControllerConfig =
            serde_json::from_str(&content).map_err(|error| ConfigError::Parse {
                path: path.to_owned(),
                error,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.switches.is_empty() {
            return Err(ConfigError::Invalid("no switch configured".to_owned()));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid("poll interval must be positive".to_owned()));
        }
        let mut names = HashSet::new();
        let mut device_ids = HashSet::new();
        for sw in &self.switches {
            if !names.insert(sw.name.as_str()) {
                return Err(ConfigError::Invalid(format!("switch '{}' declared twice", sw.name)));
            }
            if !device_ids.insert(sw.device_id) {
                return Err(ConfigError::Invalid(format!(
                    "device id {} of '{}' is already used",
                    sw.device_id, sw.name
                )));
            }
            sw.validate()?;
        }
        Ok(())
    }

    pub fn switch(&self, name: &str) -> Option<&SwitchConfig> {
        self.switches.iter().find(|s| s.name == name)
    }
}

impl SwitchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_macs.is_empty() {
            return Err(ConfigError::Invalid(format!("'{}' has no port MAC", self.name)));
        }
        let mut next_hop_macs: HashMap<Ipv4Addr, MAC> = HashMap::new();
        for route in &self.routes {
            if !self.port_macs.contains_key(&route.port) {
                return Err(ConfigError::Invalid(format!(
                    "'{}' routes {} through port {} which has no MAC",
                    self.name, route.dst, route.port
                )));
            }
            // both routes would share one dst_mac row
            match next_hop_macs.insert(route.next_hop, route.next_hop_mac) {
                Some(mac) if mac != route.next_hop_mac => {
                    return Err(ConfigError::Invalid(format!(
                        "'{}' next hop {} has two MACs {} and {}",
                        self.name, route.next_hop, mac, route.next_hop_mac
                    )));
                }
                _ => {}
            }
        }
        for policy in &self.firewall {
            policy.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_config() -> ControllerConfig {
        ControllerConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/s-router.json")).unwrap()
    }

    #[test]
    fn test_load_demo() {
        let config = demo_config();
        assert_eq!(config.switches.len(), 3);
        assert_eq!(config.mode, ProvisionMode::Sequential);
        assert_eq!(config.election_id, ElectionId::new(0, 1));
        assert_eq!(config.poll.counter, "MyIngress.c");
        assert_eq!(config.poll.interval(), Duration::from_secs(10));

        let r1 = config.switch("r1").unwrap();
        assert_eq!(r1.address, "127.0.0.1:50051");
        assert_eq!(r1.port_macs.get(&3), MAC::of("00:aa:bb:00:00:01").as_ref());
        assert_eq!(r1.routes.len(), 5);
        assert_eq!(r1.routes[3].dst, "10.0.2.0/24".parse::<Ipv4Net>().unwrap());
        assert_eq!(r1.firewall.len(), 6);
        assert_eq!(config.pipeline, PipelineNames::default());
    }

    #[test]
    fn test_validate() {
        let mut config = demo_config();
        config.switches[1].device_id = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = demo_config();
        config.switches[0].routes[0].port = 7;
        assert!(config.validate().is_err());

        let mut config = demo_config();
        config.switches[0].routes[1].next_hop = config.switches[0].routes[0].next_hop;
        assert!(config.validate().is_err());

        let mut config = demo_config();
        config.switches[2].name = "r1".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimal_json() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{"switches": [{"name": "s1", "address": "127.0.0.1:50051", "device_id": 0,
                "port_macs": {"1": "00:00:00:00:01:01"}}], "mode": "concurrent"}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.mode, ProvisionMode::Concurrent);
        assert_eq!(config.arbitration_timeout_secs, 5);
        assert!(!config.firewall.allow_equal_priority_overlap);
        assert!(config.switches[0].routes.is_empty());
    }
}
