//! Firewall policies and their compilation to non-overlapping deny rules.
//!
//! A policy names the traffic it guards (source prefix, destination host, protocol)
//! and the port bands that stay open. The table only matches port *ranges*, so the
//! denied space is split into the ranges around the open bands and every
//! destination range is paired with every source range.

use crate::error::ConfigError;
use crate::util::flow::{Flow, FlowAction, FlowMatch, FlowTable};
use crate::util::value::{EXACT, LPM, RANGE};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

/// An inclusive port range, written `[low, high]` in config files.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(from = "(u16, u16)", into = "(u16, u16)")]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

impl PortRange {
    pub const UNIVERSE: PortRange = PortRange { low: 1, high: 65535 };

    pub fn new(low: u16, high: u16) -> PortRange {
        PortRange { low, high }
    }

    pub fn single(port: u16) -> PortRange {
        PortRange { low: port, high: port }
    }

    pub fn is_valid(&self) -> bool {
        self.low <= self.high
    }

    pub fn contains(&self, port: u16) -> bool {
        self.low <= port && port <= self.high
    }

    pub fn intersects(&self, other: &PortRange) -> bool {
        self.low <= other.high && other.low <= self.high
    }
}

impl From<(u16, u16)> for PortRange {
    fn from((low, high): (u16, u16)) -> Self {
        PortRange { low, high }
    }
}

impl From<PortRange> for (u16, u16) {
    fn from(r: PortRange) -> Self {
        (r.low, r.high)
    }
}

impl Display for PortRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.low, self.high)
    }
}

/// The sorted sub-ranges of `universe` not covered by any of `bands`.
///
/// Bands may overlap each other or reach outside the universe. An empty result means
/// the bands cover everything.
pub fn complement(universe: PortRange, bands: &[PortRange]) -> Vec<PortRange> {
    let mut bands: Vec<PortRange> = bands
        .iter()
        .filter(|b| b.is_valid() && b.intersects(&universe))
        .copied()
        .collect();
    bands.sort();

    let mut ret = vec![];
    // next port not yet covered, u32 so it can step past 65535
    let mut next = universe.low as u32;
    for band in bands {
        if (band.low as u32) > next {
            ret.push(PortRange::new(next as u16, band.low - 1));
        }
        next = next.max(band.high as u32 + 1);
    }
    if next <= universe.high as u32 {
        ret.push(PortRange::new(next as u16, universe.high));
    }
    ret
}

fn default_protocol() -> u8 {
    6
}

fn default_priority() -> i32 {
    1
}

/// Deny `protocol` traffic from `src` to `dst` except on the permitted port bands.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FirewallPolicy {
    pub src: Ipv4Net,
    pub dst: Ipv4Addr,
    #[serde(default = "default_protocol")]
    pub protocol: u8,
    #[serde(default)]
    pub permit_dst_ports: Vec<PortRange>,
    #[serde(default)]
    pub permit_src_ports: Vec<PortRange>,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

/// One row of the firewall table.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DenyRule {
    pub src: Ipv4Net,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub dst_ports: PortRange,
    pub src_ports: PortRange,
    pub priority: i32,
}

impl FirewallPolicy {
    /// Destination ranges × source ranges, destination-major.
    pub fn compile(&self) -> Vec<DenyRule> {
        let dst_ranges = complement(PortRange::UNIVERSE, &self.permit_dst_ports);
        let src_ranges = complement(PortRange::UNIVERSE, &self.permit_src_ports);
        let mut ret = Vec::with_capacity(dst_ranges.len() * src_ranges.len());
        for dst_ports in &dst_ranges {
            for src_ports in &src_ranges {
                ret.push(DenyRule {
                    src: self.src.trunc(),
                    dst: self.dst,
                    protocol: self.protocol,
                    dst_ports: *dst_ports,
                    src_ports: *src_ports,
                    priority: self.priority,
                });
            }
        }
        ret
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(band) = self
            .permit_dst_ports
            .iter()
            .chain(self.permit_src_ports.iter())
            .find(|b| !b.is_valid())
        {
            return Err(ConfigError::Invalid(format!(
                "firewall {} -> {} has an empty port band {}",
                self.src, self.dst, band
            )));
        }
        Ok(())
    }
}

impl DenyRule {
    /// Whether some packet would match both rules.
    pub fn overlaps(&self, other: &DenyRule) -> bool {
        self.dst == other.dst
            && self.protocol == other.protocol
            && (self.src.contains(&other.src) || other.src.contains(&self.src))
            && self.dst_ports.intersects(&other.dst_ports)
            && self.src_ports.intersects(&other.src_ports)
    }

    pub fn to_flow(&self, names: &FirewallNames) -> Flow {
        Flow {
            table: FlowTable::new(
                &names.table,
                vec![
                    FlowMatch::new(&names.src_field, LPM(self.src.addr(), self.src.prefix_len() as i32)),
                    FlowMatch::new(&names.dst_field, EXACT(self.dst)),
                    FlowMatch::new(&names.protocol_field, EXACT(self.protocol)),
                    FlowMatch::new(
                        &names.dst_port_field,
                        RANGE(self.dst_ports.low, self.dst_ports.high),
                    ),
                    FlowMatch::new(
                        &names.src_port_field,
                        RANGE(self.src_ports.low, self.src_ports.high),
                    ),
                ],
            ),
            action: FlowAction::new(&names.action, vec![]),
            priority: self.priority,
        }
    }
}

impl Display for DenyRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "deny {} -> {} proto {} dport {} sport {} (priority {})",
            self.src, self.dst, self.protocol, self.dst_ports, self.src_ports, self.priority
        )
    }
}

/// Table, field and action names of the firewall stage.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallNames {
    pub table: String,
    pub src_field: String,
    pub dst_field: String,
    pub protocol_field: String,
    pub dst_port_field: String,
    pub src_port_field: String,
    pub action: String,
}

impl Default for FirewallNames {
    fn default() -> Self {
        FirewallNames {
            table: "MyIngress.firewall".to_owned(),
            src_field: "hdr.ipv4.srcAddr".to_owned(),
            dst_field: "hdr.ipv4.dstAddr".to_owned(),
            protocol_field: "hdr.ipv4.protocol".to_owned(),
            dst_port_field: "hdr.tcp.dstPort".to_owned(),
            src_port_field: "hdr.tcp.srcPort".to_owned(),
            action: "MyIngress.drop".to_owned(),
        }
    }
}

/// Report rules of equal priority whose match spaces intersect.
///
/// The switch picks one of them arbitrarily, so with `allow` unset this is an error;
/// with `allow` set every pair is logged as a warning instead.
pub fn check_overlaps(device: &str, rules: &[DenyRule], allow: bool) -> Result<(), ConfigError> {
    for (i, a) in rules.iter().enumerate() {
        for (j, b) in rules.iter().enumerate().skip(i + 1) {
            if a.priority == b.priority && a.overlaps(b) {
                if !allow {
                    return Err(ConfigError::FirewallOverlap {
                        device: device.to_owned(),
                        first: i,
                        second: j,
                        priority: a.priority,
                    });
                }
                log::warn!(target: "firewall", "{}: rule #{} ({}) overlaps rule #{} ({})", device, i, a, j, b);
            }
        }
    }
    Ok(())
}
