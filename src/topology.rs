//! Description of the emulated network the routers are wired into, and the commands
//! that create it, configure its hosts and switches, and tear it down.

use crate::config::ControllerConfig;
use crate::error::TopologyError;
use crate::representation::Endpoint;
use crate::util::value::MAC;
use ipnet::Ipv4Net;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

pub mod runner;

/// Longest interface name the kernel accepts.
const MAX_INTERFACE_NAME: usize = 15;

/// Name of the single link inside every host.
const HOST_INTERFACE: &str = "eth0";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// How to run a command inside a host, `{host}` is replaced by the host name.
    #[serde(default = "default_host_exec")]
    pub host_exec: String,
    /// Prepended to every command run on the emulation machine itself.
    #[serde(default)]
    pub command_prefix: Vec<String>,
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    #[serde(default)]
    pub bmv2: Bmv2Settings,
    pub routers: Vec<RouterConfig>,
    #[serde(default)]
    pub switches: Vec<L2SwitchConfig>,
    pub hosts: Vec<HostConfig>,
    pub links: Vec<LinkConfig>,
}

fn default_host_exec() -> String {
    "ip netns exec {host}".to_owned()
}

fn default_settle_secs() -> u64 {
    1
}

/// How the software routers are started.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Bmv2Settings {
    #[serde(default = "default_behavioral_exe")]
    pub behavioral_exe: String,
    /// Program loaded at start; without one the controller pushes it.
    #[serde(default)]
    pub json: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_behavioral_exe() -> String {
    "simple_switch_grpc".to_owned()
}

impl Default for Bmv2Settings {
    fn default() -> Self {
        Bmv2Settings {
            behavioral_exe: default_behavioral_exe(),
            json: None,
            log_dir: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub name: String,
    pub device_id: u64,
    pub grpc_port: u16,
    pub thrift_port: u16,
    #[serde(default = "default_cpu_port")]
    pub cpu_port: u32,
}

fn default_cpu_port() -> u32 {
    510
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L2SwitchConfig {
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    pub ip: Ipv4Net,
    pub mac: MAC,
    pub gateway: Ipv4Addr,
    pub gateway_mac: MAC,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkEnd {
    pub node: String,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub mac: Option<MAC>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    pub a: LinkEnd,
    pub b: LinkEnd,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeKind {
    Router,
    Switch,
    Host,
}

impl NodeKind {
    /// First port number handed out on a node of this kind.
    fn port_base(&self) -> u32 {
        match self {
            NodeKind::Host => 0,
            NodeKind::Router | NodeKind::Switch => 1,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedEnd {
    pub node: String,
    pub port: u32,
    pub mac: Option<MAC>,
}

impl ResolvedEnd {
    pub fn interface(&self) -> String {
        format!("{}-eth{}", self.node, self.port)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedLink {
    pub a: ResolvedEnd,
    pub b: ResolvedEnd,
}

/// A setup or teardown step, run on the machine hosting the emulation or inside one host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TopologyCommand {
    AddNamespace { host: String },
    /// An OVS bridge that only forwards along the flows it is given.
    AddBridge { switch: String },
    AddVeth { a: String, b: String },
    SetAddress { interface: String, mac: MAC },
    MoveToHost { interface: String, host: String },
    /// Attach an interface to a bridge under a fixed OpenFlow port number.
    AddBridgePort { switch: String, interface: String, port: u32 },
    LinkUp { interface: String },
    HostRename { host: String, interface: String },
    HostLinkUp { host: String, interface: String },
    HostAddress { host: String, ip: Ipv4Net },
    /// Start a software router, it keeps running in the background.
    StartRouter {
        router: RouterConfig,
        ports: Vec<(u32, String)>,
        bmv2: Bmv2Settings,
    },
    /// Let an L2 switch forward everything arriving on `port` normally.
    SwitchFlow { switch: String, port: u32 },
    /// Pin the gateway MAC in the host ARP cache.
    HostArp { host: String, ip: Ipv4Addr, mac: MAC },
    HostDefaultRoute { host: String, gateway: Ipv4Addr },
    DeleteBridge { switch: String },
    DeleteNamespace { host: String },
    DeleteLink { interface: String },
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| (*p).to_owned()).collect()
}

impl TopologyCommand {
    fn args(&self) -> Vec<String> {
        match self {
            TopologyCommand::AddNamespace { host } => strings(&["ip", "netns", "add", host]),
            TopologyCommand::AddBridge { switch } => strings(&[
                "ovs-vsctl",
                "--may-exist",
                "add-br",
                switch,
                "--",
                "set-fail-mode",
                switch,
                "secure",
            ]),
            TopologyCommand::AddVeth { a, b } => strings(&["ip", "link", "add", a, "type", "veth", "peer", "name", b]),
            TopologyCommand::SetAddress { interface, mac } => {
                strings(&["ip", "link", "set", "dev", interface, "address", &mac.to_string()])
            }
            TopologyCommand::MoveToHost { interface, host } => strings(&["ip", "link", "set", interface, "netns", host]),
            TopologyCommand::AddBridgePort { switch, interface, port } => strings(&[
                "ovs-vsctl",
                "add-port",
                switch,
                interface,
                "--",
                "set",
                "Interface",
                interface,
                &format!("ofport_request={}", port),
            ]),
            TopologyCommand::LinkUp { interface } | TopologyCommand::HostLinkUp { interface, .. } => {
                strings(&["ip", "link", "set", "dev", interface, "up"])
            }
            TopologyCommand::HostRename { interface, .. } => {
                strings(&["ip", "link", "set", "dev", interface, "name", HOST_INTERFACE])
            }
            TopologyCommand::HostAddress { ip, .. } => {
                strings(&["ip", "addr", "add", &ip.to_string(), "dev", HOST_INTERFACE])
            }
            TopologyCommand::StartRouter { router, ports, bmv2 } => {
                let mut args = vec![
                    bmv2.behavioral_exe.clone(),
                    "--device-id".to_owned(),
                    router.device_id.to_string(),
                ];
                for (port, interface) in ports {
                    args.push("-i".to_owned());
                    args.push(format!("{}@{}", port, interface));
                }
                args.push("--thrift-port".to_owned());
                args.push(router.thrift_port.to_string());
                if let Some(dir) = &bmv2.log_dir {
                    args.push("--log-file".to_owned());
                    args.push(dir.join(&router.name).display().to_string());
                    args.push("--log-flush".to_owned());
                }
                match &bmv2.json {
                    Some(json) => args.push(json.display().to_string()),
                    None => args.push("--no-p4".to_owned()),
                }
                args.push("--".to_owned());
                args.push("--grpc-server-addr".to_owned());
                args.push(format!("0.0.0.0:{}", router.grpc_port));
                args.push("--cpu-port".to_owned());
                args.push(router.cpu_port.to_string());
                args
            }
            TopologyCommand::SwitchFlow { switch, port } => strings(&[
                "ovs-ofctl",
                "add-flow",
                switch,
                &format!("in_port={},actions=normal", port),
            ]),
            TopologyCommand::HostArp { ip, mac, .. } => {
                strings(&["arp", "-i", HOST_INTERFACE, "-s", &ip.to_string(), &mac.to_string()])
            }
            TopologyCommand::HostDefaultRoute { gateway, .. } => strings(&[
                "ip",
                "route",
                "replace",
                "default",
                "dev",
                HOST_INTERFACE,
                "via",
                &gateway.to_string(),
            ]),
            TopologyCommand::DeleteBridge { switch } => strings(&["ovs-vsctl", "--if-exists", "del-br", switch]),
            TopologyCommand::DeleteNamespace { host } => strings(&["ip", "netns", "del", host]),
            TopologyCommand::DeleteLink { interface } => strings(&["ip", "link", "del", interface]),
        }
    }

    /// The host a command runs inside, `None` for the emulation machine.
    pub fn host(&self) -> Option<&str> {
        match self {
            TopologyCommand::HostRename { host, .. }
            | TopologyCommand::HostLinkUp { host, .. }
            | TopologyCommand::HostAddress { host, .. }
            | TopologyCommand::HostArp { host, .. }
            | TopologyCommand::HostDefaultRoute { host, .. } => Some(host.as_str()),
            _ => None,
        }
    }

    /// Whether the command keeps running instead of exiting once done.
    pub fn is_daemon(&self) -> bool {
        matches!(self, TopologyCommand::StartRouter { .. })
    }

    /// The full argument vector, wrapped for the node the command targets.
    pub fn argv(&self, host_exec: &str, command_prefix: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = match self.host() {
            Some(host) => host_exec
                .split_whitespace()
                .map(|part| part.replace("{host}", host))
                .collect(),
            None => command_prefix.to_vec(),
        };
        argv.extend(self.args());
        argv
    }
}

impl Display for TopologyCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.host() {
            Some(host) => write!(f, "{}: {}", host, self.args().join(" ")),
            None => write!(f, "{}", self.args().join(" ")),
        }
    }
}

/// A validated topology with every link port resolved.
#[derive(Clone, Debug)]
pub struct Topology {
    pub config: TopologyConfig,
    pub links: Vec<ResolvedLink>,
    kinds: HashMap<String, NodeKind>,
}

impl TopologyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<TopologyConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading topology {}: {}", path.display(), e))?;
        let config = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing topology {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Number the router thrift and gRPC ports upwards from the given bases, in
    /// declaration order.
    pub fn renumber_ports(&mut self, thrift_base: Option<u16>, grpc_base: Option<u16>) {
        for (offset, router) in (0u16..).zip(self.routers.iter_mut()) {
            if let Some(base) = thrift_base {
                router.thrift_port = base.saturating_add(offset);
            }
            if let Some(base) = grpc_base {
                router.grpc_port = base.saturating_add(offset);
            }
        }
    }
}

impl Topology {
    pub fn build(config: TopologyConfig) -> Result<Topology, TopologyError> {
        let mut kinds = HashMap::new();
        let nodes = config
            .routers
            .iter()
            .map(|r| (&r.name, NodeKind::Router))
            .chain(config.switches.iter().map(|s| (&s.name, NodeKind::Switch)))
            .chain(config.hosts.iter().map(|h| (&h.name, NodeKind::Host)));
        for (name, kind) in nodes {
            if kinds.insert(name.clone(), kind).is_some() {
                return Err(TopologyError::DuplicateNode(name.clone()));
            }
        }

        for host in &config.hosts {
            if !host.ip.contains(&host.gateway) {
                return Err(TopologyError::GatewayOutsideSubnet {
                    host: host.name.clone(),
                    gateway: host.gateway.to_string(),
                });
            }
        }

        // explicit ports are reserved up front so automatic ones never collide with them
        let mut used: HashMap<&str, Vec<u32>> = HashMap::new();
        for end in config.links.iter().flat_map(|l| vec![&l.a, &l.b]) {
            if !kinds.contains_key(&end.node) {
                return Err(TopologyError::UnknownNode(end.node.clone()));
            }
            if let Some(port) = end.port {
                let ports = used.entry(end.node.as_str()).or_default();
                if ports.contains(&port) {
                    return Err(TopologyError::DuplicatePort {
                        node: end.node.clone(),
                        port,
                    });
                }
                ports.push(port);
            }
        }

        let mut allocated: HashMap<String, Vec<u32>> = HashMap::new();
        let mut links = Vec::with_capacity(config.links.len());
        for link in &config.links {
            let mut resolve = |end: &LinkEnd| -> ResolvedEnd {
                let port = match end.port {
                    Some(port) => port,
                    None => {
                        let base = kinds[&end.node].port_base();
                        let taken = used.get(end.node.as_str());
                        let mine = allocated.entry(end.node.clone()).or_default();
                        let mut port = base;
                        while mine.contains(&port) || taken.map_or(false, |t| t.contains(&port)) {
                            port += 1;
                        }
                        port
                    }
                };
                allocated.entry(end.node.clone()).or_default().push(port);
                ResolvedEnd {
                    node: end.node.clone(),
                    port,
                    mac: end.mac,
                }
            };
            let a = resolve(&link.a);
            let b = resolve(&link.b);
            debug!(target: "topology", "link {} <-> {}", a.interface(), b.interface());
            links.push(ResolvedLink { a, b });
        }

        for end in links.iter().flat_map(|l| vec![&l.a, &l.b]) {
            let interface = end.interface();
            if interface.len() > MAX_INTERFACE_NAME {
                return Err(TopologyError::InterfaceName(interface));
            }
        }

        for host in &config.hosts {
            let ends: Vec<&ResolvedEnd> = links
                .iter()
                .flat_map(|l| vec![&l.a, &l.b])
                .filter(|e| e.node == host.name)
                .collect();
            if ends.len() != 1 {
                return Err(TopologyError::HostLinks {
                    host: host.name.clone(),
                    links: ends.len(),
                });
            }
            match ends[0].mac {
                Some(mac) if mac != host.mac => {
                    return Err(TopologyError::HostMac {
                        host: host.name.clone(),
                        link: mac.to_string(),
                        host_mac: host.mac.to_string(),
                    });
                }
                _ => {}
            }
        }

        Ok(Topology { config, links, kinds })
    }

    pub fn kind(&self, node: &str) -> Option<NodeKind> {
        self.kinds.get(node).copied()
    }

    fn ends(&self) -> impl Iterator<Item = &ResolvedEnd> {
        self.links.iter().flat_map(|l| vec![&l.a, &l.b])
    }

    /// Resolved ports of `node`, ascending.
    pub fn ports(&self, node: &str) -> Vec<u32> {
        let mut ports: Vec<u32> = self.ends().filter(|e| e.node == node).map(|e| e.port).collect();
        ports.sort_unstable();
        ports
    }

    /// Port to MAC of a router, as its controller configuration expects it.
    pub fn router_port_macs(&self, router: &str) -> BTreeMap<u32, MAC> {
        self.ends()
            .filter(|e| e.node == router)
            .filter_map(|e| e.mac.map(|mac| (e.port, mac)))
            .collect()
    }

    /// Control endpoints of the routers, reachable on the local machine.
    pub fn router_endpoints(&self) -> Vec<Endpoint> {
        self.config
            .routers
            .iter()
            .map(|r| Endpoint::new(&r.name, &format!("127.0.0.1:{}", r.grpc_port), r.device_id))
            .collect()
    }

    /// Router ports whose MAC differs from the one the controller configuration rewrites to.
    pub fn port_mac_mismatches(&self, config: &ControllerConfig) -> Vec<String> {
        let mut ret = vec![];
        for router in &self.config.routers {
            let wired = self.router_port_macs(&router.name);
            let configured = match config.switch(&router.name) {
                Some(sw) => &sw.port_macs,
                None => {
                    ret.push(format!("{} is not in the controller configuration", router.name));
                    continue;
                }
            };
            for (port, mac) in &wired {
                match configured.get(port) {
                    Some(c) if c == mac => {}
                    Some(c) => ret.push(format!("{} port {} is wired as {} but rewritten to {}", router.name, port, mac, c)),
                    None => ret.push(format!("{} port {} has no source MAC configured", router.name, port)),
                }
            }
        }
        ret
    }

    fn host(&self, name: &str) -> Option<&HostConfig> {
        self.config.hosts.iter().find(|h| h.name == name)
    }

    /// Commands wiring one end of a link once its veth pair exists.
    fn attach(&self, end: &ResolvedEnd, commands: &mut Vec<TopologyCommand>) {
        let interface = end.interface();
        match self.kind(&end.node) {
            Some(NodeKind::Host) => {
                if let Some(host) = self.host(&end.node) {
                    commands.push(TopologyCommand::SetAddress {
                        interface: interface.clone(),
                        mac: host.mac,
                    });
                }
                commands.push(TopologyCommand::MoveToHost {
                    interface,
                    host: end.node.clone(),
                });
            }
            kind => {
                if let Some(mac) = end.mac {
                    commands.push(TopologyCommand::SetAddress {
                        interface: interface.clone(),
                        mac,
                    });
                }
                if kind == Some(NodeKind::Switch) {
                    commands.push(TopologyCommand::AddBridgePort {
                        switch: end.node.clone(),
                        interface: interface.clone(),
                        port: end.port,
                    });
                }
                commands.push(TopologyCommand::LinkUp { interface });
            }
        }
    }

    /// Steps creating the network: host namespaces, bridges, links, host addresses
    /// and finally the routers.
    pub fn create_plan(&self) -> Vec<TopologyCommand> {
        let mut commands = vec![];
        for host in &self.config.hosts {
            commands.push(TopologyCommand::AddNamespace { host: host.name.clone() });
        }
        for switch in &self.config.switches {
            commands.push(TopologyCommand::AddBridge {
                switch: switch.name.clone(),
            });
        }
        for link in &self.links {
            commands.push(TopologyCommand::AddVeth {
                a: link.a.interface(),
                b: link.b.interface(),
            });
            self.attach(&link.a, &mut commands);
            self.attach(&link.b, &mut commands);
        }
        for host in &self.config.hosts {
            let end = self.ends().find(|e| e.node == host.name);
            if let Some(end) = end {
                commands.push(TopologyCommand::HostRename {
                    host: host.name.clone(),
                    interface: end.interface(),
                });
            }
            for interface in &["lo", HOST_INTERFACE] {
                commands.push(TopologyCommand::HostLinkUp {
                    host: host.name.clone(),
                    interface: (*interface).to_owned(),
                });
            }
            commands.push(TopologyCommand::HostAddress {
                host: host.name.clone(),
                ip: host.ip,
            });
        }
        for router in &self.config.routers {
            let ports = self
                .ports(&router.name)
                .into_iter()
                .map(|port| (port, format!("{}-eth{}", router.name, port)))
                .collect();
            commands.push(TopologyCommand::StartRouter {
                router: router.clone(),
                ports,
                bmv2: self.config.bmv2.clone(),
            });
        }
        commands
    }

    /// Steps configuring a created network: switch flows, then ARP and default route
    /// per host.
    pub fn configure_plan(&self) -> Vec<TopologyCommand> {
        let mut commands = vec![];
        for switch in &self.config.switches {
            for port in self.ports(&switch.name) {
                commands.push(TopologyCommand::SwitchFlow {
                    switch: switch.name.clone(),
                    port,
                });
            }
        }
        for host in &self.config.hosts {
            commands.push(TopologyCommand::HostArp {
                host: host.name.clone(),
                ip: host.gateway,
                mac: host.gateway_mac,
            });
            commands.push(TopologyCommand::HostDefaultRoute {
                host: host.name.clone(),
                gateway: host.gateway,
            });
        }
        commands
    }

    /// Every setup step in execution order.
    pub fn plan(&self) -> Vec<TopologyCommand> {
        let mut commands = self.create_plan();
        commands.extend(self.configure_plan());
        commands
    }

    /// Steps removing what [Topology::create_plan] made, routers excepted.
    ///
    /// Deleting a namespace takes the host link with it, the remaining links are
    /// deleted through their first end.
    pub fn teardown_plan(&self) -> Vec<TopologyCommand> {
        let mut commands = vec![];
        for switch in &self.config.switches {
            commands.push(TopologyCommand::DeleteBridge {
                switch: switch.name.clone(),
            });
        }
        for host in &self.config.hosts {
            commands.push(TopologyCommand::DeleteNamespace { host: host.name.clone() });
        }
        for link in &self.links {
            let hosted = [&link.a, &link.b]
                .iter()
                .any(|e| self.kind(&e.node) == Some(NodeKind::Host));
            if !hosted {
                commands.push(TopologyCommand::DeleteLink {
                    interface: link.a.interface(),
                });
            }
        }
        commands
    }

    async fn run_commands<R: runner::CommandRunner + ?Sized>(
        &self,
        runner: &mut R,
        commands: Vec<TopologyCommand>,
    ) -> Result<(), TopologyError> {
        for command in commands {
            println!("Running ... {}", command);
            let argv = command.argv(&self.config.host_exec, &self.config.command_prefix);
            if command.is_daemon() {
                runner.spawn(&argv).await?;
            } else {
                runner.run(&argv).await?;
            }
        }
        Ok(())
    }

    /// Create and configure the network, stopping at the first failure.
    pub async fn apply<R: runner::CommandRunner + ?Sized>(&self, runner: &mut R) -> Result<(), TopologyError> {
        self.run_commands(runner, self.plan()).await
    }

    /// Configure a network somebody else created.
    pub async fn configure<R: runner::CommandRunner + ?Sized>(&self, runner: &mut R) -> Result<(), TopologyError> {
        self.run_commands(runner, self.configure_plan()).await
    }

    /// Stop the routers and remove the network, going on past failures.
    pub async fn teardown<R: runner::CommandRunner + ?Sized>(&self, runner: &mut R) -> usize {
        runner.stop().await;
        let mut failed = 0;
        for command in self.teardown_plan() {
            let argv = command.argv(&self.config.host_exec, &self.config.command_prefix);
            if let Err(e) = runner.run(&argv).await {
                warn!(target: "topology", "teardown: {}", e);
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn demo() -> Topology {
        let config =
            TopologyConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/r-topo.json")).unwrap();
        Topology::build(config).unwrap()
    }

    #[test]
    fn test_port_resolution() {
        let topo = demo();
        assert_eq!(topo.ports("s1"), vec![1, 2, 3, 4]);
        assert_eq!(topo.ports("r1"), vec![1, 2, 3]);
        assert_eq!(topo.ports("r3"), vec![1, 2, 3]);
        assert_eq!(topo.ports("h11"), vec![0]);
        assert_eq!(topo.kind("s2"), Some(NodeKind::Switch));
    }

    #[test]
    fn test_router_port_macs() {
        let topo = demo();
        let macs = topo.router_port_macs("r2");
        assert_eq!(macs.len(), 3);
        assert_eq!(macs[&1], MAC::of("00:aa:dd:00:00:01").unwrap());
        assert_eq!(macs[&2], MAC::of("00:aa:dd:00:00:03").unwrap());
        assert_eq!(macs[&3], MAC::of("00:aa:dd:00:00:02").unwrap());
        let endpoints = topo.router_endpoints();
        assert_eq!(endpoints[2].address, "127.0.0.1:50053");
        assert_eq!(endpoints[2].device_id, 3);
    }

    #[test]
    fn test_wiring_matches_controller_config() {
        let topo = demo();
        let config = ControllerConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/s-router.json")).unwrap();
        assert!(topo.port_mac_mismatches(&config).is_empty());

        let mut config = config;
        config.switches[0].port_macs.insert(3, MAC([0, 0, 0, 0, 0, 1]));
        assert_eq!(topo.port_mac_mismatches(&config).len(), 1);
    }

    #[test]
    fn test_create_plan() {
        let topo = demo();
        let plan = topo.create_plan();
        // namespaces, bridges, 9 host links, 3 router links, 3 uplinks, host setup, routers
        assert_eq!(plan.len(), 9 + 3 + 9 * 6 + 3 * 5 + 3 * 6 + 9 * 4 + 3);
        assert_eq!(plan[0].to_string(), "ip netns add h11");
        assert_eq!(plan[9].to_string(), "ovs-vsctl --may-exist add-br s1 -- set-fail-mode s1 secure");
        assert_eq!(
            plan[12..18].iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec![
                "ip link add h11-eth0 type veth peer name s1-eth1",
                "ip link set dev h11-eth0 address 00:04:00:00:00:01",
                "ip link set h11-eth0 netns h11",
                "ip link set dev s1-eth1 address 00:aa:00:00:00:11",
                "ovs-vsctl add-port s1 s1-eth1 -- set Interface s1-eth1 ofport_request=1",
                "ip link set dev s1-eth1 up",
            ]
        );
        assert_eq!(
            plan[99..103].iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec![
                "h11: ip link set dev h11-eth0 name eth0",
                "h11: ip link set dev lo up",
                "h11: ip link set dev eth0 up",
                "h11: ip addr add 10.0.1.100/24 dev eth0",
            ]
        );
        // router ports keep the numbers the controller programs
        assert!(plan.contains(&TopologyCommand::SetAddress {
            interface: "r2-eth3".to_owned(),
            mac: MAC::of("00:aa:dd:00:00:02").unwrap(),
        }));
        let routers: Vec<&TopologyCommand> = plan.iter().filter(|c| c.is_daemon()).collect();
        assert_eq!(routers.len(), 3);
        assert_eq!(
            routers[0].argv("sudo ip netns exec {host}", &["sudo".to_owned()]).join(" "),
            "sudo simple_switch_grpc --device-id 1 -i 1@r1-eth1 -i 2@r1-eth2 -i 3@r1-eth3 --thrift-port 9091 \
             --log-file logs/r1 --log-flush --no-p4 -- --grpc-server-addr 0.0.0.0:50051 --cpu-port 510"
        );
    }

    #[test]
    fn test_router_options() {
        let mut config = demo().config;
        config.renumber_ports(Some(9190), Some(50100));
        config.bmv2 = Bmv2Settings {
            behavioral_exe: "/opt/bmv2/simple_switch_grpc".to_owned(),
            json: Some(PathBuf::from("build/s-router.json")),
            log_dir: None,
        };
        config.routers[2].cpu_port = 255;
        let topo = Topology::build(config).unwrap();
        assert_eq!(topo.router_endpoints()[1].address, "127.0.0.1:50101");

        let routers: Vec<String> = topo
            .create_plan()
            .iter()
            .filter(|c| c.is_daemon())
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            routers[2],
            "/opt/bmv2/simple_switch_grpc --device-id 3 -i 1@r3-eth1 -i 2@r3-eth2 -i 3@r3-eth3 --thrift-port 9192 \
             build/s-router.json -- --grpc-server-addr 0.0.0.0:50102 --cpu-port 255"
        );
    }

    #[test]
    fn test_configure_plan() {
        let topo = demo();
        let plan = topo.configure_plan();
        // 3 switches x 4 ports, 9 hosts x 2
        assert_eq!(plan.len(), 12 + 18);
        assert_eq!(
            plan[0].argv("m {host}", &["sudo".to_owned()]),
            vec!["sudo", "ovs-ofctl", "add-flow", "s1", "in_port=1,actions=normal"]
        );
        assert_eq!(
            plan[12].argv("m {host}", &[]),
            vec!["m", "h11", "arp", "-i", "eth0", "-s", "10.0.1.254", "00:aa:bb:00:00:01"]
        );
        assert_eq!(
            plan[13].to_string(),
            "h11: ip route replace default dev eth0 via 10.0.1.254"
        );
        assert_eq!(topo.plan()[topo.create_plan().len()..], plan[..]);
    }

    #[test]
    fn test_teardown_plan() {
        let topo = demo();
        let plan: Vec<String> = topo.teardown_plan().iter().map(ToString::to_string).collect();
        assert_eq!(plan.len(), 3 + 9 + 6);
        assert_eq!(plan[0], "ovs-vsctl --if-exists del-br s1");
        assert_eq!(plan[3], "ip netns del h11");
        assert_eq!(plan[12], "ip link del r1-eth1");
        assert_eq!(plan[17], "ip link del r3-eth3");
    }

    #[test]
    fn test_validation() {
        let base = demo().config;

        let mut config = base.clone();
        config.hosts[0].gateway = "10.0.9.1".parse().unwrap();
        assert!(matches!(
            Topology::build(config),
            Err(TopologyError::GatewayOutsideSubnet { .. })
        ));

        let mut config = base.clone();
        config.switches.push(L2SwitchConfig { name: "h11".to_owned() });
        assert!(matches!(Topology::build(config), Err(TopologyError::DuplicateNode(_))));

        let mut config = base.clone();
        config.links[0].b.node = "s9".to_owned();
        assert!(matches!(Topology::build(config), Err(TopologyError::UnknownNode(_))));

        let mut config = base.clone();
        let mut dup = config.links.last().unwrap().clone();
        dup.a.port = Some(1);
        dup.b.node = "s3".to_owned();
        config.links.push(dup);
        assert!(matches!(Topology::build(config), Err(TopologyError::DuplicatePort { .. })));

        let mut config = base.clone();
        config.links.remove(0);
        assert!(matches!(
            Topology::build(config),
            Err(TopologyError::HostLinks { links: 0, .. })
        ));

        let mut config = base.clone();
        config.links[0].a.mac = Some(MAC::of("00:04:00:00:00:99").unwrap());
        assert!(matches!(Topology::build(config), Err(TopologyError::HostMac { .. })));

        let mut config = base;
        config.hosts[0].name = "workstation11".to_owned();
        config.links[0].a.node = "workstation11".to_owned();
        assert!(matches!(Topology::build(config), Err(TopologyError::InterfaceName(_))));
    }
}
