use crate::p4rt::status::code_name;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device {} not connected", device)]
    DeviceNotConnected { device: String },
    #[error("Device {} gRPC Error {:?}", device, error)]
    DeviceGrpcError {
        device: String,
        error: tonic::Status,
    },
    #[error("Device {} gRPC transport Error {:?}", device, error)]
    DeviceGrpcTransportError {
        device: String,
        error: tonic::transport::Error,
    },
    #[error("Device config file {} error: {:?}", path.display(), error)]
    DeviceConfigFileError {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("Device {} master not acquired, {}", device, reason)]
    NotMaster { device: String, reason: String },
    #[error("Device {} has no forwarding pipeline installed", device)]
    PipelineNotSet { device: String },
}

impl DeviceError {
    /// Classify a protocol fault reported by the remote endpoint, if this is one.
    pub fn fault(&self) -> Option<Fault> {
        match self {
            DeviceError::DeviceGrpcError { error, .. } => Some(Fault::from_status(error)),
            _ => None,
        }
    }
}

/// Status code, detail message and debug payload of a failed control-channel call.
#[derive(Debug, Clone)]
pub struct Fault {
    pub code: tonic::Code,
    pub detail: String,
    pub debug: Option<String>,
}

impl Fault {
    pub fn from_status(status: &tonic::Status) -> Fault {
        let debug = if status.details().is_empty() && status.metadata().is_empty() {
            None
        } else {
            Some(format!("{:?}", status))
        };
        Fault {
            code: status.code(),
            detail: status.message().to_owned(),
            debug,
        }
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "gRPC Error: {} ({})", self.detail, code_name(self.code))?;
        if let Some(debug) = &self.debug {
            write!(f, "\nDebug Error String: {}", debug)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PipeconfError {
    #[error("P4 info file {} error: {:?}", path.display(), error)]
    P4InfoFile {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("P4 info file {} cannot be decoded: {}", path.display(), error)]
    P4InfoDecode {
        path: PathBuf,
        error: prost::DecodeError,
    },
    #[error("Table '{0}' not found.")]
    TableNotFound(String),
    #[error("Action '{0}' not found.")]
    ActionNotFound(String),
    #[error("Counter '{0}' not found.")]
    CounterNotFound(String),
    #[error("Match field '{}' not found in table '{}'.", field, table)]
    MatchFieldNotFound { table: String, field: String },
    #[error("Param '{}' not found in action '{}'.", param, action)]
    ParamNotFound { action: String, param: String },
    #[error("Match field '{}' of table '{}' cannot take value {}.", field, table, value)]
    MatchKindMismatch {
        table: String,
        field: String,
        value: String,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file {} error: {:?}", path.display(), error)]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("Config file {} cannot be parsed: {}", path.display(), error)]
    Parse {
        path: PathBuf,
        error: serde_json::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error(
        "Firewall rules #{} and #{} on {} overlap at priority {}",
        first,
        second,
        device,
        priority
    )]
    FirewallOverlap {
        device: String,
        first: usize,
        second: usize,
        priority: i32,
    },
}

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Node '{0}' is declared twice.")]
    DuplicateNode(String),
    #[error("Link references unknown node '{0}'.")]
    UnknownNode(String),
    #[error("Port {} on '{}' is used by more than one link.", port, node)]
    DuplicatePort { node: String, port: u32 },
    #[error("Host '{}' gateway {} is outside of its subnet.", host, gateway)]
    GatewayOutsideSubnet { host: String, gateway: String },
    #[error("Host '{}' must be linked exactly once, found {} links.", host, links)]
    HostLinks { host: String, links: usize },
    #[error("Host '{}' link is given MAC {} but the host has {}.", host, link, host_mac)]
    HostMac { host: String, link: String, host_mac: String },
    #[error("Interface name '{0}' is too long.")]
    InterfaceName(String),
    #[error("Command '{}' failed: {}", command, reason)]
    CommandFailed { command: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum MyError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Pipeconf(#[from] PipeconfError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl MyError {
    pub fn fault(&self) -> Option<Fault> {
        match self {
            MyError::Device(e) => e.fault(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MyError>;
