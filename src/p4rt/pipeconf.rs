use crate::error::PipeconfError;
use crate::proto::p4config::P4Info;
use log::debug;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A compiled forwarding program: the P4Info describing it and the BMv2 dataplane image.
pub trait Pipeconf: Send + Sync {
    fn get_name(&self) -> &str;
    fn get_p4info(&self) -> &P4Info;
    fn get_bmv2_file_path(&self) -> &Path;
}

#[derive(Clone, Debug)]
pub struct DefaultPipeconf {
    name: String,
    inner: Arc<Inner>,
}

impl DefaultPipeconf {
    /// Load the binary P4Info written by `p4c --p4runtime-files <x>.p4info.bin`.
    pub fn new<T: AsRef<Path> + Debug>(
        name: &str,
        p4info_file_path: T,
        bmv2_file_path: T,
    ) -> Result<DefaultPipeconf, PipeconfError> {
        let path = p4info_file_path.as_ref();
        let buf = std::fs::read(path).map_err(|error| PipeconfError::P4InfoFile {
            path: path.to_owned(),
            error,
        })?;
        let p4info: P4Info =
            prost::Message::decode(buf.as_ref()).map_err(|error| PipeconfError::P4InfoDecode {
                path: path.to_owned(),
                error,
            })?;
        debug!(target: "pipeconf", "loaded {} tables, {} actions from {:?}",
            p4info.tables.len(), p4info.actions.len(), &p4info_file_path);
        Ok(Self::from_p4info(name, p4info, bmv2_file_path))
    }

    pub fn from_p4info<T: AsRef<Path>>(name: &str, p4info: P4Info, bmv2_file_path: T) -> DefaultPipeconf {
        DefaultPipeconf {
            name: name.to_owned(),
            inner: Arc::new(Inner {
                p4info,
                bmv2_json_file_path: PathBuf::from(bmv2_file_path.as_ref()),
            }),
        }
    }
}

#[derive(Debug)]
struct Inner {
    pub p4info: P4Info,
    pub bmv2_json_file_path: PathBuf,
}

impl Pipeconf for DefaultPipeconf {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn get_p4info(&self) -> &P4Info {
        &self.inner.p4info
    }

    fn get_bmv2_file_path(&self) -> &Path {
        &self.inner.bmv2_json_file_path
    }
}

/// P4Info of the s-router program, built by hand so tests need no compiler output.
#[cfg(test)]
pub(crate) mod fixture {
    use super::DefaultPipeconf;
    use crate::proto::p4config::{
        action, match_field, Action, ActionRef, Counter, MatchField, P4Info, Preamble, Table,
    };

    fn preamble(id: u32, name: &str) -> Option<Preamble> {
        Some(Preamble {
            id,
            name: name.to_owned(),
            alias: name.rsplit('.').next().unwrap_or(name).to_owned(),
            ..Default::default()
        })
    }

    fn field(id: u32, name: &str, bitwidth: i32, kind: match_field::MatchType) -> MatchField {
        MatchField {
            id,
            name: name.to_owned(),
            bitwidth,
            r#match: Some(match_field::Match::MatchType(kind as i32)),
            ..Default::default()
        }
    }

    fn param(id: u32, name: &str, bitwidth: i32) -> action::Param {
        action::Param {
            id,
            name: name.to_owned(),
            bitwidth,
            ..Default::default()
        }
    }

    fn table(id: u32, name: &str, match_fields: Vec<MatchField>, actions: &[u32]) -> Table {
        Table {
            preamble: preamble(id, name),
            match_fields,
            action_refs: actions
                .iter()
                .map(|id| ActionRef {
                    id: *id,
                    ..Default::default()
                })
                .collect(),
            size: 1024,
            ..Default::default()
        }
    }

    pub(crate) fn s_router_p4info() -> P4Info {
        use match_field::MatchType::*;
        P4Info {
            tables: vec![
                table(
                    33_000_001,
                    "MyIngress.ipv4_lpm",
                    vec![field(1, "hdr.ipv4.dstAddr", 32, Lpm)],
                    &[16_000_001, 16_000_005],
                ),
                table(
                    33_000_002,
                    "MyIngress.src_mac",
                    vec![field(1, "standard_metadata.egress_spec", 9, Exact)],
                    &[16_000_002, 16_000_005],
                ),
                table(
                    33_000_003,
                    "MyIngress.dst_mac",
                    vec![field(1, "meta.next_hop_ipv4", 32, Exact)],
                    &[16_000_003, 16_000_005],
                ),
                table(
                    33_000_004,
                    "MyIngress.firewall",
                    vec![
                        field(1, "hdr.ipv4.srcAddr", 32, Lpm),
                        field(2, "hdr.ipv4.dstAddr", 32, Exact),
                        field(3, "hdr.ipv4.protocol", 8, Exact),
                        field(4, "hdr.tcp.dstPort", 16, Range),
                        field(5, "hdr.tcp.srcPort", 16, Range),
                    ],
                    &[16_000_004, 16_000_005],
                ),
            ],
            actions: vec![
                Action {
                    preamble: preamble(16_000_001, "MyIngress.ipv4_fwd"),
                    params: vec![param(1, "nxt_hop", 32), param(2, "port", 9)],
                    ..Default::default()
                },
                Action {
                    preamble: preamble(16_000_002, "MyIngress.rewrite_src_mac"),
                    params: vec![param(1, "src_mac", 48)],
                    ..Default::default()
                },
                Action {
                    preamble: preamble(16_000_003, "MyIngress.rewrite_dst_mac"),
                    params: vec![param(1, "dst_mac", 48)],
                    ..Default::default()
                },
                Action {
                    preamble: preamble(16_000_004, "MyIngress.drop"),
                    ..Default::default()
                },
                Action {
                    preamble: preamble(16_000_005, "NoAction"),
                    ..Default::default()
                },
            ],
            counters: vec![Counter {
                preamble: preamble(302_000_001, "MyIngress.c"),
                size: 64,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub(crate) fn s_router_pipeconf() -> DefaultPipeconf {
        DefaultPipeconf::from_p4info("s-router", s_router_p4info(), "build/s-router.json")
    }
}
