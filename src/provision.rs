//! Ordered provisioning of one or more switches.
//!
//! Every table write goes through a [Session], which only lets it out once the
//! session is primary and the forwarding program is installed.

use crate::config::{ControllerConfig, PipelineNames, ProvisionMode, SwitchConfig};
use crate::error::{DeviceError, MyError, PipeconfError};
use crate::firewall::{check_overlaps, DenyRule};
use crate::p4rt::pipeconf::Pipeconf;
use crate::p4rt::switch::{ElectionId, SwitchConnection};
use crate::proto::p4runtime::{CounterEntry, TableEntry};
use crate::util::flow::{Flow, FlowAction, FlowActionParam, FlowMatch, FlowTable};
use crate::util::value::{encode, EXACT, LPM};
use futures::stream::BoxStream;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Phase {
    Connected,
    Master,
    PipelineInstalled,
}

/// A control session to one switch and how far it got.
pub struct Session<S> {
    conn: S,
    phase: Phase,
    pipeconf: Option<Arc<dyn Pipeconf>>,
}

impl<S> Session<S>
where
    S: SwitchConnection,
{
    pub fn new(conn: S) -> Session<S> {
        Session {
            conn,
            phase: Phase::Connected,
            pipeconf: None,
        }
    }

    pub fn name(&self) -> &str {
        self.conn.name()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pipeconf(&self) -> Option<&Arc<dyn Pipeconf>> {
        self.pipeconf.as_ref()
    }

    pub fn connection(&self) -> &S {
        &self.conn
    }

    pub async fn establish_mastership(&mut self, election_id: ElectionId) -> Result<(), DeviceError> {
        self.conn.establish_mastership(election_id).await?;
        if self.phase < Phase::Master {
            self.phase = Phase::Master;
        }
        debug!(target: "provision", "{} primary with {:?}", self.name(), election_id);
        Ok(())
    }

    /// Push the forwarding program. Pushing it again is allowed and leaves the
    /// switch with the program installed and its tables empty.
    pub async fn install_pipeline(&mut self, pipeconf: Arc<dyn Pipeconf>) -> Result<(), DeviceError> {
        if self.phase == Phase::Connected {
            return Err(DeviceError::NotMaster {
                device: self.name().to_owned(),
                reason: "mastership not established".to_owned(),
            });
        }
        self.conn.set_forwarding_pipeline_config(pipeconf.clone()).await?;
        self.pipeconf = Some(pipeconf);
        self.phase = Phase::PipelineInstalled;
        Ok(())
    }

    fn check_writable(&self) -> Result<(), DeviceError> {
        match self.phase {
            Phase::PipelineInstalled => Ok(()),
            Phase::Master => Err(DeviceError::PipelineNotSet {
                device: self.name().to_owned(),
            }),
            Phase::Connected => Err(DeviceError::NotMaster {
                device: self.name().to_owned(),
                reason: "mastership not established".to_owned(),
            }),
        }
    }

    /// Send the entries as one write request.
    pub async fn write(&mut self, entries: Vec<TableEntry>) -> Result<(), DeviceError> {
        self.check_writable()?;
        self.conn.write_table_entries(entries).await
    }

    pub async fn read_table_entries(
        &mut self,
    ) -> Result<BoxStream<'static, Result<TableEntry, DeviceError>>, DeviceError> {
        self.conn.read_table_entries().await
    }

    pub async fn read_counter(&mut self, counter_id: u32, index: i64) -> Result<Vec<CounterEntry>, DeviceError> {
        self.conn.read_counter(counter_id, index).await
    }

    pub async fn close(&mut self) {
        self.conn.shutdown().await;
        self.phase = Phase::Connected;
    }
}

/// A table entry together with the names it was built from.
#[derive(Clone, Debug)]
pub struct PlannedEntry {
    pub flow: Flow,
    pub entry: TableEntry,
}

impl PlannedEntry {
    fn build(flow: Flow, pipeconf: &dyn Pipeconf) -> Result<PlannedEntry, PipeconfError> {
        let entry = flow.to_table_entry(pipeconf, 0)?;
        Ok(PlannedEntry { flow, entry })
    }
}

/// The forwarding entry of a route, written together with the dst MAC rewrite of its
/// next hop. Routes sharing a next hop carry the rewrite only on the first of them.
#[derive(Clone, Debug)]
pub struct PlannedRoute {
    pub forward: PlannedEntry,
    pub rewrite: Option<PlannedEntry>,
}

impl PlannedRoute {
    pub fn entries(&self) -> Vec<TableEntry> {
        let mut entries = vec![self.forward.entry.clone()];
        entries.extend(self.rewrite.iter().map(|r| r.entry.clone()));
        entries
    }
}

/// Everything to write to one switch, already translated against the P4Info.
#[derive(Clone, Debug)]
pub struct SwitchPlan {
    pub name: String,
    pub src_mac: Vec<PlannedEntry>,
    pub routes: Vec<PlannedRoute>,
    pub firewall: Vec<PlannedEntry>,
}

impl SwitchPlan {
    pub fn compile(
        switch: &SwitchConfig,
        names: &PipelineNames,
        pipeconf: &dyn Pipeconf,
        allow_equal_priority_overlap: bool,
    ) -> Result<SwitchPlan, MyError> {
        let src_mac = switch
            .port_macs
            .iter()
            .map(|(port, mac)| {
                let flow = Flow {
                    table: FlowTable::new(
                        &names.src_mac.table,
                        vec![FlowMatch::new(&names.src_mac.key, EXACT(*port))],
                    ),
                    action: FlowAction::new(
                        &names.src_mac.action,
                        vec![FlowActionParam::new(&names.src_mac.param, encode(*mac))],
                    ),
                    priority: 0,
                };
                PlannedEntry::build(flow, pipeconf)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rewritten = HashSet::new();
        let routes = switch
            .routes
            .iter()
            .map(|route| {
                let forward = Flow {
                    table: FlowTable::new(
                        &names.forward.table,
                        vec![FlowMatch::new(
                            &names.forward.key,
                            LPM(route.dst.addr(), route.dst.prefix_len() as i32),
                        )],
                    ),
                    action: FlowAction::new(
                        &names.forward.action,
                        vec![
                            FlowActionParam::new(&names.forward.next_hop_param, encode(route.next_hop)),
                            FlowActionParam::new(&names.forward.port_param, encode(route.port)),
                        ],
                    ),
                    priority: 0,
                };
                let rewrite = Flow {
                    table: FlowTable::new(
                        &names.dst_mac.table,
                        vec![FlowMatch::new(&names.dst_mac.key, EXACT(route.next_hop))],
                    ),
                    action: FlowAction::new(
                        &names.dst_mac.action,
                        vec![FlowActionParam::new(&names.dst_mac.param, encode(route.next_hop_mac))],
                    ),
                    priority: 0,
                };
                let rewrite = if rewritten.insert(route.next_hop) {
                    Some(PlannedEntry::build(rewrite, pipeconf)?)
                } else {
                    None
                };
                Ok(PlannedRoute {
                    forward: PlannedEntry::build(forward, pipeconf)?,
                    rewrite,
                })
            })
            .collect::<Result<Vec<_>, PipeconfError>>()?;

        let rules: Vec<DenyRule> = switch.firewall.iter().flat_map(|p| p.compile()).collect();
        check_overlaps(&switch.name, &rules, allow_equal_priority_overlap)?;
        let firewall = rules
            .iter()
            .map(|rule| PlannedEntry::build(rule.to_flow(&names.firewall), pipeconf))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SwitchPlan {
            name: switch.name.clone(),
            src_mac,
            routes,
            firewall,
        })
    }

    /// Plans for every configured switch, in config order.
    pub fn compile_all(config: &ControllerConfig, pipeconf: &dyn Pipeconf) -> Result<Vec<SwitchPlan>, MyError> {
        config
            .switches
            .iter()
            .map(|sw| {
                SwitchPlan::compile(
                    sw,
                    &config.pipeline,
                    pipeconf,
                    config.firewall.allow_equal_priority_overlap,
                )
            })
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        let rewrites = self.routes.iter().filter(|r| r.rewrite.is_some()).count();
        self.src_mac.len() + self.routes.len() + rewrites + self.firewall.len()
    }
}

/// Bring one switch from a fresh session to a fully written table state.
pub async fn provision_switch<S: SwitchConnection>(
    session: &mut Session<S>,
    pipeconf: Arc<dyn Pipeconf>,
    plan: &SwitchPlan,
    election_id: ElectionId,
) -> Result<(), DeviceError> {
    session.establish_mastership(election_id).await?;

    session.install_pipeline(pipeconf).await?;
    println!(
        "Installed P4 Program using SetForwardingPipelineConfig on {}",
        session.name()
    );

    for planned in &plan.src_mac {
        debug!(target: "provision", "{}: {}", session.name(), planned.flow);
        session.write(vec![planned.entry.clone()]).await?;
    }
    println!("Installed MAC SRC rules on {}", session.name());

    for route in &plan.routes {
        match &route.rewrite {
            Some(rewrite) => debug!(target: "provision", "{}: {} + {}", session.name(), route.forward.flow, rewrite.flow),
            None => debug!(target: "provision", "{}: {}", session.name(), route.forward.flow),
        }
        session.write(route.entries()).await?;
        println!("Installed FWD rule on {}", session.name());
    }

    for planned in &plan.firewall {
        debug!(target: "provision", "{}: {}", session.name(), planned.flow);
        session.write(vec![planned.entry.clone()]).await?;
        println!("Installed firewall on {}", session.name());
    }

    info!(target: "provision", "{} provisioned with {} entries", session.name(), plan.entry_count());
    Ok(())
}

/// Provision every session with the plan of the same index.
///
/// The first failure ends the run; switches already written are left as they are.
pub async fn provision_all<S: SwitchConnection>(
    sessions: &mut [Session<S>],
    pipeconf: Arc<dyn Pipeconf>,
    plans: &[SwitchPlan],
    election_id: ElectionId,
    mode: ProvisionMode,
) -> Result<(), DeviceError> {
    match mode {
        ProvisionMode::Sequential => {
            for (session, plan) in sessions.iter_mut().zip(plans) {
                provision_switch(session, pipeconf.clone(), plan, election_id).await?;
            }
        }
        ProvisionMode::Concurrent => {
            let tasks = sessions
                .iter_mut()
                .zip(plans)
                .map(|(session, plan)| provision_switch(session, pipeconf.clone(), plan, election_id));
            futures::future::try_join_all(tasks).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p4rt::memory::{CallLog, MemorySwitch};
    use crate::p4rt::pipeconf::fixture::s_router_pipeconf;

    fn src_mac_entry() -> TableEntry {
        TableEntry {
            table_id: 33_000_002,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_session_rejects_early_writes() {
        let mut session = Session::new(MemorySwitch::new("r1", CallLog::default()));
        let err = session.write(vec![TableEntry::default()]).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotMaster { .. }));

        let pipeconf: Arc<dyn Pipeconf> = Arc::new(s_router_pipeconf());
        let err = session.install_pipeline(pipeconf.clone()).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotMaster { .. }));

        session.establish_mastership(ElectionId::default()).await.unwrap();
        let err = session.write(vec![TableEntry::default()]).await.unwrap_err();
        assert!(matches!(err, DeviceError::PipelineNotSet { .. }));

        session.install_pipeline(pipeconf.clone()).await.unwrap();
        assert_eq!(session.phase(), Phase::PipelineInstalled);
        session.write(vec![src_mac_entry()]).await.unwrap();

        session.install_pipeline(pipeconf).await.unwrap();
        assert_eq!(session.phase(), Phase::PipelineInstalled);
        assert!(session.connection().entries().is_empty());
        session.write(vec![src_mac_entry()]).await.unwrap();
        assert_eq!(session.connection().entries().len(), 1);
    }
}
