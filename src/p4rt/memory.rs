use super::pipeconf::Pipeconf;
use super::pure::{get_table_by_id, UpdateType};
use super::status::new_write_failure;
use super::switch::{ElectionId, SwitchConnection};
use crate::error::DeviceError;
use crate::proto::p4config::P4Info;
use crate::proto::p4runtime::{CounterData, CounterEntry, Index, TableEntry};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// What a [MemorySwitch] was asked to do, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryCall {
    Arbitration { election_id: ElectionId },
    SetPipeline { pipeconf: String },
    Write { updates: Vec<(UpdateType, TableEntry)> },
    ReadTableEntries,
    ReadCounter { counter_id: u32, index: i64 },
    Shutdown,
}

/// Call log shared by every [MemorySwitch] created with it, tagged with the switch name.
pub type CallLog = Arc<Mutex<Vec<(String, MemoryCall)>>>;

#[derive(Default)]
struct DeviceState {
    primary: Option<ElectionId>,
    pipeconf: Option<Arc<dyn Pipeconf>>,
    entries: Vec<TableEntry>,
    counters: HashMap<(u32, i64), CounterData>,
}

/// A switch kept in memory that answers like a P4Runtime target.
///
/// - writes without mastership fail with `PERMISSION_DENIED`,
/// - writes before a pipeline is installed fail with `FAILED_PRECONDITION`,
/// - an arbitration with a lower election id than the current primary is refused,
/// - an INSERT of an installed match key fails with `ALREADY_EXISTS`, a MODIFY or
///   DELETE of a missing one with `NOT_FOUND`,
/// - the updates of a write are applied one by one; a failed write reports every
///   update's outcome the way BMv2 does,
/// - installing a pipeline drops every table entry.
///
/// Sessions created with [MemorySwitch::session] talk to the same device state.
pub struct MemorySwitch {
    name: String,
    election_id: Option<ElectionId>,
    state: Arc<Mutex<DeviceState>>,
    log: CallLog,
}

impl MemorySwitch {
    pub fn new(name: &str, log: CallLog) -> MemorySwitch {
        MemorySwitch {
            name: name.to_owned(),
            election_id: None,
            state: Arc::new(Mutex::new(DeviceState::default())),
            log,
        }
    }

    /// Another control session to the same device.
    pub fn session(&self) -> MemorySwitch {
        MemorySwitch {
            name: self.name.clone(),
            election_id: None,
            state: self.state.clone(),
            log: self.log.clone(),
        }
    }

    pub fn entries(&self) -> Vec<TableEntry> {
        self.state.lock().entries.clone()
    }

    pub fn set_counter(&self, counter_id: u32, index: i64, packet_count: i64, byte_count: i64) {
        self.state.lock().counters.insert(
            (counter_id, index),
            CounterData {
                packet_count,
                byte_count,
                ..Default::default()
            },
        );
    }

    fn record(&self, call: MemoryCall) {
        self.log.lock().push((self.name.clone(), call));
    }

    fn status(&self, error: tonic::Status) -> DeviceError {
        DeviceError::DeviceGrpcError {
            device: self.name.clone(),
            error,
        }
    }

    fn check_primary(&self, state: &DeviceState) -> Result<ElectionId, DeviceError> {
        match (self.election_id, state.primary) {
            (Some(mine), Some(primary)) if mine == primary => Ok(mine),
            _ => Err(self.status(tonic::Status::permission_denied(
                "Not primary controller",
            ))),
        }
    }

    fn check_pipeline(&self, state: &DeviceState) -> Result<Arc<dyn Pipeconf>, DeviceError> {
        state.pipeconf.clone().ok_or_else(|| {
            self.status(tonic::Status::failed_precondition(
                "No forwarding pipeline config set for this device",
            ))
        })
    }
}

fn same_key(a: &TableEntry, b: &TableEntry) -> bool {
    a.table_id == b.table_id
        && a.r#match == b.r#match
        && a.priority == b.priority
        && a.is_default_action == b.is_default_action
}

fn apply_update(
    entries: &mut Vec<TableEntry>,
    p4info: &P4Info,
    update_type: UpdateType,
    entry: TableEntry,
) -> Result<(), (tonic::Code, String)> {
    if get_table_by_id(p4info, entry.table_id).is_none() {
        return Err((tonic::Code::NotFound, format!("Unknown table id {}", entry.table_id)));
    }
    let existing = entries.iter().position(|e| same_key(e, &entry));
    match (update_type, existing) {
        (UpdateType::Insert, Some(_)) => Err((
            tonic::Code::AlreadyExists,
            "Match entry exists, use MODIFY if you wish to change action".to_owned(),
        )),
        (UpdateType::Insert, None) => {
            entries.push(entry);
            Ok(())
        }
        (UpdateType::Modify, Some(index)) => {
            entries[index] = entry;
            Ok(())
        }
        // the default entry of a table always exists
        (UpdateType::Modify, None) if entry.is_default_action => {
            entries.push(entry);
            Ok(())
        }
        (UpdateType::Delete, Some(index)) => {
            entries.remove(index);
            Ok(())
        }
        (UpdateType::Modify, None) | (UpdateType::Delete, None) => {
            Err((tonic::Code::NotFound, "Cannot find match entry".to_owned()))
        }
        (UpdateType::Unspecified, _) => {
            Err((tonic::Code::InvalidArgument, "Update type not specified".to_owned()))
        }
    }
}

#[async_trait]
impl SwitchConnection for MemorySwitch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn establish_mastership(&mut self, election_id: ElectionId) -> Result<(), DeviceError> {
        self.record(MemoryCall::Arbitration { election_id });
        let mut state = self.state.lock();
        match state.primary {
            Some(primary) if primary > election_id => {
                return Err(DeviceError::NotMaster {
                    device: self.name.clone(),
                    reason: format!("election id {:?} is lower than primary {:?}", election_id, primary),
                });
            }
            _ => state.primary = Some(election_id),
        }
        self.election_id = Some(election_id);
        debug!(target: "memory", "{} primary is now {:?}", self.name, election_id);
        Ok(())
    }

    async fn set_forwarding_pipeline_config(
        &mut self,
        pipeconf: Arc<dyn Pipeconf>,
    ) -> Result<(), DeviceError> {
        self.record(MemoryCall::SetPipeline {
            pipeconf: pipeconf.get_name().to_owned(),
        });
        let mut state = self.state.lock();
        self.check_primary(&state)?;
        state.entries.clear();
        state.counters.clear();
        state.pipeconf = Some(pipeconf);
        Ok(())
    }

    async fn write_updates(&mut self, updates: Vec<(UpdateType, TableEntry)>) -> Result<(), DeviceError> {
        self.record(MemoryCall::Write {
            updates: updates.clone(),
        });
        let mut state = self.state.lock();
        self.check_primary(&state)?;
        let pipeconf = self.check_pipeline(&state)?;
        let mut outcome = Vec::with_capacity(updates.len());
        let mut failed = false;
        for (update_type, entry) in updates {
            match apply_update(&mut state.entries, pipeconf.get_p4info(), update_type, entry) {
                Ok(()) => outcome.push((tonic::Code::Ok, String::new())),
                Err(error) => {
                    failed = true;
                    outcome.push(error);
                }
            }
        }
        if failed {
            return Err(self.status(new_write_failure(outcome)));
        }
        Ok(())
    }

    async fn read_table_entries(
        &mut self,
    ) -> Result<BoxStream<'static, Result<TableEntry, DeviceError>>, DeviceError> {
        self.record(MemoryCall::ReadTableEntries);
        let entries = self.state.lock().entries.clone();
        Ok(futures::stream::iter(entries.into_iter().map(Ok)).boxed())
    }

    async fn read_counter(&mut self, counter_id: u32, index: i64) -> Result<Vec<CounterEntry>, DeviceError> {
        self.record(MemoryCall::ReadCounter { counter_id, index });
        let state = self.state.lock();
        self.check_pipeline(&state)?;
        let data = state
            .counters
            .get(&(counter_id, index))
            .cloned()
            .unwrap_or_default();
        Ok(vec![CounterEntry {
            counter_id,
            index: Some(Index { index }),
            data: Some(data),
            ..Default::default()
        }])
    }

    async fn shutdown(&mut self) {
        self.record(MemoryCall::Shutdown);
        let mut state = self.state.lock();
        if state.primary.is_some() && state.primary == self.election_id {
            state.primary = None;
        }
        self.election_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p4rt::pipeconf::fixture::s_router_pipeconf;
    use crate::p4rt::status::write_update_errors;

    fn entry(table_id: u32, priority: i32) -> TableEntry {
        TableEntry {
            table_id,
            priority,
            ..Default::default()
        }
    }

    fn grpc_code(err: DeviceError) -> tonic::Code {
        match err {
            DeviceError::DeviceGrpcError { error, .. } => error.code(),
            other => panic!("unexpected error {:?}", other),
        }
    }

    fn update_codes(err: DeviceError) -> Vec<tonic::Code> {
        match err {
            DeviceError::DeviceGrpcError { error, .. } => {
                assert_eq!(error.code(), tonic::Code::Unknown);
                write_update_errors(&error)
                    .iter()
                    .map(|e| tonic::Code::from_i32(e.canonical_code))
                    .collect()
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    async fn provisioned(log: CallLog) -> MemorySwitch {
        let mut sw = MemorySwitch::new("r1", log);
        sw.establish_mastership(ElectionId::default()).await.unwrap();
        sw.set_forwarding_pipeline_config(Arc::new(s_router_pipeconf()))
            .await
            .unwrap();
        sw
    }

    #[tokio::test]
    async fn test_write_needs_master_then_pipeline() {
        let mut sw = MemorySwitch::new("r1", CallLog::default());
        let err = sw.write_table_entry(entry(33_000_002, 0)).await.unwrap_err();
        assert_eq!(grpc_code(err), tonic::Code::PermissionDenied);

        sw.establish_mastership(ElectionId::default()).await.unwrap();
        let err = sw.write_table_entry(entry(33_000_002, 0)).await.unwrap_err();
        assert_eq!(grpc_code(err), tonic::Code::FailedPrecondition);

        sw.set_forwarding_pipeline_config(Arc::new(s_router_pipeconf()))
            .await
            .unwrap();
        sw.write_table_entry(entry(33_000_002, 0)).await.unwrap();
        assert_eq!(sw.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_refused() {
        let mut sw = provisioned(CallLog::default()).await;
        let err = sw
            .write_updates(vec![
                (UpdateType::Insert, entry(33_000_004, 1)),
                (UpdateType::Insert, entry(33_000_004, 1)),
                (UpdateType::Modify, entry(33_000_004, 3)),
                (UpdateType::Insert, entry(1, 0)),
            ])
            .await
            .unwrap_err();
        assert_eq!(
            update_codes(err),
            vec![
                tonic::Code::Ok,
                tonic::Code::AlreadyExists,
                tonic::Code::NotFound,
                tonic::Code::NotFound
            ]
        );
        // the accepted update stays applied
        assert_eq!(sw.entries(), vec![entry(33_000_004, 1)]);

        sw.write_updates(vec![(UpdateType::Delete, entry(33_000_004, 1))])
            .await
            .unwrap();
        assert!(sw.entries().is_empty());
    }

    #[tokio::test]
    async fn test_existing_entries_are_modified() {
        let log = CallLog::default();
        let mut sw = provisioned(log.clone()).await;
        sw.write_table_entries(vec![entry(33_000_004, 1), entry(33_000_004, 1), entry(33_000_004, 2)])
            .await
            .unwrap();
        assert_eq!(sw.entries().len(), 2);

        let writes: Vec<Vec<UpdateType>> = log
            .lock()
            .iter()
            .filter_map(|(_, call)| match call {
                MemoryCall::Write { updates } => Some(updates.iter().map(|(t, _)| *t).collect()),
                _ => None,
            })
            .collect();
        assert_eq!(
            writes,
            vec![
                vec![UpdateType::Insert, UpdateType::Insert, UpdateType::Insert],
                vec![UpdateType::Modify]
            ]
        );

        let err = sw.write_table_entry(entry(1, 0)).await.unwrap_err();
        assert_eq!(update_codes(err), vec![tonic::Code::NotFound]);

        sw.set_forwarding_pipeline_config(Arc::new(s_router_pipeconf()))
            .await
            .unwrap();
        assert!(sw.entries().is_empty());
    }

    #[tokio::test]
    async fn test_lower_election_id_refused() {
        let mut first = MemorySwitch::new("r1", CallLog::default());
        let mut second = first.session();
        first.establish_mastership(ElectionId::new(0, 5)).await.unwrap();
        let err = second
            .establish_mastership(ElectionId::new(0, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotMaster { .. }));

        second.establish_mastership(ElectionId::new(0, 9)).await.unwrap();
        first
            .set_forwarding_pipeline_config(Arc::new(s_router_pipeconf()))
            .await
            .unwrap_err();
    }
}
