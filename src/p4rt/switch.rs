use crate::error::DeviceError;
use crate::p4rt::pipeconf::Pipeconf;
use crate::p4rt::pure::UpdateType;
use crate::p4rt::status::already_existing_updates;
use crate::proto::p4runtime::{CounterEntry, TableEntry};
use async_trait::async_trait;
use futures::stream::BoxStream;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// P4Runtime election id. The session presenting the highest one is the primary.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ElectionId {
    pub high: u64,
    pub low: u64,
}

impl ElectionId {
    pub fn new(high: u64, low: u64) -> ElectionId {
        ElectionId { high, low }
    }
}

impl Default for ElectionId {
    fn default() -> Self {
        ElectionId { high: 0, low: 1 }
    }
}

/// The control channel to one switch.
///
/// Mastership and write authority are enforced by the remote end; implementations
/// only carry the calls and surface failures as [DeviceError].
#[async_trait]
pub trait SwitchConnection: Send {
    fn name(&self) -> &str;

    async fn establish_mastership(&mut self, election_id: ElectionId) -> Result<(), DeviceError>;

    /// Install the forwarding program. Any table state on the switch is discarded.
    async fn set_forwarding_pipeline_config(
        &mut self,
        pipeconf: Arc<dyn Pipeconf>,
    ) -> Result<(), DeviceError>;

    /// Send the updates as one write request, in order.
    async fn write_updates(&mut self, updates: Vec<(UpdateType, TableEntry)>) -> Result<(), DeviceError>;

    /// Insert all entries in one write request, in order.
    ///
    /// Entries whose match key is already installed are then modified, so the later
    /// write wins. Any other refusal is returned as is.
    async fn write_table_entries(&mut self, entries: Vec<TableEntry>) -> Result<(), DeviceError> {
        let updates = entries.iter().cloned().map(|e| (UpdateType::Insert, e)).collect();
        let existing = match self.write_updates(updates).await {
            Ok(()) => return Ok(()),
            Err(DeviceError::DeviceGrpcError { device, error }) => match already_existing_updates(&error, entries.len()) {
                Some(existing) => existing,
                None => return Err(DeviceError::DeviceGrpcError { device, error }),
            },
            Err(e) => return Err(e),
        };
        debug!(target: "switch", "{}: {} entries exist, modifying them", self.name(), existing.len());
        let modify = existing
            .into_iter()
            .filter_map(|index| entries.get(index).cloned())
            .map(|e| (UpdateType::Modify, e))
            .collect();
        self.write_updates(modify).await
    }

    async fn write_table_entry(&mut self, entry: TableEntry) -> Result<(), DeviceError> {
        self.write_table_entries(vec![entry]).await
    }

    async fn read_table_entries(
        &mut self,
    ) -> Result<BoxStream<'static, Result<TableEntry, DeviceError>>, DeviceError>;

    async fn read_counter(&mut self, counter_id: u32, index: i64) -> Result<Vec<CounterEntry>, DeviceError>;

    /// Best-effort close of the session.
    async fn shutdown(&mut self);
}

#[async_trait]
impl<S> SwitchConnection for Box<S>
where
    S: SwitchConnection + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn establish_mastership(&mut self, election_id: ElectionId) -> Result<(), DeviceError> {
        (**self).establish_mastership(election_id).await
    }

    async fn set_forwarding_pipeline_config(
        &mut self,
        pipeconf: Arc<dyn Pipeconf>,
    ) -> Result<(), DeviceError> {
        (**self).set_forwarding_pipeline_config(pipeconf).await
    }

    async fn write_updates(&mut self, updates: Vec<(UpdateType, TableEntry)>) -> Result<(), DeviceError> {
        (**self).write_updates(updates).await
    }

    async fn read_table_entries(
        &mut self,
    ) -> Result<BoxStream<'static, Result<TableEntry, DeviceError>>, DeviceError> {
        (**self).read_table_entries().await
    }

    async fn read_counter(&mut self, counter_id: u32, index: i64) -> Result<Vec<CounterEntry>, DeviceError> {
        (**self).read_counter(counter_id, index).await
    }

    async fn shutdown(&mut self) {
        (**self).shutdown().await
    }
}
