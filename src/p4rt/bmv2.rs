use super::pipeconf::Pipeconf;
use super::pure::{
    new_master_update_request, new_read_counter_request, new_read_table_entries_request,
    new_set_forwarding_pipeline_config_request, new_write_request, UpdateType,
};
use super::switch::{ElectionId, SwitchConnection};
use crate::error::DeviceError;
use crate::proto::p4runtime::{
    entity, stream_message_response, CounterEntry, MasterArbitrationUpdate, StreamMessageRequest,
    StreamMessageResponse, TableEntry,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use log::{debug, error, info, warn};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;

type P4RuntimeClient =
    crate::proto::p4runtime::p4_runtime_client::P4RuntimeClient<tonic::transport::channel::Channel>;

/// A connection to bmv2 switch using p4runtime API.
///
/// To provision a bmv2 switch:
/// - make a connection using [Bmv2SwitchConnection::new] with some options [Bmv2ConnectionOption].
/// - acquire mastership with [SwitchConnection::establish_mastership]. This opens the
///   bi-direction stream, sends the arbitration request and waits until the switch answers it.
/// - set the pipeline config using [SwitchConnection::set_forwarding_pipeline_config].
/// - write table entries.
pub struct Bmv2SwitchConnection {
    pub name: String,
    pub address: String,
    pub device_id: u64,
    client: P4RuntimeClient,
    stream_status: Bmv2StreamStatus,
    master_status: Bmv2MasterStatus,
    arbitration_timeout: Duration,
    proto_dump: Option<File>,
}

pub struct Bmv2ConnectionOption {
    /// the device id used in p4runtime
    pub p4_device_id: u64,
    /// how long to wait for the answer to the arbitration request
    pub arbitration_timeout: Duration,
    /// every request sent to the switch is appended to this file
    pub proto_dump_file: Option<PathBuf>,
}

impl Default for Bmv2ConnectionOption {
    fn default() -> Self {
        Self {
            p4_device_id: 1,
            arbitration_timeout: Duration::from_secs(5),
            proto_dump_file: None,
        }
    }
}

pub enum Bmv2StreamStatus {
    None,
    Streaming {
        sender: Sender<StreamMessageRequest>,
        /// arbitration updates forwarded by the drain task
        arbitrations: Receiver<MasterArbitrationUpdate>,
        drain: JoinHandle<()>,
    },
}

#[derive(Clone, Debug)]
pub enum Bmv2MasterStatus {
    NoElect,
    Elect { election_id: ElectionId },
    Master { election_id: ElectionId },
    NotMaster { reason: String },
}

impl Bmv2SwitchConnection {
    pub async fn new(
        name: &str,
        address: &str,
        options: Bmv2ConnectionOption,
    ) -> Result<Bmv2SwitchConnection, DeviceError> {
        let proto_dump = match options.proto_dump_file {
            Some(path) => Some(open_dump_file(path)?),
            None => None,
        };

        let client = P4RuntimeClient::connect(format!("http://{}", address))
            .await
            .map_err(|error| DeviceError::DeviceGrpcTransportError {
                device: name.to_owned(),
                error,
            })?;
        info!(target: "bmv2", "connected to {} at {}", name, address);

        Ok(Bmv2SwitchConnection {
            name: name.to_owned(),
            address: address.to_owned(),
            device_id: options.p4_device_id,
            client,
            stream_status: Bmv2StreamStatus::None,
            master_status: Bmv2MasterStatus::NoElect,
            arbitration_timeout: options.arbitration_timeout,
            proto_dump,
        })
    }

    pub fn get_master(&self) -> Result<ElectionId, DeviceError> {
        let reason = match &self.master_status {
            Bmv2MasterStatus::Master { election_id } => return Ok(*election_id),
            Bmv2MasterStatus::Elect { .. } => "Not elected".to_owned(),
            Bmv2MasterStatus::NotMaster { reason } => reason.clone(),
            Bmv2MasterStatus::NoElect => "No elect".to_owned(),
        };
        Err(DeviceError::NotMaster {
            device: self.name.clone(),
            reason,
        })
    }

    fn grpc_error(&self, error: tonic::Status) -> DeviceError {
        DeviceError::DeviceGrpcError {
            device: self.name.clone(),
            error,
        }
    }

    fn dump<T: Debug>(&mut self, kind: &str, request: &T) {
        if let Some(file) = self.proto_dump.as_mut() {
            if let Err(e) = writeln!(file, "[{}]\n{:#?}\n", kind, request) {
                warn!(target: "bmv2", "writing proto dump for {} failed: {}", self.name, e);
            }
        }
    }

    fn arbitration_timed_out(&self) -> DeviceError {
        DeviceError::NotMaster {
            device: self.name.clone(),
            reason: format!("no arbitration response within {:?}", self.arbitration_timeout),
        }
    }

    /// Re-send the arbitration on an already open stream and wait for its answer.
    async fn rearbitrate(&mut self, election_id: ElectionId) -> Result<(), DeviceError> {
        let request = new_master_update_request(self.device_id, election_id);
        self.dump("StreamMessageRequest", &request);
        let timeout = self.arbitration_timeout;
        let not_connected = DeviceError::DeviceNotConnected {
            device: self.name.clone(),
        };
        let update = match &mut self.stream_status {
            Bmv2StreamStatus::Streaming {
                sender, arbitrations, ..
            } => exchange_arbitration(sender, arbitrations, request, timeout).await,
            Bmv2StreamStatus::None => return Err(not_connected),
        };
        match update {
            Ok(Some(update)) => self.check_arbitration(update, election_id),
            Ok(None) => Err(not_connected),
            Err(_) => Err(self.arbitration_timed_out()),
        }
    }

    fn check_arbitration(&mut self, update: MasterArbitrationUpdate, election_id: ElectionId) -> Result<(), DeviceError> {
        debug!(target: "bmv2", "arbitration response from {}: {:?}", self.name, update);
        match update.status {
            Some(status) if status.code != tonic::Code::Ok as i32 => {
                let reason = format!("{} (code {})", status.message, status.code);
                self.master_status = Bmv2MasterStatus::NotMaster {
                    reason: reason.clone(),
                };
                Err(DeviceError::NotMaster {
                    device: self.name.clone(),
                    reason,
                })
            }
            _ => {
                self.master_status = Bmv2MasterStatus::Master { election_id };
                Ok(())
            }
        }
    }
}

fn open_dump_file(path: PathBuf) -> Result<File, DeviceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| DeviceError::DeviceConfigFileError {
                path: parent.to_owned(),
                error,
            })?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|error| DeviceError::DeviceConfigFileError { path, error })
}

async fn next_arbitration(
    stream: &mut tonic::Streaming<StreamMessageResponse>,
) -> Result<Option<MasterArbitrationUpdate>, tonic::Status> {
    while let Some(response) = stream.message().await? {
        match response.update {
            Some(stream_message_response::Update::Arbitration(update)) => return Ok(Some(update)),
            other => {
                debug!(target: "bmv2", "StreamMessageResponse before arbitration: {:?}", other);
            }
        }
    }
    Ok(None)
}

/// Send `request` on the open stream and wait for the arbitration update answering it.
///
/// `Ok(None)` means the stream is gone.
async fn exchange_arbitration(
    sender: &Sender<StreamMessageRequest>,
    arbitrations: &mut Receiver<MasterArbitrationUpdate>,
    request: StreamMessageRequest,
    timeout: Duration,
) -> Result<Option<MasterArbitrationUpdate>, tokio::time::error::Elapsed> {
    // drop notifications that arrived since the last arbitration
    while arbitrations.try_recv().is_ok() {}
    if sender.send(request).await.is_err() {
        return Ok(None);
    }
    tokio::time::timeout(timeout, arbitrations.recv()).await
}

/// Keep reading the stream channel, handing arbitration updates to `arbitrations`.
async fn drain_stream<St>(name: String, mut stream: St, arbitrations: Sender<MasterArbitrationUpdate>)
where
    St: Stream<Item = Result<StreamMessageResponse, tonic::Status>> + Unpin,
{
    while let Some(r) = stream.next().await {
        match r {
            Ok(StreamMessageResponse {
                update: Some(stream_message_response::Update::Arbitration(update)),
                ..
            }) => {
                debug!(target: "bmv2", "arbitration update from {}: {:?}", name, update);
                let _ = arbitrations.try_send(update);
            }
            Ok(response) => {
                debug!(target: "bmv2", "StreamMessageResponse from {}: {:?}", name, response.update);
            }
            Err(e) => {
                error!(target: "bmv2", "stream channel of {} closed: {}", name, e);
                break;
            }
        }
    }
}

#[async_trait]
impl SwitchConnection for Bmv2SwitchConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn establish_mastership(&mut self, election_id: ElectionId) -> Result<(), DeviceError> {
        if let Bmv2StreamStatus::Streaming { .. } = self.stream_status {
            self.master_status = Bmv2MasterStatus::Elect { election_id };
            return self.rearbitrate(election_id).await;
        }

        let (sender, receiver) = tokio::sync::mpsc::channel(4096);
        let request = new_master_update_request(self.device_id, election_id);
        self.dump("StreamMessageRequest", &request);
        sender
            .send(request)
            .await
            .map_err(|_| DeviceError::DeviceNotConnected {
                device: self.name.clone(),
            })?;
        let mut stream = self
            .client
            .stream_channel(tokio_stream::wrappers::ReceiverStream::new(receiver))
            .await
            .map_err(|e| self.grpc_error(e))?
            .into_inner();
        self.master_status = Bmv2MasterStatus::Elect { election_id };

        let update = tokio::time::timeout(self.arbitration_timeout, next_arbitration(&mut stream))
            .await
            .map_err(|_| self.arbitration_timed_out())?
            .map_err(|e| self.grpc_error(e))?
            .ok_or_else(|| DeviceError::DeviceNotConnected {
                device: self.name.clone(),
            })?;
        self.check_arbitration(update, election_id)?;

        let name = self.name.clone();
        let (arbitration_sender, arbitrations) = tokio::sync::mpsc::channel(16);
        let drain = tokio::spawn(drain_stream(name, stream, arbitration_sender));
        self.stream_status = Bmv2StreamStatus::Streaming {
            sender,
            arbitrations,
            drain,
        };
        Ok(())
    }

    async fn set_forwarding_pipeline_config(
        &mut self,
        pipeconf: Arc<dyn Pipeconf>,
    ) -> Result<(), DeviceError> {
        let election_id = self.get_master()?;
        let request = new_set_forwarding_pipeline_config_request(
            pipeconf.get_p4info(),
            pipeconf.get_bmv2_file_path(),
            election_id,
            self.device_id,
            &self.name,
        )
        .await?;
        self.dump("SetForwardingPipelineConfigRequest", &request);
        self.client
            .set_forwarding_pipeline_config(tonic::Request::new(request))
            .await
            .map_err(|e| self.grpc_error(e))?;
        info!(target: "bmv2", "{} runs pipeline {}", self.name, pipeconf.get_name());
        Ok(())
    }

    async fn write_updates(&mut self, updates: Vec<(UpdateType, TableEntry)>) -> Result<(), DeviceError> {
        let election_id = self.get_master()?;
        let request = new_write_request(self.device_id, election_id, updates);
        self.dump("WriteRequest", &request);
        self.client
            .write(tonic::Request::new(request))
            .await
            .map_err(|e| self.grpc_error(e))?;
        Ok(())
    }

    async fn read_table_entries(
        &mut self,
    ) -> Result<BoxStream<'static, Result<TableEntry, DeviceError>>, DeviceError> {
        let request = new_read_table_entries_request(self.device_id);
        self.dump("ReadRequest", &request);
        let stream = self
            .client
            .read(tonic::Request::new(request))
            .await
            .map_err(|e| self.grpc_error(e))?
            .into_inner();
        let device = self.name.clone();
        Ok(stream
            .map_err(move |error| DeviceError::DeviceGrpcError {
                device: device.clone(),
                error,
            })
            .map_ok(|response| {
                futures::stream::iter(response.entities.into_iter().filter_map(|e| match e.entity {
                    Some(entity::Entity::TableEntry(t)) => Some(Ok(t)),
                    _ => None,
                }))
            })
            .try_flatten()
            .boxed())
    }

    async fn read_counter(&mut self, counter_id: u32, index: i64) -> Result<Vec<CounterEntry>, DeviceError> {
        let request = new_read_counter_request(self.device_id, counter_id, index);
        self.dump("ReadRequest", &request);
        let mut response = self
            .client
            .read(tonic::Request::new(request))
            .await
            .map_err(|e| self.grpc_error(e))?;
        let stream = response.get_mut();
        let mut ret = vec![];
        while let Some(msg) = stream.message().await.map_err(|e| self.grpc_error(e))? {
            for e in msg.entities {
                if let Some(entity::Entity::CounterEntry(counter)) = e.entity {
                    ret.push(counter)
                }
            }
        }
        Ok(ret)
    }

    async fn shutdown(&mut self) {
        let status = std::mem::replace(&mut self.stream_status, Bmv2StreamStatus::None);
        if let Bmv2StreamStatus::Streaming { sender, drain, .. } = status {
            drop(sender);
            drain.abort();
        }
        self.master_status = Bmv2MasterStatus::NoElect;
        if let Some(file) = self.proto_dump.as_mut() {
            let _ = file.flush();
        }
        debug!(target: "bmv2", "session to {} closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::p4runtime::{stream_message_request, Uint128};

    fn arbitration(low: u64) -> MasterArbitrationUpdate {
        MasterArbitrationUpdate {
            device_id: 1,
            election_id: Some(Uint128 { high: 0, low }),
            ..Default::default()
        }
    }

    fn response(update: MasterArbitrationUpdate) -> Result<StreamMessageResponse, tonic::Status> {
        Ok(StreamMessageResponse {
            update: Some(stream_message_response::Update::Arbitration(update)),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_drain_forwards_arbitrations() {
        let (sender, mut arbitrations) = tokio::sync::mpsc::channel(16);
        let stream = futures::stream::iter(vec![
            Ok(StreamMessageResponse::default()),
            response(arbitration(1)),
            Err(tonic::Status::unavailable("gone")),
            response(arbitration(2)),
        ]);
        drain_stream("r1".to_owned(), stream, sender).await;

        let first = arbitrations.recv().await.unwrap();
        assert_eq!(first.election_id.unwrap().low, 1);
        // nothing is read past the stream error
        assert!(arbitrations.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_exchange_waits_for_the_answer() {
        let (requests, mut switch_side) = tokio::sync::mpsc::channel::<StreamMessageRequest>(4);
        let (answers, mut arbitrations) = tokio::sync::mpsc::channel(16);
        // left over from an earlier arbitration
        answers.try_send(arbitration(1)).unwrap();

        let switch = tokio::spawn(async move {
            let request = switch_side.recv().await.unwrap();
            let low = match request.update {
                Some(stream_message_request::Update::Arbitration(a)) => a.election_id.unwrap().low,
                other => panic!("unexpected request {:?}", other),
            };
            answers
                .send(arbitration(low))
                .await
                .unwrap();
            answers
        });

        let request = new_master_update_request(1, ElectionId::new(0, 7));
        let update = exchange_arbitration(&requests, &mut arbitrations, request, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.election_id.unwrap().low, 7);
        let _answers = switch.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_times_out_or_sees_closed_stream() {
        let (requests, _switch_side) = tokio::sync::mpsc::channel::<StreamMessageRequest>(4);
        let (_answers, mut arbitrations) = tokio::sync::mpsc::channel(16);
        let request = new_master_update_request(1, ElectionId::default());
        let result =
            exchange_arbitration(&requests, &mut arbitrations, request, Duration::from_millis(20)).await;
        assert!(result.is_err());

        let (requests, switch_side) = tokio::sync::mpsc::channel::<StreamMessageRequest>(4);
        drop(switch_side);
        let request = new_master_update_request(1, ElectionId::default());
        let result = exchange_arbitration(&requests, &mut arbitrations, request, Duration::from_secs(5)).await;
        assert!(matches!(result, Ok(None)));
    }
}
