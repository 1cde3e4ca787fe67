//! Per-update outcome of a failed Write.
//!
//! A P4Runtime target answers a partially failed batch with `UNKNOWN` and packs one
//! `p4.v1.Error` per update, in request order, into the `google.rpc.Status` carried by
//! the gRPC status details.

use crate::proto::p4runtime::Error as UpdateError;
use bytes::Bytes;
use prost::Message;

const UPDATE_ERROR_TYPE_URL: &str = "type.googleapis.com/p4.v1.Error";

/// `google.rpc.Status`
#[derive(Clone, PartialEq, Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<RpcAny>,
}

/// `google.protobuf.Any`
#[derive(Clone, PartialEq, Message)]
pub struct RpcAny {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes, tag = "2")]
    pub value: Vec<u8>,
}

/// The per-update errors attached to `status`, empty when it carries none.
pub fn write_update_errors(status: &tonic::Status) -> Vec<UpdateError> {
    let rpc = match RpcStatus::decode(status.details()) {
        Ok(rpc) => rpc,
        Err(_) => return vec![],
    };
    rpc.details
        .iter()
        .filter(|any| any.type_url.ends_with("p4.v1.Error"))
        .filter_map(|any| UpdateError::decode(any.value.as_slice()).ok())
        .collect()
}

/// Indices of the updates refused because their entry already exists, when that is
/// the only reason the write of `count` updates failed.
pub fn already_existing_updates(status: &tonic::Status, count: usize) -> Option<Vec<usize>> {
    let errors = write_update_errors(status);
    if errors.is_empty() {
        // targets answering a single update with its own code
        return match status.code() {
            tonic::Code::AlreadyExists if count == 1 => Some(vec![0]),
            _ => None,
        };
    }
    if errors.len() != count {
        return None;
    }
    let mut existing = vec![];
    for (index, error) in errors.iter().enumerate() {
        match tonic::Code::from_i32(error.canonical_code) {
            tonic::Code::Ok => {}
            tonic::Code::AlreadyExists => existing.push(index),
            _ => return None,
        }
    }
    if existing.is_empty() {
        None
    } else {
        Some(existing)
    }
}

/// The status a target returns when some updates of a write failed.
pub fn new_write_failure(errors: Vec<(tonic::Code, String)>) -> tonic::Status {
    let rpc = RpcStatus {
        code: tonic::Code::Unknown as i32,
        message: "Write failure.".to_owned(),
        details: errors
            .into_iter()
            .map(|(code, message)| {
                let error = UpdateError {
                    canonical_code: code as i32,
                    message,
                    ..Default::default()
                };
                let mut value = Vec::with_capacity(error.encoded_len());
                // encoding into a Vec does not fail
                let _ = error.encode(&mut value);
                RpcAny {
                    type_url: UPDATE_ERROR_TYPE_URL.to_owned(),
                    value,
                }
            })
            .collect(),
    };
    let mut details = Vec::with_capacity(rpc.encoded_len());
    let _ = rpc.encode(&mut details);
    tonic::Status::with_details(tonic::Code::Unknown, "Write failure.", Bytes::from(details))
}

/// Canonical upper-case name of a status code, as gRPC status strings spell it.
pub fn code_name(code: tonic::Code) -> &'static str {
    match code {
        tonic::Code::Ok => "OK",
        tonic::Code::Cancelled => "CANCELLED",
        tonic::Code::Unknown => "UNKNOWN",
        tonic::Code::InvalidArgument => "INVALID_ARGUMENT",
        tonic::Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
        tonic::Code::NotFound => "NOT_FOUND",
        tonic::Code::AlreadyExists => "ALREADY_EXISTS",
        tonic::Code::PermissionDenied => "PERMISSION_DENIED",
        tonic::Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
        tonic::Code::FailedPrecondition => "FAILED_PRECONDITION",
        tonic::Code::Aborted => "ABORTED",
        tonic::Code::OutOfRange => "OUT_OF_RANGE",
        tonic::Code::Unimplemented => "UNIMPLEMENTED",
        tonic::Code::Internal => "INTERNAL",
        tonic::Code::Unavailable => "UNAVAILABLE",
        tonic::Code::DataLoss => "DATA_LOSS",
        tonic::Code::Unauthenticated => "UNAUTHENTICATED",
        #[allow(unreachable_patterns)]
        _ => "UNKNOWN",
    }
}
