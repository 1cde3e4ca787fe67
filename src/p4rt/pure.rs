use crate::error::{DeviceError, PipeconfError};
use crate::p4rt::switch::ElectionId;
use crate::proto::p4config::{action, match_field, Action, Counter, MatchField, P4Info, Table};
use crate::proto::p4runtime::{
    entity, field_match, set_forwarding_pipeline_config_request, stream_message_request, table_action,
    update, CounterEntry, Entity, FieldMatch, ForwardingPipelineConfig, Index,
    MasterArbitrationUpdate, ReadRequest, SetForwardingPipelineConfigRequest, StreamMessageRequest,
    TableAction, TableEntry, Uint128, Update, WriteRequest,
};
use crate::util::flow::{FlowActionParam, FlowMatch};
use crate::util::value::{InnerParamValue, InnerValue};
use bytes::{Bytes, BytesMut};
use std::path::Path;

pub type UpdateType = update::Type;

/// Fit a big-endian value into `bytes_len` bytes, dropping or adding leading bytes.
pub fn adjust_value(value: Bytes, bytes_len: usize) -> Bytes {
    if bytes_len == value.len() {
        value
    } else if bytes_len < value.len() {
        value.slice(value.len() - bytes_len..value.len())
    } else {
        let mut value2 = BytesMut::with_capacity(bytes_len);
        value2.extend(vec![0u8; bytes_len - value.len()]);
        value2.extend_from_slice(value.as_ref());
        value2.freeze()
    }
}

pub fn bytes_len(bitwidth: i32) -> usize {
    ((bitwidth.max(0) as usize) + 7) / 8
}

/// Mask selecting the first `prefix_len` bits of a `bitwidth`-bit field stored in
/// `bytes_len(bitwidth)` bytes.
pub fn prefix_mask(bitwidth: i32, prefix_len: i32) -> Bytes {
    let len = bytes_len(bitwidth);
    let pad = len * 8 - bitwidth.max(0) as usize;
    let prefix = prefix_len.max(0) as usize;
    let mut mask = vec![0u8; len];
    for bit in pad..(pad + prefix).min(len * 8) {
        mask[bit / 8] |= 0x80 >> (bit % 8);
    }
    Bytes::from(mask)
}

fn apply_mask(value: &Bytes, mask: &Bytes) -> Bytes {
    value
        .iter()
        .zip(mask.iter())
        .map(|(v, m)| v & m)
        .collect::<Vec<u8>>()
        .into()
}

pub fn new_master_update_request(device_id: u64, election_id: ElectionId) -> StreamMessageRequest {
    StreamMessageRequest {
        update: Some(stream_message_request::Update::Arbitration(
            MasterArbitrationUpdate {
                device_id,
                election_id: Some(election_id.into()),
                ..Default::default()
            },
        )),
    }
}

pub async fn new_set_forwarding_pipeline_config_request(
    p4info: &P4Info,
    bmv2_json_file_path: &Path,
    election_id: ElectionId,
    device_id: u64,
    device: &str,
) -> Result<SetForwardingPipelineConfigRequest, DeviceError> {
    let buffer = tokio::fs::read(bmv2_json_file_path)
        .await
        .map_err(|error| {
            log::error!(target: "pure", "reading dataplane image for {} failed: {}", device, error);
            DeviceError::DeviceConfigFileError {
                path: bmv2_json_file_path.to_owned(),
                error,
            }
        })?;
    Ok(SetForwardingPipelineConfigRequest {
        device_id,
        election_id: Some(election_id.into()),
        action: set_forwarding_pipeline_config_request::Action::VerifyAndCommit.into(),
        config: Some(ForwardingPipelineConfig {
            p4info: Some(p4info.clone()),
            p4_device_config: buffer.into(),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn table_entry_to_entity(table_entry: TableEntry) -> Entity {
    Entity {
        entity: Some(entity::Entity::TableEntry(table_entry)),
    }
}

/// One Write RPC carrying every given update, in order.
pub fn new_write_request(
    device_id: u64,
    election_id: ElectionId,
    updates: Vec<(UpdateType, TableEntry)>,
) -> WriteRequest {
    WriteRequest {
        device_id,
        election_id: Some(election_id.into()),
        updates: updates
            .into_iter()
            .map(|(update_type, table_entry)| {
                let update_type = if table_entry.is_default_action {
                    UpdateType::Modify
                } else {
                    update_type
                };
                Update {
                    r#type: update_type as i32,
                    entity: Some(table_entry_to_entity(table_entry)),
                }
            })
            .collect(),
        ..Default::default()
    }
}

/// Read every entry of every table.
pub fn new_read_table_entries_request(device_id: u64) -> ReadRequest {
    ReadRequest {
        device_id,
        entities: vec![table_entry_to_entity(TableEntry::default())],
        ..Default::default()
    }
}

pub fn new_read_counter_request(device_id: u64, counter_id: u32, index: i64) -> ReadRequest {
    ReadRequest {
        device_id,
        entities: vec![Entity {
            entity: Some(entity::Entity::CounterEntry(CounterEntry {
                counter_id,
                index: Some(Index { index }),
                ..Default::default()
            })),
        }],
        ..Default::default()
    }
}

pub fn build_table_entry(
    p4info: &P4Info,
    table_name: &str,
    match_fields: &[FlowMatch],
    default_action: bool,
    action_name: &str,
    action_params: &[FlowActionParam],
    priority: i32,
    metadata: u64,
) -> Result<TableEntry, PipeconfError> {
    let table_id =
        get_table_id(p4info, table_name).ok_or_else(|| PipeconfError::TableNotFound(table_name.to_owned()))?;

    let action = if !action_name.is_empty() {
        let action_id = get_actions_id(p4info, action_name)
            .ok_or_else(|| PipeconfError::ActionNotFound(action_name.to_owned()))?;
        let mut action = crate::proto::p4runtime::Action {
            action_id,
            params: vec![],
        };
        for p in action_params {
            action
                .params
                .push(get_action_param_pb(p4info, action_name, &p.name, p.value.clone())?);
        }
        Some(TableAction {
            r#type: Some(table_action::Type::Action(action)),
        })
    } else {
        None
    };

    let mut table_entry = TableEntry {
        table_id,
        action,
        priority,
        controller_metadata: metadata,
        is_default_action: default_action,
        ..Default::default()
    };

    for m in match_fields {
        let entry = get_match_field_pb(p4info, table_name, &m.name, &m.value)?;
        table_entry.r#match.push(entry)
    }

    Ok(table_entry)
}

fn preamble_matches(preamble: Option<&crate::proto::p4config::Preamble>, name: &str) -> bool {
    preamble.map_or(false, |pre| pre.name == name || pre.alias == name)
}

fn preamble_id(preamble: Option<&crate::proto::p4config::Preamble>) -> u32 {
    preamble.map_or(0, |pre| pre.id)
}

fn preamble_name(preamble: Option<&crate::proto::p4config::Preamble>) -> Option<&str> {
    preamble.map(|pre| pre.name.as_str())
}

pub fn get_table<'a>(p4info: &'a P4Info, name: &str) -> Option<&'a Table> {
    p4info
        .tables
        .iter()
        .find(|t| preamble_matches(t.preamble.as_ref(), name))
}

pub fn get_table_id(p4info: &P4Info, name: &str) -> Option<u32> {
    get_table(p4info, name).map(|table| preamble_id(table.preamble.as_ref()))
}

pub fn get_table_by_id(p4info: &P4Info, id: u32) -> Option<&Table> {
    p4info
        .tables
        .iter()
        .find(|t| t.preamble.is_some() && preamble_id(t.preamble.as_ref()) == id)
}

pub fn get_table_name(p4info: &P4Info, id: u32) -> Option<&str> {
    get_table_by_id(p4info, id).and_then(|t| preamble_name(t.preamble.as_ref()))
}

pub fn get_match_field_by_name<'a>(
    p4info: &'a P4Info,
    table_name: &str,
    name: &str,
) -> Option<&'a MatchField> {
    get_table(p4info, table_name)?
        .match_fields
        .iter()
        .find(|mf| mf.name == name)
}

pub fn get_match_field_by_id<'a>(p4info: &'a P4Info, table_id: u32, id: u32) -> Option<&'a MatchField> {
    get_table_by_id(p4info, table_id)?
        .match_fields
        .iter()
        .find(|mf| mf.id == id)
}

pub fn get_action<'a>(p4info: &'a P4Info, name: &str) -> Option<&'a Action> {
    p4info
        .actions
        .iter()
        .find(|t| preamble_matches(t.preamble.as_ref(), name))
}

pub fn get_actions_id(p4info: &P4Info, action_name: &str) -> Option<u32> {
    get_action(p4info, action_name).map(|action| preamble_id(action.preamble.as_ref()))
}

pub fn get_action_by_id(p4info: &P4Info, id: u32) -> Option<&Action> {
    p4info
        .actions
        .iter()
        .find(|t| t.preamble.is_some() && preamble_id(t.preamble.as_ref()) == id)
}

pub fn get_action_name(p4info: &P4Info, id: u32) -> Option<&str> {
    get_action_by_id(p4info, id).and_then(|a| preamble_name(a.preamble.as_ref()))
}

pub fn get_counter<'a>(p4info: &'a P4Info, name: &str) -> Option<&'a Counter> {
    p4info
        .counters
        .iter()
        .find(|t| preamble_matches(t.preamble.as_ref(), name))
}

pub fn get_counter_id(p4info: &P4Info, name: &str) -> Option<u32> {
    get_counter(p4info, name).map(|counter| preamble_id(counter.preamble.as_ref()))
}

pub fn get_action_param_by_name<'a>(
    p4info: &'a P4Info,
    action_name: &str,
    param: &str,
) -> Option<&'a action::Param> {
    get_action(p4info, action_name)?
        .params
        .iter()
        .find(|p| p.name == param)
}

pub fn get_action_param_by_id(p4info: &P4Info, action_id: u32, id: u32) -> Option<&action::Param> {
    get_action_by_id(p4info, action_id)?
        .params
        .iter()
        .find(|p| p.id == id)
}

pub fn get_match_field_pb(
    p4info: &P4Info,
    table_name: &str,
    match_field_name: &str,
    value: &InnerValue,
) -> Result<FieldMatch, PipeconfError> {
    let p4info_match = get_match_field_by_name(p4info, table_name, match_field_name).ok_or_else(|| {
        PipeconfError::MatchFieldNotFound {
            table: table_name.to_owned(),
            field: match_field_name.to_owned(),
        }
    })?;
    let bitwidth = p4info_match.bitwidth;
    let byte_len = bytes_len(bitwidth);
    let mismatch = || PipeconfError::MatchKindMismatch {
        table: table_name.to_owned(),
        field: match_field_name.to_owned(),
        value: value.to_string(),
    };
    let kind = match p4info_match.r#match.as_ref() {
        Some(match_field::Match::MatchType(x)) => match_field::MatchType::from_i32(*x),
        _ => None,
    };
    let field_match_type = match (kind, value) {
        (Some(match_field::MatchType::Exact), InnerValue::EXACT(v)) => {
            field_match::FieldMatchType::Exact(field_match::Exact {
                value: adjust_value(v.clone(), byte_len),
            })
        }
        (Some(match_field::MatchType::Lpm), InnerValue::LPM(v, l)) => {
            if *l < 0 || *l > bitwidth {
                return Err(mismatch());
            }
            let mask = prefix_mask(bitwidth, *l);
            field_match::FieldMatchType::Lpm(field_match::Lpm {
                value: apply_mask(&adjust_value(v.clone(), byte_len), &mask),
                prefix_len: *l,
            })
        }
        (Some(match_field::MatchType::Lpm), InnerValue::EXACT(v)) => {
            field_match::FieldMatchType::Lpm(field_match::Lpm {
                value: adjust_value(v.clone(), byte_len),
                prefix_len: bitwidth,
            })
        }
        (Some(match_field::MatchType::Ternary), InnerValue::TERNARY(v, mask)) => {
            let mask = adjust_value(mask.clone(), byte_len);
            field_match::FieldMatchType::Ternary(field_match::Ternary {
                value: apply_mask(&adjust_value(v.clone(), byte_len), &mask),
                mask,
            })
        }
        (Some(match_field::MatchType::Ternary), InnerValue::LPM(v, l)) => {
            if *l < 0 || *l > bitwidth {
                return Err(mismatch());
            }
            let mask = prefix_mask(bitwidth, *l);
            field_match::FieldMatchType::Ternary(field_match::Ternary {
                value: apply_mask(&adjust_value(v.clone(), byte_len), &mask),
                mask,
            })
        }
        (Some(match_field::MatchType::Ternary), InnerValue::EXACT(v)) => {
            field_match::FieldMatchType::Ternary(field_match::Ternary {
                value: adjust_value(v.clone(), byte_len),
                mask: prefix_mask(bitwidth, bitwidth),
            })
        }
        (Some(match_field::MatchType::Range), InnerValue::RANGE(low, high)) => {
            let low = adjust_value(low.clone(), byte_len);
            let high = adjust_value(high.clone(), byte_len);
            // equal-length big-endian byte strings order like the numbers they hold
            if low > high {
                return Err(mismatch());
            }
            field_match::FieldMatchType::Range(field_match::Range { low, high })
        }
        (Some(match_field::MatchType::Range), InnerValue::EXACT(v)) => {
            let v = adjust_value(v.clone(), byte_len);
            field_match::FieldMatchType::Range(field_match::Range {
                low: v.clone(),
                high: v,
            })
        }
        _ => return Err(mismatch()),
    };
    Ok(FieldMatch {
        field_id: p4info_match.id,
        field_match_type: Some(field_match_type),
    })
}

pub fn get_action_param_pb(
    p4info: &P4Info,
    action_name: &str,
    param_name: &str,
    value: InnerParamValue,
) -> Result<crate::proto::p4runtime::action::Param, PipeconfError> {
    let p4info_param = get_action_param_by_name(p4info, action_name, param_name).ok_or_else(|| {
        PipeconfError::ParamNotFound {
            action: action_name.to_owned(),
            param: param_name.to_owned(),
        }
    })?;
    Ok(crate::proto::p4runtime::action::Param {
        param_id: p4info_param.id,
        value: adjust_value(value, bytes_len(p4info_param.bitwidth)),
    })
}

impl From<ElectionId> for Uint128 {
    fn from(id: ElectionId) -> Self {
        Uint128 {
            high: id.high,
            low: id.low,
        }
    }
}
