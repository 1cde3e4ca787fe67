use crate::error::DeviceError;
use crate::p4rt::pure::{get_action_name, get_action_param_by_id, get_match_field_by_id, get_table_name};
use crate::p4rt::switch::SwitchConnection;
use crate::proto::p4config::P4Info;
use crate::proto::p4runtime::{field_match, table_action, FieldMatch, TableEntry};
use crate::provision::Session;
use crate::util::value::{display_bytes, display_value};
use futures::TryStreamExt;
use std::fmt::Write;

/// Values are rendered from the field width when the P4Info knows the field.
fn format_field_value(m: &FieldMatch, bitwidth: Option<i32>) -> String {
    let show = |v: &[u8]| match bitwidth {
        Some(bitwidth) => display_value(v, bitwidth),
        None => display_bytes(v),
    };
    match &m.field_match_type {
        Some(field_match::FieldMatchType::Exact(e)) => show(&e.value),
        Some(field_match::FieldMatchType::Lpm(lpm)) => format!("{}/{}", show(&lpm.value), lpm.prefix_len),
        Some(field_match::FieldMatchType::Ternary(t)) => format!("{}&&&{}", show(&t.value), show(&t.mask)),
        Some(field_match::FieldMatchType::Range(r)) => format!("[{}, {}]", show(&r.low), show(&r.high)),
        Some(other) => format!("{:?}", other),
        None => "*".to_owned(),
    }
}

/// One line per entry: `table: field value ... -> action param value ...`, ids resolved to names.
pub fn format_table_entry(p4info: &P4Info, entry: &TableEntry) -> String {
    let mut line = String::new();
    let table_name = get_table_name(p4info, entry.table_id)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| entry.table_id.to_string());
    let _ = write!(line, "{}:", table_name);
    for m in &entry.r#match {
        let field = get_match_field_by_id(p4info, entry.table_id, m.field_id);
        let name = field
            .map(|f| f.name.clone())
            .unwrap_or_else(|| m.field_id.to_string());
        let _ = write!(line, " {} {}", name, format_field_value(m, field.map(|f| f.bitwidth)));
    }
    if entry.priority != 0 {
        let _ = write!(line, " priority {}", entry.priority);
    }
    if let Some(table_action::Type::Action(action)) = entry.action.as_ref().and_then(|a| a.r#type.as_ref()) {
        let action_name = get_action_name(p4info, action.action_id)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| action.action_id.to_string());
        let _ = write!(line, " -> {}", action_name);
        for p in &action.params {
            let value = match get_action_param_by_id(p4info, action.action_id, p.param_id) {
                Some(info) => format!("{} {}", info.name, display_value(&p.value, info.bitwidth)),
                None => format!("{} {}", p.param_id, display_bytes(&p.value)),
            };
            let _ = write!(line, " {}", value);
        }
    }
    line
}

/// Read every installed entry back and render it with [format_table_entry].
pub async fn read_table_rules<S: SwitchConnection>(
    p4info: &P4Info,
    session: &mut Session<S>,
) -> Result<Vec<String>, DeviceError> {
    let mut stream = session.read_table_entries().await?;
    let mut lines = vec![];
    while let Some(entry) = stream.try_next().await? {
        lines.push(format_table_entry(p4info, &entry));
    }
    Ok(lines)
}

pub async fn print_table_entries<S: SwitchConnection>(
    p4info: &P4Info,
    session: &mut Session<S>,
) -> Result<(), DeviceError> {
    println!("\n----- Reading tables rules for {} -----", session.name());
    for line in read_table_rules(p4info, session).await? {
        println!("{}", line);
    }
    Ok(())
}
