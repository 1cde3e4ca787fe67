use crate::error::PipeconfError;
use crate::p4rt::pipeconf::Pipeconf;
use crate::p4rt::pure::build_table_entry;
use crate::proto::p4runtime::TableEntry;
use crate::util::value::{InnerParamValue, InnerValue};
use std::fmt::{Display, Formatter};

/// A table entry expressed by names, translated to ids against a pipeconf on demand.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Flow {
    pub table: FlowTable,
    pub action: FlowAction,
    pub priority: i32,
}

impl Flow {
    pub fn to_table_entry<T>(&self, pipeconf: &T, metadata: u64) -> Result<TableEntry, PipeconfError>
    where
        T: Pipeconf + ?Sized,
    {
        build_table_entry(
            pipeconf.get_p4info(),
            &self.table.name,
            &self.table.matches,
            false,
            &self.action.name,
            &self.action.params,
            self.priority,
            metadata,
        )
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.table.name)?;
        for m in &self.table.matches {
            write!(f, " {}={}", m.name, m.value)?;
        }
        write!(f, " -> {}(", self.action.name)?;
        for (i, p) in self.action.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", p.name, crate::util::value::display_bytes(&p.value))?;
        }
        write!(f, ")")?;
        if self.priority != 0 {
            write!(f, " priority {}", self.priority)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FlowTable {
    pub name: String,
    pub matches: Vec<FlowMatch>,
}

impl FlowTable {
    pub fn new(name: &str, matches: Vec<FlowMatch>) -> FlowTable {
        FlowTable {
            name: name.to_owned(),
            matches,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FlowMatch {
    pub name: String,
    pub value: InnerValue,
}

impl FlowMatch {
    pub fn new(name: &str, value: InnerValue) -> FlowMatch {
        FlowMatch {
            name: name.to_owned(),
            value,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FlowAction {
    pub name: String,
    pub params: Vec<FlowActionParam>,
}

impl FlowAction {
    pub fn new(name: &str, params: Vec<FlowActionParam>) -> FlowAction {
        FlowAction {
            name: name.to_owned(),
            params,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FlowActionParam {
    pub name: String,
    pub value: InnerParamValue,
}

impl FlowActionParam {
    pub fn new(name: &str, value: InnerParamValue) -> FlowActionParam {
        FlowActionParam {
            name: name.to_owned(),
            value,
        }
    }
}
