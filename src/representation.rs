use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One managed switch: how to reach it and which P4Runtime device id it answers to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub address: String,
    pub device_id: u64,
}

impl Endpoint {
    pub fn new(name: &str, address: &str, device_id: u64) -> Endpoint {
        Endpoint {
            name: name.to_owned(),
            address: address.to_owned(),
            device_id,
        }
    }
}

/// Point-in-time reading of one counter cell.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CounterSample {
    pub device: String,
    pub counter: String,
    pub index: i64,
    pub packet_count: i64,
    pub byte_count: i64,
}

impl Display for CounterSample {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}: {} packets ({} bytes)",
            self.device, self.counter, self.index, self.packet_count, self.byte_count
        )
    }
}
