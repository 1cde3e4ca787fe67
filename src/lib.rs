//! Controller and topology driver for a fleet of P4Runtime (BMv2) routers.
//!
//! The controller side acquires mastership on every configured switch, pushes the
//! forwarding program, installs MAC rewrite, LPM forwarding and firewall entries in a
//! fixed order and then polls counters. The topology side describes the emulated
//! network the routers are wired into.

pub mod config;
pub mod error;
pub mod firewall;
pub mod p4rt;
pub mod poll;
pub mod provision;
pub mod readback;
pub mod representation;
pub mod topology;
pub mod util;

pub mod proto {
    pub use rusty_p4_proto::proto::config::v1 as p4config;
    pub use rusty_p4_proto::proto::v1 as p4runtime;
}

#[cfg(test)]
mod test;
