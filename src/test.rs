//! End-to-end scenarios against in-memory switches.

use crate::config::ControllerConfig;
use crate::p4rt::memory::{CallLog, MemorySwitch};
use crate::p4rt::pipeconf::fixture::s_router_pipeconf;
use crate::p4rt::pipeconf::Pipeconf;
use crate::provision::{Session, SwitchPlan};
use std::sync::Arc;


pub(crate) fn demo_config() -> ControllerConfig {
    ControllerConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/s-router.json")).unwrap()
}

/// Demo config, its plans and one fresh memory session per switch, all logging to `log`.
pub(crate) fn demo_fleet(
    log: &CallLog,
) -> (ControllerConfig, Arc<dyn Pipeconf>, Vec<SwitchPlan>, Vec<Session<MemorySwitch>>) {
    let config = demo_config();
    let pipeconf: Arc<dyn Pipeconf> = Arc::new(s_router_pipeconf());
    let plans = SwitchPlan::compile_all(&config, &*pipeconf).unwrap();
    let sessions = config
        .switches
        .iter()
        .map(|sw| Session::new(MemorySwitch::new(&sw.name, log.clone())))
        .collect();
    (config, pipeconf, plans, sessions)
}
