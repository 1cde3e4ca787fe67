use crate::config::PollConfig;
use crate::error::{DeviceError, PipeconfError};
use crate::p4rt::pipeconf::Pipeconf;
use crate::p4rt::pure::get_counter_id;
use crate::p4rt::switch::SwitchConnection;
use crate::provision::Session;
use crate::representation::CounterSample;
use crate::util::FinishSignal;
use log::debug;
use std::time::Duration;
use tokio::time::Instant;

/// Periodic reader of one counter cell on every switch.
#[derive(Clone, Debug)]
pub struct CounterPoller {
    pub counter: String,
    pub counter_id: u32,
    pub index: i64,
    pub interval: Duration,
}

impl CounterPoller {
    pub fn new<T: Pipeconf + ?Sized>(pipeconf: &T, config: &PollConfig) -> Result<CounterPoller, PipeconfError> {
        let counter_id = get_counter_id(pipeconf.get_p4info(), &config.counter)
            .ok_or_else(|| PipeconfError::CounterNotFound(config.counter.clone()))?;
        Ok(CounterPoller {
            counter: config.counter.clone(),
            counter_id,
            index: config.index,
            interval: config.interval(),
        })
    }

    /// Read the counter once on every session, in order.
    pub async fn sample<S: SwitchConnection>(
        &self,
        sessions: &mut [Session<S>],
    ) -> Result<Vec<CounterSample>, DeviceError> {
        let mut ret = vec![];
        for session in sessions.iter_mut() {
            for entry in session.read_counter(self.counter_id, self.index).await? {
                let data = entry.data.unwrap_or_default();
                ret.push(CounterSample {
                    device: session.name().to_owned(),
                    counter: self.counter.clone(),
                    index: entry.index.map(|i| i.index).unwrap_or(self.index),
                    packet_count: data.packet_count,
                    byte_count: data.byte_count,
                });
            }
        }
        Ok(ret)
    }

    /// Sample every `interval` until `finish` resolves, handing each round to `on_samples`.
    ///
    /// The first round happens one interval after the call. A failed read ends the loop.
    pub async fn run<S, F>(
        &self,
        sessions: &mut [Session<S>],
        mut finish: FinishSignal,
        mut on_samples: F,
    ) -> Result<(), DeviceError>
    where
        S: SwitchConnection,
        F: FnMut(Vec<CounterSample>),
    {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                biased;
                _ = &mut finish => {
                    debug!(target: "poll", "counter polling stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let samples = self.sample(sessions).await?;
                    on_samples(samples);
                }
            }
        }
    }
}

pub fn print_samples(samples: Vec<CounterSample>) {
    println!("\n----- Reading counters -----");
    for sample in samples {
        println!("{}", sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p4rt::memory::{CallLog, MemorySwitch};
    use crate::p4rt::pipeconf::fixture::s_router_pipeconf;
    use crate::p4rt::switch::ElectionId;
    use std::sync::Arc;

    async fn session(name: &str, packets: i64) -> Session<MemorySwitch> {
        let sw = MemorySwitch::new(name, CallLog::default());
        let mut session = Session::new(sw);
        session.establish_mastership(ElectionId::default()).await.unwrap();
        session
            .install_pipeline(Arc::new(s_router_pipeconf()))
            .await
            .unwrap();
        session.connection().set_counter(302_000_001, 1, packets, packets * 100);
        session
    }

    fn poller(interval: Duration) -> CounterPoller {
        CounterPoller::new(
            &s_router_pipeconf(),
            &PollConfig {
                interval_secs: 10,
                ..Default::default()
            },
        )
        .map(|p| CounterPoller { interval, ..p })
        .unwrap()
    }

    #[test]
    fn test_unknown_counter() {
        let err = CounterPoller::new(
            &s_router_pipeconf(),
            &PollConfig {
                counter: "MyIngress.nope".to_owned(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PipeconfError::CounterNotFound(_)));
    }

    #[tokio::test]
    async fn test_sample_every_switch() {
        let mut sessions = vec![session("r1", 3).await, session("r2", 0).await];
        let samples = poller(Duration::from_secs(10)).sample(&mut sessions).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].to_string(), "r1 MyIngress.c 1: 3 packets (300 bytes)");
        assert_eq!(samples[1].to_string(), "r2 MyIngress.c 1: 0 packets (0 bytes)");
    }

    #[tokio::test]
    async fn test_run_until_finished() {
        let mut sessions = vec![session("r1", 1).await];
        let (sender, finish) = FinishSignal::channel();
        let mut sender = Some(sender);
        let mut rounds = 0;
        poller(Duration::from_millis(5))
            .run(&mut sessions, finish, |samples| {
                assert_eq!(samples.len(), 1);
                rounds += 1;
                if rounds == 3 {
                    if let Some(s) = sender.take() {
                        let _ = s.send(());
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(rounds, 3);
    }
}
