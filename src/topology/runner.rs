use crate::error::TopologyError;
use async_trait::async_trait;
use log::{debug, warn};
use std::process::Stdio;
use tokio::process::Child;

/// Executes prepared argument vectors.
#[async_trait]
pub trait CommandRunner: Send {
    /// Run to completion.
    async fn run(&mut self, argv: &[String]) -> Result<(), TopologyError>;

    /// Start in the background and keep it running until [CommandRunner::stop].
    async fn spawn(&mut self, argv: &[String]) -> Result<(), TopologyError>;

    /// Stop everything started with [CommandRunner::spawn].
    async fn stop(&mut self) {}
}

fn split(argv: &[String]) -> Result<(&String, &[String]), TopologyError> {
    argv.split_first().ok_or_else(|| TopologyError::CommandFailed {
        command: String::new(),
        reason: "empty command".to_owned(),
    })
}

/// Runs commands as child processes and fails on a non-zero exit.
///
/// Background children are killed on [CommandRunner::stop] or when the runner is dropped.
#[derive(Default)]
pub struct ShellRunner {
    children: Vec<(String, Child)>,
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&mut self, argv: &[String]) -> Result<(), TopologyError> {
        let command = argv.join(" ");
        let (program, args) = split(argv)?;
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TopologyError::CommandFailed {
                command: command.clone(),
                reason: e.to_string(),
            })?;
        if !output.stdout.is_empty() {
            debug!(target: "topology", "{}: {}", command, String::from_utf8_lossy(&output.stdout).trim_end());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_owned();
            warn!(target: "topology", "{} exited with {}", command, output.status);
            return Err(TopologyError::CommandFailed {
                command,
                reason: format!("{}: {}", output.status, stderr),
            });
        }
        Ok(())
    }

    async fn spawn(&mut self, argv: &[String]) -> Result<(), TopologyError> {
        let command = argv.join(" ");
        let (program, args) = split(argv)?;
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TopologyError::CommandFailed {
                command: command.clone(),
                reason: e.to_string(),
            })?;
        debug!(target: "topology", "{} started as {:?}", command, child.id());
        self.children.push((command, child));
        Ok(())
    }

    async fn stop(&mut self) {
        for (command, mut child) in self.children.drain(..) {
            match child.try_wait() {
                Ok(Some(status)) => warn!(target: "topology", "{} had already exited with {}", command, status),
                _ => {
                    if let Err(e) = child.kill().await {
                        warn!(target: "topology", "stopping {}: {}", command, e);
                    }
                }
            }
        }
    }
}

/// Prints commands instead of running them and keeps them for inspection.
#[derive(Default)]
pub struct DryRunRunner {
    pub executed: Vec<Vec<String>>,
    pub spawned: Vec<Vec<String>>,
    pub stopped: bool,
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&mut self, argv: &[String]) -> Result<(), TopologyError> {
        println!("[dry-run] {}", argv.join(" "));
        self.executed.push(argv.to_vec());
        Ok(())
    }

    async fn spawn(&mut self, argv: &[String]) -> Result<(), TopologyError> {
        println!("[dry-run] {} &", argv.join(" "));
        self.spawned.push(argv.to_vec());
        Ok(())
    }

    async fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Hand the terminal to `argv` and wait until it exits.
pub async fn interactive(argv: &[String]) -> Result<(), TopologyError> {
    let (program, args) = split(argv)?;
    let status = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;
    debug!(target: "topology", "{} exited with {}", program, status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Topology, TopologyConfig};

    fn demo() -> Topology {
        let config =
            TopologyConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/r-topo.json")).unwrap();
        Topology::build(config).unwrap()
    }

    #[tokio::test]
    async fn test_dry_run_apply() {
        let topo = demo();
        let mut runner = DryRunRunner::default();
        topo.apply(&mut runner).await.unwrap();
        assert_eq!(runner.executed.len() + runner.spawned.len(), topo.plan().len());
        assert_eq!(runner.executed[0].join(" "), "sudo ip netns add h11");
        assert_eq!(runner.spawned.len(), 3);
        assert!(runner.spawned[1].join(" ").contains("--grpc-server-addr 0.0.0.0:50052"));
        // hosts exist before anything runs inside them
        let first_inside = runner.executed.iter().position(|a| a[..4] == ["sudo", "ip", "netns", "exec"]);
        let last_namespace = runner.executed.iter().rposition(|a| a[..4] == ["sudo", "ip", "netns", "add"]);
        assert!(last_namespace < first_inside);
        assert_eq!(
            runner.executed.last().unwrap().join(" "),
            "sudo ip netns exec server32 ip route replace default dev eth0 via 10.0.3.253"
        );
    }

    #[tokio::test]
    async fn test_dry_run_configure_and_teardown() {
        let topo = demo();
        let mut runner = DryRunRunner::default();
        topo.configure(&mut runner).await.unwrap();
        assert_eq!(runner.executed.len(), 30);
        assert!(runner.spawned.is_empty());

        let mut runner = DryRunRunner::default();
        assert_eq!(topo.teardown(&mut runner).await, 0);
        assert!(runner.stopped);
        assert_eq!(runner.executed.len(), topo.teardown_plan().len());
    }

    #[tokio::test]
    async fn test_shell_runner_reports_failure() {
        let mut runner = ShellRunner::default();
        runner.run(&["true".to_owned()]).await.unwrap();
        let err = runner.run(&["false".to_owned()]).await.unwrap_err();
        assert!(matches!(err, TopologyError::CommandFailed { .. }));
        assert!(runner.run(&[]).await.is_err());
        assert!(runner.spawn(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_shell_runner_stops_children() {
        let mut runner = ShellRunner::default();
        runner.spawn(&["sleep".to_owned(), "30".to_owned()]).await.unwrap();
        assert_eq!(runner.children.len(), 1);
        runner.stop().await;
        assert!(runner.children.is_empty());
    }
}
