use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use rusty_p4_router::config::ControllerConfig;
use rusty_p4_router::topology::runner::{interactive, CommandRunner, DryRunRunner, ShellRunner};
use rusty_p4_router::topology::{Topology, TopologyConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Set up the emulated router network and hand over an interactive session.
#[derive(Debug, Parser)]
struct Cli {
    /// Topology description
    #[clap(long, default_value = "config/r-topo.json")]
    topology: PathBuf,
    /// Print the setup commands instead of running them
    #[clap(long)]
    dry_run: bool,
    /// Command to run once the network is ready, defaults to $SHELL
    #[clap(long)]
    shell: Option<String>,
    /// Check the router port MACs against this controller configuration
    #[clap(long)]
    controller_config: Option<PathBuf>,
    /// Path to the BMv2 behavioral executable
    #[clap(long)]
    behavioral_exe: Option<String>,
    /// BMv2 JSON loaded at router start instead of waiting for the controller
    #[clap(long = "bmv2-json")]
    bmv2_json: Option<PathBuf>,
    /// Thrift port of the first router, the others follow
    #[clap(long)]
    thrift_port: Option<u16>,
    /// gRPC port of the first router, the others follow
    #[clap(long)]
    grpc_port: Option<u16>,
    /// Only configure hosts and switches of a network created elsewhere
    #[clap(long)]
    configure_only: bool,
    /// Leave the network up when the interactive session ends
    #[clap(long)]
    keep: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = flexi_logger::Logger::with_env_or_str("info").start() {
        eprintln!("logger initialization failed: {}", e);
    }
    let cli = Cli::parse();

    let mut config = TopologyConfig::load(&cli.topology)?;
    config.renumber_ports(cli.thrift_port, cli.grpc_port);
    if let Some(exe) = cli.behavioral_exe {
        config.bmv2.behavioral_exe = exe;
    }
    if let Some(json) = cli.bmv2_json {
        config.bmv2.json = Some(json);
    }
    let topo = Topology::build(config).context("invalid topology")?;
    for endpoint in topo.router_endpoints() {
        info!(target: "topology", "router {} control at {} (device {})", endpoint.name, endpoint.address, endpoint.device_id);
    }

    if let Some(path) = &cli.controller_config {
        let controller = ControllerConfig::load(path)
            .with_context(|| format!("loading controller config {}", path.display()))?;
        for mismatch in topo.port_mac_mismatches(&controller) {
            warn!(target: "topology", "{}", mismatch);
        }
    }

    let mut runner: Box<dyn CommandRunner> = if cli.dry_run {
        Box::new(DryRunRunner::default())
    } else {
        Box::new(ShellRunner::default())
    };
    let created = !cli.configure_only;
    let setup = if created {
        topo.apply(runner.as_mut()).await
    } else {
        topo.configure(runner.as_mut()).await
    };
    if let Err(e) = setup {
        if created && !cli.dry_run {
            topo.teardown(runner.as_mut()).await;
        }
        return Err(e).context("setting up the topology");
    }

    // let host and switch configuration settle
    tokio::time::sleep(Duration::from_secs(topo.config.settle_secs)).await;
    println!("Ready !");

    if cli.dry_run {
        return Ok(());
    }
    let shell = cli
        .shell
        .or_else(|| std::env::var("SHELL").ok())
        .unwrap_or_else(|| "/bin/sh".to_owned());
    let argv: Vec<String> = shell.split_whitespace().map(ToOwned::to_owned).collect();
    let session = interactive(&argv).await;

    if created && !cli.keep {
        let failed = topo.teardown(runner.as_mut()).await;
        if failed > 0 {
            warn!(target: "topology", "{} teardown steps failed", failed);
        }
    }
    session.context("interactive session")?;
    Ok(())
}
