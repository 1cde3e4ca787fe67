use clap::{CommandFactory, Parser};
use log::{error, info};
use rusty_p4_router::config::ControllerConfig;
use rusty_p4_router::error::MyError;
use rusty_p4_router::p4rt::bmv2::{Bmv2ConnectionOption, Bmv2SwitchConnection};
use rusty_p4_router::p4rt::memory::{CallLog, MemorySwitch};
use rusty_p4_router::p4rt::pipeconf::{DefaultPipeconf, Pipeconf};
use rusty_p4_router::p4rt::switch::SwitchConnection;
use rusty_p4_router::poll::{print_samples, CounterPoller};
use rusty_p4_router::provision::{provision_all, Session, SwitchPlan};
use rusty_p4_router::readback::print_table_entries;
use rusty_p4_router::representation::Endpoint;
use rusty_p4_router::util::FinishSignal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

type DynSession = Session<Box<dyn SwitchConnection>>;

/// P4Runtime Controller
#[derive(Debug, Parser)]
struct Cli {
    /// p4info protobuf in binary format from p4c
    #[clap(long, default_value = "build/s-router.p4.p4info.bin")]
    p4info: PathBuf,
    /// BMv2 JSON file from p4c
    #[clap(long = "bmv2-json", default_value = "build/s-router.json")]
    bmv2_json: PathBuf,
    /// Switches, routes and firewall policies to install
    #[clap(long, default_value = "config/s-router.json")]
    config: PathBuf,
    /// Provision in-memory switches instead of connecting to BMv2
    #[clap(long)]
    dry_run: bool,
}

fn require_file(path: &Path, what: &str) {
    if !path.exists() {
        let _ = Cli::command().print_help();
        println!("\n{} not found: {}", what, path.display());
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = flexi_logger::Logger::with_env_or_str("info").start() {
        eprintln!("logger initialization failed: {}", e);
    }

    let cli = Cli::parse();
    require_file(&cli.p4info, "p4info file");
    require_file(&cli.bmv2_json, "BMv2 JSON file");
    require_file(&cli.config, "controller config file");

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => report(&e),
    };
    std::process::exit(code);
}

fn report(e: &MyError) -> i32 {
    match e {
        MyError::Device(_) => {
            match e.fault() {
                Some(fault) => println!("{}", fault),
                None => println!("{}", e),
            }
            2
        }
        _ => {
            println!("{}", e);
            1
        }
    }
}

async fn run(cli: Cli) -> Result<(), MyError> {
    let config = ControllerConfig::load(&cli.config)?;
    let pipeconf: Arc<dyn Pipeconf> = Arc::new(DefaultPipeconf::new("s-router", &cli.p4info, &cli.bmv2_json)?);
    let plans = SwitchPlan::compile_all(&config, &*pipeconf)?;
    let poller = CounterPoller::new(&*pipeconf, &config.poll)?;

    let mut sessions = connect(&config, cli.dry_run).await?;
    println!("connection successful");

    let result = drive(&config, pipeconf, &plans, &poller, &mut sessions).await;

    for session in sessions.iter_mut() {
        session.close().await;
    }
    result
}

async fn connect(config: &ControllerConfig, dry_run: bool) -> Result<Vec<DynSession>, MyError> {
    let log = CallLog::default();
    let mut sessions: Vec<DynSession> = Vec::with_capacity(config.switches.len());
    for sw in &config.switches {
        let endpoint = Endpoint::new(&sw.name, &sw.address, sw.device_id);
        let conn: Box<dyn SwitchConnection> = if dry_run {
            Box::new(MemorySwitch::new(&endpoint.name, log.clone()))
        } else {
            let options = Bmv2ConnectionOption {
                p4_device_id: endpoint.device_id,
                arbitration_timeout: Duration::from_secs(config.arbitration_timeout_secs),
                proto_dump_file: sw.proto_dump_file.clone(),
            };
            match Bmv2SwitchConnection::new(&endpoint.name, &endpoint.address, options).await {
                Ok(conn) => Box::new(conn),
                Err(e) => {
                    for session in sessions.iter_mut() {
                        session.close().await;
                    }
                    return Err(e.into());
                }
            }
        };
        info!(target: "controller", "{} at {} (device {})", endpoint.name, endpoint.address, endpoint.device_id);
        sessions.push(Session::new(conn));
    }
    Ok(sessions)
}

async fn drive(
    config: &ControllerConfig,
    pipeconf: Arc<dyn Pipeconf>,
    plans: &[SwitchPlan],
    poller: &CounterPoller,
    sessions: &mut [DynSession],
) -> Result<(), MyError> {
    let (sender, mut finish) = FinishSignal::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = sender.send(());
            }
            Err(e) => {
                error!(target: "controller", "cannot listen for Ctrl-C: {}", e);
                // keep the sender alive so polling is not stopped
                futures::future::pending::<()>().await;
                drop(sender);
            }
        }
    });

    let provisioning = async {
        provision_all(sessions, pipeconf.clone(), plans, config.election_id, config.mode).await?;
        for session in sessions.iter_mut() {
            print_table_entries(pipeconf.get_p4info(), session).await?;
        }
        Ok::<(), MyError>(())
    };
    let interrupted = tokio::select! {
        biased;
        _ = &mut finish => true,
        r = provisioning => {
            r?;
            false
        }
    };

    if !interrupted {
        poller.run(sessions, finish, print_samples).await?;
    }
    println!(" Shutting down.");
    Ok(())
}
