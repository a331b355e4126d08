mod checks;
mod collectors;
mod config;
mod http;
mod metrics;
mod nrpe;
mod state;

use axum::serve;
use checks::{default_registry, run_blocking, CheckRegistry, CheckState};
use clap::{Parser, Subcommand};
use collectors::system::collect_system;
use config::Config;
use metrics::Metrics;
use nrpe::server::{NrpePolicy, NrpeServer, NRPE_CHECK_COMMAND};
use state::{CpuLoadHistory, State};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::{System, SystemExt};
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

pub const AGENT_NAME: &str = "SNClient+";

pub fn agent_version() -> String {
    format!("{AGENT_NAME} v{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Parser, Debug)]
#[command(name = "snclient")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./snclient.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent (default).
    Daemon,
    /// Run a single check against this host and exit with its state.
    Test {
        check: String,
        args: Vec<String>,
    },
    /// List the available checks.
    Inventory,
    /// Query a remote agent over NRPE.
    CheckNrpe {
        #[arg(short = 'H', long)]
        host: String,
        #[arg(short, long, default_value_t = 5666)]
        port: u16,
        #[arg(short, long, default_value = NRPE_CHECK_COMMAND)]
        command: String,
        #[arg(short, long, num_args = 0..)]
        args: Vec<String>,
        #[arg(short, long, default_value = "10s")]
        timeout: String,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    match cli.command.unwrap_or(Command::Daemon) {
        Command::Daemon => run_daemon(&cli.config).await,
        Command::Test { check, args } => std::process::exit(run_test(check, args).await),
        Command::Inventory => {
            let registry = local_registry().0;
            for name in registry.names() {
                println!("{name}");
            }
        }
        Command::CheckNrpe {
            host,
            port,
            command,
            args,
            timeout,
        } => std::process::exit(run_check_nrpe(&host, port, &command, &args, &timeout).await),
    }
}

async fn run_daemon(config_path: &str) {
    let cfg = match Config::load_from_file(config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        version = %agent_version(),
        listen = %cfg.listen,
        nrpe = %cfg.nrpe.listen,
        interval_secs = cfg.interval_secs,
        "starting snclient"
    );

    let shared_state = Arc::new(RwLock::new(State::new(now_unix())));
    let cpu_history = Arc::new(CpuLoadHistory::new());
    let registry = Arc::new(default_registry(shared_state.clone(), cpu_history.clone()));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let listen = cfg.listen.clone();
        let app = http::build_router(metrics.clone(), shared_state.clone(), registry.clone());
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let nrpe_task = if cfg.nrpe.enabled {
        let nrpe_cfg = cfg.nrpe.clone();
        let server = NrpeServer::new(
            registry.clone(),
            metrics.clone(),
            NrpePolicy::from_config(&nrpe_cfg),
        );
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let listener = match TcpListener::bind(&nrpe_cfg.listen).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, listen = %nrpe_cfg.listen, "failed to start NRPE listener");
                    return;
                }
            };
            info!(listen = %nrpe_cfg.listen, "nrpe listener started");
            server.serve(listener, shutdown).await;
        }))
    } else {
        None
    };

    let collector_task = {
        let metrics = metrics.clone();
        let shared_state = shared_state.clone();
        let cpu_history = cpu_history.clone();
        let mut shutdown = shutdown_rx.clone();
        let interval = Duration::from_secs(cfg.interval_secs);
        tokio::spawn(async move {
            let system = Arc::new(Mutex::new(System::new_all()));
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("stopping collector loop");
                        break;
                    }
                    _ = ticker.tick() => {
                        let sys = system.clone();
                        let sampled = tokio::task::spawn_blocking(move || {
                            let mut guard = sys.lock().unwrap_or_else(|e| e.into_inner());
                            collect_system(&mut guard)
                        })
                        .await;
                        let snapshot = match sampled {
                            Ok(snapshot) => snapshot,
                            Err(err) => {
                                warn!(error = %err, "system collector failed");
                                metrics.inc_collect_error("system");
                                continue;
                            }
                        };
                        cpu_history.push(snapshot.cpu_usage_percent);
                        debug!(samples = cpu_history.len(), "cpu history updated");
                        let state = {
                            let mut guard = shared_state.write().await;
                            guard.update_collected(now_unix(), snapshot);
                            guard.clone()
                        };
                        metrics.update_from_state(&state);
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");
    let _ = shutdown_tx.send(true);
    let _ = collector_task.await;
    if let Some(task) = nrpe_task {
        let _ = task.await;
    }
    let _ = http_task.await;
}

fn local_registry() -> (CheckRegistry, Arc<RwLock<State>>, Arc<CpuLoadHistory>) {
    let state = Arc::new(RwLock::new(State::new(now_unix())));
    let cpu = Arc::new(CpuLoadHistory::new());
    let registry = default_registry(state.clone(), cpu.clone());
    (registry, state, cpu)
}

async fn run_test(check: String, args: Vec<String>) -> i32 {
    let (registry, state, cpu) = local_registry();

    let mut system = System::new_all();
    collect_system(&mut system);
    tokio::time::sleep(System::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(500))).await;
    let snapshot = collect_system(&mut system);
    cpu.push(snapshot.cpu_usage_percent);
    state.write().await.update_collected(now_unix(), snapshot);

    let result = run_blocking(Arc::new(registry), check, args).await;
    println!("{}", result.plugin_output());
    i32::from(result.state.code())
}

async fn run_check_nrpe(
    host: &str,
    port: u16,
    command: &str,
    args: &[String],
    timeout: &str,
) -> i32 {
    let unknown = i32::from(CheckState::Unknown.code());
    let timeout = match humantime::parse_duration(timeout) {
        Ok(t) => t,
        Err(err) => {
            println!("UNKNOWN - invalid timeout '{timeout}': {err}");
            return unknown;
        }
    };
    let addr = match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                println!("UNKNOWN - {host} did not resolve");
                return unknown;
            }
        },
        Err(err) => {
            println!("UNKNOWN - cannot resolve {host}: {err}");
            return unknown;
        }
    };

    match nrpe::client::query(addr, command, args, timeout).await {
        Ok(response) => {
            println!("{}", response.payload_str());
            i32::from(response.status_code().min(3))
        }
        Err(err) => {
            println!("UNKNOWN - {err}");
            unknown
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
