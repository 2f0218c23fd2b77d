use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apex_signal::client::DecisionClient;
use apex_signal::models::ControlMode;
use apex_signal::runner::{RunnerConfig, Simulator};
use apex_signal::server::{self, AppState};

#[derive(Parser)]
#[command(name = "apex-signal")]
#[command(about = "Traffic intersection simulator with an AI signal decision service")]
struct Cli {
    /// Seed for all randomness; omit for entropy-seeded runs
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the decision service
    Serve(ServeArgs),
    /// Run the intersection simulation
    Simulate(SimulateArgs),
    /// Run the decision service and a simulation against it
    Demo {
        #[command(flatten)]
        serve: ServeArgs,
        #[command(flatten)]
        simulate: SimulateArgs,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Port for the decision service
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Directory served as static assets
    #[arg(long, default_value = "public")]
    assets: PathBuf,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Ask the decision service, fall back to the local heuristic
    Automatic,
    /// Local fixed-time decisions only
    Manual,
}

impl From<Mode> for ControlMode {
    fn from(mode: Mode) -> ControlMode {
        match mode {
            Mode::Automatic => ControlMode::Ai,
            Mode::Manual => ControlMode::Manual,
        }
    }
}

#[derive(Args)]
struct SimulateArgs {
    /// Base URL of the decision service
    #[arg(long, default_value = "http://localhost:8000")]
    decision_url: String,

    #[arg(long, value_enum, default_value = "automatic")]
    mode: Mode,

    /// Speed multiplier over real time
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Number of ticks to run; 0 runs until Ctrl-C
    #[arg(long, default_value = "0")]
    ticks: u64,

    /// Deadline for each decision call, in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    /// Per-tick chance of an emergency vehicle arriving
    #[arg(long, default_value = "0.005")]
    emergency_probability: f64,

    /// Simulated seconds between service health probes
    #[arg(long, default_value = "10")]
    health_check_interval: u64,
}

fn sim_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Flip the shared stop flag on the first Ctrl-C.
fn watch_for_stop(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Stop requested; finishing the current tick");
            running.store(false, Ordering::SeqCst);
        }
    });
}

fn build_simulator(
    args: &SimulateArgs,
    seed: Option<u64>,
    running: Arc<AtomicBool>,
) -> Result<Simulator> {
    let client = DecisionClient::new(&args.decision_url, Duration::from_millis(args.timeout_ms))?;
    let config = RunnerConfig {
        mode: args.mode.into(),
        speed: args.speed,
        ticks: args.ticks,
        emergency_probability: args.emergency_probability,
        health_check_interval: args.health_check_interval,
    };
    Ok(Simulator::new(config, Some(client), sim_rng(seed), running))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let running = Arc::new(AtomicBool::new(true));
    watch_for_stop(running.clone());

    match cli.command {
        Command::Serve(serve) => {
            let state = AppState::new(cli.seed, serve.assets);
            let addr = SocketAddr::from(([0, 0, 0, 0], serve.port));
            server::run(addr, state, running).await?;
        }
        Command::Simulate(simulate) => {
            let simulator = build_simulator(&simulate, cli.seed, running)?;
            simulator.run().await;
        }
        Command::Demo { serve, mut simulate } => {
            // The simulation always talks to the in-process service
            simulate.decision_url = format!("http://127.0.0.1:{}", serve.port);
            let state = AppState::new(cli.seed, serve.assets);
            let addr = SocketAddr::from(([127, 0, 0, 1], serve.port));
            let stop = running.clone();
            let server_task = tokio::spawn(async move {
                if let Err(err) = server::run(addr, state, stop).await {
                    log::error!("Decision service failed: {err:#}");
                }
            });

            // Let the service bind before the first health probe
            tokio::time::sleep(Duration::from_millis(200)).await;
            let simulator = build_simulator(&simulate, cli.seed, running.clone())?;
            let stop = running.clone();
            let sim_task = tokio::spawn(async move {
                simulator.run().await;
                // A finished simulation winds the service down too
                stop.store(false, Ordering::SeqCst);
            });

            join_all([server_task, sim_task]).await;
        }
    }

    Ok(())
}
