//! tacsep-sim - run a tactical separation scenario
//!
//! Usage:
//!   tacsep-sim run --scenario demos/crossing.json --ticks 600 --report report.json

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tacsep_sim::{Config, Scenario, Simulator};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tactical conflict resolution and rerouting simulator", long_about = None)]
struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scenario file
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Scenario JSON file
    #[arg(long)]
    scenario: PathBuf,

    /// Number of timesteps to simulate
    #[arg(long, default_value_t = 1200)]
    ticks: u64,

    /// Pace ticks against the wall clock
    #[arg(long)]
    realtime: bool,

    /// Timestep in seconds (overrides TACSEP_DT)
    #[arg(long)]
    dt: Option<f64>,

    /// Street graph JSON (overrides TACSEP_GRAPH and the scenario)
    #[arg(long)]
    graph: Option<PathBuf>,

    /// Tactical rules JSON (overrides TACSEP_RULES and the scenario)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Geofence file loaded at start and used by SAVEGEOFENCES/LOADGEOFENCES
    #[arg(long)]
    geofences: Option<PathBuf>,

    /// Write the run report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(cli.log_json.then(|| fmt::layer().json()))
        .with((!cli.log_json).then(fmt::layer))
        .with(EnvFilter::from_default_env().add_directive("tacsep_sim=info".parse()?))
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(dt) = args.dt.filter(|dt| dt.is_finite() && *dt > 0.0) {
        config.dt_s = dt;
    }
    if args.graph.is_some() {
        config.graph_path = args.graph;
    }
    if args.rules.is_some() {
        config.rules_path = args.rules;
    }
    if args.geofences.is_some() {
        config.geofences_path = args.geofences;
    }

    let scenario = Scenario::load(&args.scenario)?;
    tracing::info!("Starting scenario {} ({} ticks of {} s)", scenario.name, args.ticks, config.dt_s);
    let mut sim = Simulator::from_scenario(&scenario, config)?;

    if args.realtime {
        sim.run_realtime(args.ticks).await;
    } else {
        sim.run(args.ticks);
    }

    let report = sim.report();
    tracing::info!(
        "finished at t={:.1} s: {} conflict pair(s), {} LoS pair(s), {} reroute(s), {} aircraft remaining",
        report.sim_time_s,
        report.stats.conflict_pairs,
        report.stats.los_pairs,
        report.stats.reroutes_ok,
        report.aircraft.len()
    );
    match &args.report {
        Some(path) => report.write(path)?,
        None => println!("{}", report.to_json()?),
    }
    Ok(())
}
