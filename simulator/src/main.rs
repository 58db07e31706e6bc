//! FxDesk Simulator
//!
//! Drives an exchange desk with simulated clients and a random-walk rate
//! feed, or replays a scripted scenario against it.

use clap::Parser;
use fxdesk_desk::DeskConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod client;
mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// FxDesk Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "FxDesk trading simulation and scenario runner")]
struct Args {
    /// Number of simulated clients to create
    #[arg(short, long, default_value = "6")]
    clients: usize,

    /// Built-in scenario name or path to a JSON scenario
    #[arg(short, long)]
    scenario: Option<String>,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = DeskConfig::from_env();
    config.validate().map_err(anyhow::Error::msg)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    let (json, plain) = if args.json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();

    info!("Starting FxDesk Simulator");
    info!("Clients: {}", args.clients);
    info!("Speed: {}x", args.speed);

    let mut controller = SimulationController::new(args.clients, args.speed, args.seed, config);
    controller.initialize().await?;

    if let Some(scenario_name) = &args.scenario {
        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(&scenario).await?;
    } else {
        info!("Press Ctrl+C to stop");

        let duration = if args.duration > 0 {
            Some(std::time::Duration::from_secs(args.duration))
        } else {
            None
        };
        controller.run(duration).await?;
    }

    controller.stop().await?;

    let report = controller.report(args.scenario.clone()).await;
    info!(
        submissions = report.simulation.submissions,
        approved = report.simulation.approved,
        cancelled = report.desk.stale_cancellations,
        "Simulation complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
