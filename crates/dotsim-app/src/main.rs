use std::io::Write;

use anyhow::Result;
use clap::Parser;
use dotsim_core::{DotConfig, DotWorld};
use tracing::info;

/// Headless driver: steps a dot world and prints one snapshot JSON line per
/// tick for downstream consumers to draw or analyse.
#[derive(Debug, Parser)]
#[command(name = "dotsim", about = "Run a headless dot simulation")]
struct Args {
    /// Number of dots to simulate.
    #[arg(long, default_value_t = 10)]
    dots: usize,

    /// Target-assignment mode index (taken modulo the mode count).
    #[arg(long, default_value_t = 1)]
    mode: usize,

    /// Waypoint ring size.
    #[arg(long, default_value_t = 7)]
    waypoints: usize,

    /// Fixed timestep in seconds.
    #[arg(long, default_value_t = 1.0 / 60.0)]
    dt: f32,

    /// Number of ticks to run before exiting.
    #[arg(long, default_value_t = 600)]
    ticks: u64,

    /// RNG seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Override every dot's max speed after construction.
    #[arg(long)]
    speed: Option<f32>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = DotConfig {
        dot_count: args.dots,
        dt: args.dt,
        mode: args.mode,
        waypoint_count: args.waypoints,
        rng_seed: args.seed,
        ..DotConfig::default()
    };
    let mut world = DotWorld::new(config)?;
    if let Some(speed) = args.speed {
        world.set_speed(speed);
    }
    info!(
        dots = world.dot_count(),
        mode = ?world.mode(),
        ticks = args.ticks,
        "starting dotsim run",
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for _ in 0..args.ticks {
        world.step();
        serde_json::to_writer(&mut out, &world.snapshot())?;
        out.write_all(b"\n")?;
    }

    if let Some(summary) = world.history().last() {
        info!(
            tick = summary.tick.0,
            avg_illness = summary.average_illness,
            max_illness = summary.max_illness,
            "run complete",
        );
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
