use gravsim::{Scenario, ScenarioConfig, SimError};
use gravsim::{bench_body_manager, bench_cache, bench_tick_curve};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Gravitational n-body sandbox")]
struct Args {
    /// Scenario file. Bare names are looked up in `scenarios/`
    #[arg(short, long, default_value = "two_body.yaml")]
    file: String,

    /// Override the number of ticks to compute
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Write the final state as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Run the benchmarks instead of a scenario
    #[arg(long)]
    bench: bool,
}

// load here to keep main clean
fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let direct = PathBuf::from(file_name);
    let config_path = if direct.exists() {
        direct
    } else {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name)
    };

    let file = File::open(&config_path)
        .with_context(|| format!("failed to open scenario {}", config_path.display()))?;
    let reader = BufReader::new(file);
    let scenario_cfg: ScenarioConfig = serde_yaml::from_reader(reader)
        .with_context(|| format!("failed to parse scenario {}", config_path.display()))?;

    Ok(scenario_cfg)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.bench {
        bench_body_manager();
        bench_tick_curve();
        bench_cache();
        return Ok(());
    }

    let scenario_cfg = load_scenario_from_yaml(&args.file)?;
    let Scenario { mut simulation, ticks } = Scenario::build_scenario(&scenario_cfg)?;
    let ticks = args.ticks.unwrap_or(ticks);

    if ticks > 0 {
        match simulation.run_for_num_ticks(ticks, None) {
            Ok(_) => {}
            Err(SimError::CacheFull(tick)) => warn!(tick, "cache filled up before the run finished"),
            Err(e) => return Err(e.into()),
        }
    }

    simulation.set_current_tick(simulation.last_tick())?;

    let total_mass: f64 = simulation.living().map(|body| body.mass).sum();
    info!(
        last_tick = simulation.last_tick(),
        living = simulation.num_bodies(),
        total_mass,
        cache_mb = simulation.used_cache_memory(),
        "run finished"
    );

    if let Some(path) = args.json {
        std::fs::write(&path, simulation.to_json()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "state written");
    }

    Ok(())
}
