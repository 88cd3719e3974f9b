//! Build a ready-to-run simulation from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces a `Scenario`:
//! - a `Simulation` holding every configured body at tick 0
//! - the number of ticks the runner should compute

use tracing::info;

use crate::configuration::config::ScenarioConfig;
use crate::error::SimResult;
use crate::simulation::engine::Simulation;
use crate::simulation::generator::generate_disc;
use crate::simulation::states::BodyProps;

pub struct Scenario {
    pub simulation: Simulation,
    pub ticks: u64,
}

impl Scenario {
    pub fn build_scenario(cfg: &ScenarioConfig) -> SimResult<Self> {
        let mut simulation = Simulation::new(cfg.physics, cfg.cache.max_memory_mb)?
            .with_backend(cfg.run.backend);

        // explicit bodies first so their ids follow the file order
        let mut props = cfg
            .bodies
            .iter()
            .map(|body| body.to_props())
            .collect::<SimResult<Vec<BodyProps>>>()?;

        if let Some(generator) = &cfg.generator {
            props.extend(generate_disc(generator, cfg.physics.g));
        }

        if !props.is_empty() {
            simulation.create_bodies(&props, Some(0))?;
        }

        info!(
            bodies = props.len(),
            ticks = cfg.run.ticks,
            "scenario built"
        );

        Ok(Self {
            simulation,
            ticks: cfg.run.ticks,
        })
    }
}
