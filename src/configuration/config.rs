//! Configuration types for loading sandbox scenarios from YAML.
//!
//! A scenario consists of:
//!
//! - [`PhysicsSettings`] – gravitational constant, sub-steps and the real/pseudo split
//! - [`CacheConfig`]     – memory ceiling for cached history
//! - [`RunConfig`]       – how many ticks to compute and which worker backend to use
//! - [`BodyConfig`]      – initial state for each explicit body
//! - [`GeneratorConfig`] – optional random disc added on top of the explicit bodies
//!
//! # YAML format
//!
//! ```yaml
//! physics:
//!   g: 1.0
//!   physics_steps: 4
//!   real_mass_threshold: 100.0
//!   real_bodies_min: 0
//!
//! cache:
//!   max_memory_mb: 64
//!
//! run:
//!   ticks: 600
//!   backend: thread        # or "inline"
//!
//! bodies:
//!   - x: [ 0.0, 0.0 ]
//!     v: [ 0.0, 0.0 ]
//!     m: 1000.0
//!   - x: [ 20.0, 0.0 ]
//!     m: 500.0             # v defaults to zero
//!
//! generator:               # every field is optional
//!   area_radius: 500
//!   seed: 42
//! ```
//!
//! Omitted sections fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::simulation::params::{PhysicsSettings, DEFAULT_MAX_MB};
use crate::simulation::states::BodyProps;
use crate::simulation::worker::WorkerBackend;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_memory_mb: f64, // ceiling for all cached ticks
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: DEFAULT_MAX_MB,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct RunConfig {
    pub ticks: u64, // ticks computed by the command line runner
    pub backend: WorkerBackend,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ticks: 600,
            backend: WorkerBackend::Thread,
        }
    }
}

/// Configuration for a single body's initial state
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BodyConfig {
    pub x: Vec<f64>, // position
    #[serde(default)]
    pub v: Vec<f64>, // velocity, at rest when omitted
    pub m: f64,      // mass
}

impl BodyConfig {
    pub fn to_props(&self) -> SimResult<BodyProps> {
        let pos = vec2(&self.x, "x")?;
        let vel = if self.v.is_empty() {
            [0.0, 0.0]
        } else {
            vec2(&self.v, "v")?
        };

        let props = BodyProps {
            mass: self.m,
            pos,
            vel,
        };
        props.validate()?;
        Ok(props)
    }
}

fn vec2(values: &[f64], name: &str) -> SimResult<[f64; 2]> {
    match values {
        [x, y] => Ok([*x, *y]),
        _ => Err(SimError::InvalidBody(format!(
            "`{name}` must hold exactly 2 values, got {}",
            values.len()
        ))),
    }
}

/// Random disc of bodies orbiting a heavy core
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub area_radius: f64, // radius of the disc
    pub area_density: f64, // total mass is area_density * area_radius
    pub max_body_count: usize,
    pub mass_range: [f64; 2], // mass range of the non core bodies
    pub mass_edge_balance: f64, // 1 = light bodies on the edge, 0 = even, -1 = heavy bodies on the edge
    pub mass_core: f64, // share of the total mass given to the core body
    pub speed_max: f64, // upper bound of the random velocity component
    pub direction: f64, // 1 = orbit the core, 0 = random direction
    pub pos_offset: [f64; 2],
    pub vel_offset: [f64; 2],
    pub seed: u64, // deterministic seed to make runs reproducible
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            area_radius: 500.0,
            area_density: 500.0,
            max_body_count: 1500,
            mass_range: [100.0, 1000.0],
            mass_edge_balance: 0.9,
            mass_core: 0.9,
            speed_max: 2.5,
            direction: 0.8,
            pos_offset: [0.0, 0.0],
            vel_offset: [0.0, 0.0],
            seed: 42,
        }
    }
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ScenarioConfig {
    pub physics: PhysicsSettings,
    pub cache: CacheConfig,
    pub run: RunConfig,
    pub bodies: Vec<BodyConfig>,
    pub generator: Option<GeneratorConfig>,
}
