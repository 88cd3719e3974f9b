pub mod error;
pub mod simulation;
pub mod configuration;
pub mod benchmark;

pub use error::{SimError, SimResult};

pub use simulation::states::{Body, BodyId, BodyProps, NVec2, Tick};
pub use simulation::params::{mass_from_radius, radius_from_mass, PhysicsSettings};
pub use simulation::cache::{BodyCache, CachedState};
pub use simulation::body_manager::{BodyManager, Destroyed, PhysicsBody, StepReport};
pub use simulation::worker::{
    FromWorker, InitMessage, InlineWorker, ThreadWorker, TickMessage, ToWorker, WorkerBackend,
    WorkerHandle, WorkerState,
};
pub use simulation::events::{ListenerId, SimulationEvent};
pub use simulation::engine::{BodyRecord, Simulation, SimulationRecord};
pub use simulation::generator::{bary_center, generate_disc, orbital_velocity, random_vector};
pub use simulation::scenario::Scenario;

pub use configuration::config::{BodyConfig, CacheConfig, GeneratorConfig, RunConfig, ScenarioConfig};

pub use benchmark::benchmark::{bench_body_manager, bench_cache, bench_tick_curve};
