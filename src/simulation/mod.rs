pub mod states;
pub mod params;
pub mod cache;
pub mod broad_phase;
pub mod collision;
pub mod forces;
pub mod integrator;
pub mod body_manager;
pub mod worker;
pub mod events;
pub mod engine;
pub mod generator;
pub mod scenario;
