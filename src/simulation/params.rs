//! Physical parameters and engine constants
//!
//! `PhysicsSettings` is fixed for the lifetime of a simulation:
//! - gravitational constant `g`,
//! - number of integration sub-steps per emitted tick,
//! - the two tunables that split bodies into real and pseudo bodies

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Minimum mass a body can be created with
pub const MASS_MIN: f64 = 1.0;

/// Radius of a body at `MASS_MIN`
pub const RADIUS_MIN: f64 = 1.0;

/// Scales radius growth against the cube root of mass
pub const RADIUS_FACTOR: f64 = 1.0;

/// 60 ticks equals one second
pub const TICK_DURATION: f64 = 1.0 / 60.0;

/// Link id stored in the cache when a body is not attracted to anything
pub const NO_LINK: f64 = -1.0;

/// mass, pos.x, pos.y, vel.x, vel.y, link
pub const CACHED_VALUES_PER_TICK: usize = 6;

/// id followed by the cached values
pub const STREAM_VALUES_PER_BODY: usize = CACHED_VALUES_PER_TICK + 1;

/// Bytes per cached number
pub const NUMBER_SIZE: usize = 8;

pub const ONE_MB: usize = 1024 * 1024;

pub const DEFAULT_MAX_MB: f64 = 256.0;

/// Below this squared relative speed two bodies are tested with plain distance
pub const RELATIVE_VELOCITY_EPSILON: f64 = 1.0;

/// Empirical scaling applied to seeded orbital speeds. Tuned for feel only
pub const ORBIT_SPEED_FACTOR: f64 = 0.1;

/// Settings shared by the host and the worker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    pub g: f64, // gravitational constant
    pub physics_steps: u32, // sub-steps per emitted tick
    pub real_mass_threshold: f64, // bodies at or above this mass are always real
    pub real_bodies_min: usize, // heaviest N bodies are always real
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            g: 1.0,
            physics_steps: 4,
            real_mass_threshold: 10.0,
            real_bodies_min: usize::MAX,
        }
    }
}

impl PhysicsSettings {
    /// Reject settings the integrator cannot work with
    pub fn validate(&self) -> SimResult<()> {
        if !self.g.is_finite() || self.g <= 0.0 {
            return Err(SimError::InvalidSettings(format!(
                "g must be a finite number above zero, got {}",
                self.g
            )));
        }
        if self.physics_steps == 0 {
            return Err(SimError::InvalidSettings(
                "physics_steps must be a whole number above zero".into(),
            ));
        }
        if self.real_mass_threshold.is_nan() || self.real_mass_threshold < 0.0 {
            return Err(SimError::InvalidSettings(format!(
                "real_mass_threshold must not be negative, got {}",
                self.real_mass_threshold
            )));
        }
        Ok(())
    }

    /// Length of one integration sub-step
    pub fn sub_step_delta(&self) -> f64 {
        TICK_DURATION / self.physics_steps as f64
    }
}

/// Radius of a body with the given mass
pub fn radius_from_mass(mass: f64) -> f64 {
    RADIUS_MIN + (mass - MASS_MIN).cbrt() * RADIUS_FACTOR
}

/// Inverse of [`radius_from_mass`]
pub fn mass_from_radius(radius: f64) -> f64 {
    ((radius - RADIUS_MIN) / RADIUS_FACTOR).powi(3) + MASS_MIN
}
