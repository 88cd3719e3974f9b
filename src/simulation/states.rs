//! Core state types shared by the host and the worker.
//!
//! - `BodyProps` describes a body to be created
//! - `Body` is the host-side record of a body: its live values at the
//!   current tick plus its private tick cache

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::cache::{BodyCache, CachedState};
use super::params::{radius_from_mass, MASS_MIN};
use crate::error::{SimError, SimResult};

pub type NVec2 = Vector2<f64>;

/// Stable body identifier, assigned monotonically by the host
pub type BodyId = u64;

/// Discrete unit of simulated time
pub type Tick = u64;

/// Initial values for a new body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyProps {
    pub mass: f64,
    pub pos: [f64; 2],
    #[serde(default)]
    pub vel: [f64; 2],
}

impl BodyProps {
    pub fn new(mass: f64, pos: NVec2, vel: NVec2) -> Self {
        Self {
            mass,
            pos: [pos.x, pos.y],
            vel: [vel.x, vel.y],
        }
    }

    /// Body at rest
    pub fn at_rest(mass: f64, x: f64, y: f64) -> Self {
        Self::new(mass, NVec2::new(x, y), NVec2::zeros())
    }

    pub fn validate(&self) -> SimResult<()> {
        if !self.mass.is_finite() || self.mass < MASS_MIN {
            return Err(SimError::InvalidBody(format!(
                "mass must be a number above or equal to {MASS_MIN}, got {}",
                self.mass
            )));
        }
        if self.pos.iter().chain(self.vel.iter()).any(|v| !v.is_finite()) {
            return Err(SimError::InvalidBody("pos and vel must be finite".into()));
        }
        Ok(())
    }

    pub(crate) fn initial_state(&self) -> CachedState {
        CachedState {
            mass: self.mass,
            pos: NVec2::new(self.pos[0], self.pos[1]),
            vel: NVec2::new(self.vel[0], self.vel[1]),
            link: None,
        }
    }
}

/// Host-side body
///
/// `mass`, `pos`, `vel` and `link` hold the values at the simulation's
/// current tick. A mass of zero means the body does not exist at that tick
/// (not born yet, or already merged into another body).
#[derive(Debug, Clone)]
pub struct Body {
    id: BodyId,
    pub mass: f64,
    pub pos: NVec2,
    pub vel: NVec2,
    pub link: Option<BodyId>, // body this one is most attracted to
    merge: Option<BodyId>, // survivor of the collision that destroyed this body
    cache: BodyCache,
}

impl Body {
    pub(crate) fn new(id: BodyId, tick: Tick, props: &BodyProps) -> Self {
        let state = props.initial_state();
        Self {
            id,
            mass: state.mass,
            pos: state.pos,
            vel: state.vel,
            link: None,
            merge: None,
            cache: BodyCache::new(tick, &state),
        }
    }

    /// Body announced by the worker; its first snapshot follows in the stream
    pub(crate) fn unborn(id: BodyId, tick: Tick) -> Self {
        Self {
            id,
            mass: 0.0,
            pos: NVec2::zeros(),
            vel: NVec2::zeros(),
            link: None,
            merge: None,
            cache: BodyCache::empty(tick),
        }
    }

    pub fn id(&self) -> BodyId {
        self.id
    }

    pub fn radius(&self) -> f64 {
        if self.exists() {
            radius_from_mass(self.mass)
        } else {
            0.0
        }
    }

    pub fn exists(&self) -> bool {
        self.mass > 0.0
    }

    pub fn merge(&self) -> Option<BodyId> {
        self.merge
    }

    pub fn cache(&self) -> &BodyCache {
        &self.cache
    }

    pub(crate) fn cache_mut(&mut self) -> &mut BodyCache {
        &mut self.cache
    }

    pub(crate) fn set_merge(&mut self, merge: Option<BodyId>) {
        self.merge = merge;
    }

    /// Live values as a cache snapshot
    pub fn state(&self) -> CachedState {
        CachedState {
            mass: self.mass,
            pos: self.pos,
            vel: self.vel,
            link: self.link,
        }
    }

    /// Project the cached snapshot at `tick` onto the live fields
    pub(crate) fn apply_tick(&mut self, tick: Tick) {
        match self.cache.read(tick) {
            Some(state) => {
                self.mass = state.mass;
                self.pos = state.pos;
                self.vel = state.vel;
                self.link = state.link;
            }
            None => {
                self.mass = 0.0;
                self.link = None;
            }
        }
    }
}
