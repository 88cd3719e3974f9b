//! Authoritative body set for the integration worker
//!
//! `BodyManager` advances its bodies one emitted tick at a time:
//! 1. re-classify bodies into real / pseudo if a merge changed the ranking
//! 2. sum forces once for the tick (`forces`)
//! 3. for each physics sub-step: integrate, refresh the broad phase, and
//!    merge any overlapping pairs that actually touched
//!
//! Collisions are reported through the returned [`StepReport`] rather than
//! as callbacks, so the worker decides how to forward them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::broad_phase::{Bounds, SweepAndPrune};
use super::cache::encode_link;
use super::collision::{did_collide, merge_bodies};
use super::forces::TwoTierGravity;
use super::integrator::integrate_sub_step;
use super::params::{radius_from_mass, PhysicsSettings, STREAM_VALUES_PER_BODY};
use super::states::{BodyId, NVec2};

/// Worker-side body
#[derive(Debug, Clone)]
pub struct PhysicsBody {
    pub id: BodyId,
    pub mass: f64,
    pub pos: NVec2,
    pub vel: NVec2,
    pub force: NVec2, // summed once per emitted tick
    pub radius: f64,
    pub real: bool,
    pub pseudo_mass: f64, // mass handed over by pseudo bodies linked to this body
    pub link: Option<usize>, // slot of the body this one is most attracted to
    pub merge: Option<BodyId>, // survivor that absorbed this body
    pub bounds: Bounds,
}

impl PhysicsBody {
    pub fn new(id: BodyId, mass: f64, pos: NVec2, vel: NVec2) -> Self {
        Self {
            id,
            mass,
            pos,
            vel,
            force: NVec2::zeros(),
            radius: radius_from_mass(mass),
            real: true,
            pseudo_mass: 0.0,
            link: None,
            merge: None,
            bounds: Bounds::default(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.mass > 0.0
    }

    pub fn refresh_bounds(&mut self) {
        self.bounds.refresh(&self.pos, &self.vel, self.radius);
    }
}

/// A body destroyed by a merge, and the body that absorbed it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destroyed {
    pub id: BodyId,
    pub merge_id: BodyId,
}

/// What happened during one emitted tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub destroyed: Vec<Destroyed>,
}

#[derive(Debug, Default, Clone)]
pub struct BodyManager {
    bodies: Vec<PhysicsBody>, // every body ever given, indexed by slot
    living: Vec<usize>, // slots sorted by mass, heaviest first
    real: Vec<usize>,
    pseudo: Vec<usize>,
    destroyed: Vec<usize>,
    broad_phase: SweepAndPrune,
    needs_sort: bool,
}

impl BodyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole body set
    pub fn set_bodies(&mut self, bodies: Vec<PhysicsBody>, physics: &PhysicsSettings) {
        self.bodies = bodies;
        self.living = (0..self.bodies.len()).collect();
        self.destroyed.clear();
        self.broad_phase.clear();

        self.sort(physics);

        for &slot in &self.living {
            self.bodies[slot].refresh_bounds();
            self.broad_phase.insert(slot);
        }
    }

    /// Rank living bodies by mass and split them into real and pseudo bodies
    ///
    /// The heaviest `real_bodies_min` bodies are always real, and so is any
    /// body at or above `real_mass_threshold`. Destroyed bodies sink to the
    /// end of the ranking and are moved to the destroyed list.
    pub fn sort(&mut self, physics: &PhysicsSettings) {
        self.real.clear();
        self.pseudo.clear();
        self.needs_sort = false;

        if self.living.is_empty() {
            return;
        }

        let bodies = &self.bodies;
        self.living
            .sort_by(|&a, &b| bodies[b].mass.total_cmp(&bodies[a].mass));

        let min_real = physics.real_bodies_min.min(self.living.len());

        for (rank, &slot) in self.living.iter().enumerate() {
            let body = &mut self.bodies[slot];
            if !body.is_alive() {
                break;
            }

            body.real = rank < min_real || body.mass >= physics.real_mass_threshold;
            if body.real {
                self.real.push(slot);
            } else {
                self.pseudo.push(slot);
            }
        }

        while let Some(&slot) = self.living.last() {
            if self.bodies[slot].is_alive() {
                break;
            }
            self.living.pop();
            self.destroyed.push(slot);
        }
    }

    /// Refresh every living body's bounds and re-sort the edge lists
    pub fn update_overlaps(&mut self) {
        for &slot in &self.living {
            let body = &mut self.bodies[slot];
            if body.is_alive() {
                body.refresh_bounds();
            }
        }
        self.broad_phase.update(&self.bodies);
    }

    pub fn calculate_forces(&mut self, g: f64) {
        TwoTierGravity::new(g).accumulate(&mut self.bodies, &self.real, &self.pseudo);
    }

    pub fn apply_forces(&mut self, dt: f64) {
        integrate_sub_step(&mut self.bodies, &self.living, dt);
    }

    /// Narrow phase over the broad phase's overlapping pairs
    pub fn check_collisions(&mut self) -> Vec<Destroyed> {
        let mut destroyed = Vec::new();

        for (key, (a, b)) in self.broad_phase.pairs() {
            if !self.bodies[a].is_alive() || !self.bodies[b].is_alive() {
                self.broad_phase.remove_pair(&key);
                continue;
            }

            if !did_collide(&self.bodies[a], &self.bodies[b]) {
                continue;
            }

            self.broad_phase.remove_pair(&key);
            let merge = merge_bodies(&mut self.bodies, a, b);
            self.broad_phase.remove(merge.destroyed);
            self.needs_sort = true;

            let entry = Destroyed {
                id: self.bodies[merge.destroyed].id,
                merge_id: self.bodies[merge.survivor].id,
            };
            debug!(id = entry.id, merge_id = entry.merge_id, "bodies merged");
            destroyed.push(entry);
        }

        destroyed
    }

    /// Advance by one emitted tick
    pub fn step(&mut self, physics: &PhysicsSettings) -> StepReport {
        if self.needs_sort {
            self.sort(physics);
        }

        self.calculate_forces(physics.g);

        let dt = physics.sub_step_delta();
        let mut report = StepReport::default();
        for _ in 0..physics.physics_steps {
            self.apply_forces(dt);
            self.update_overlaps();
            report.destroyed.extend(self.check_collisions());
        }

        report
    }

    /// Flatten living bodies into `[id, mass, x, y, vx, vy, link, ...]`
    ///
    /// Bodies destroyed during the last tick are still ranked as living until
    /// the next sort, so their final zero-mass state is included once.
    pub fn stream(&self) -> Vec<f64> {
        let mut stream = Vec::with_capacity(self.living.len() * STREAM_VALUES_PER_BODY);
        for &slot in &self.living {
            let body = &self.bodies[slot];
            let link = body.link.map(|link| self.bodies[link].id);
            stream.extend_from_slice(&[
                body.id as f64,
                body.mass,
                body.pos.x,
                body.pos.y,
                body.vel.x,
                body.vel.y,
                encode_link(link),
            ]);
        }
        stream
    }

    pub fn bodies(&self) -> &[PhysicsBody] {
        &self.bodies
    }

    pub fn body(&self, id: BodyId) -> Option<&PhysicsBody> {
        self.bodies.iter().find(|body| body.id == id)
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut PhysicsBody> {
        self.bodies.iter_mut().find(|body| body.id == id)
    }

    pub fn living(&self) -> impl Iterator<Item = &PhysicsBody> + '_ {
        self.living
            .iter()
            .map(|&slot| &self.bodies[slot])
            .filter(|body| body.is_alive())
    }

    pub fn real(&self) -> impl Iterator<Item = &PhysicsBody> + '_ {
        self.real.iter().map(|&slot| &self.bodies[slot])
    }

    pub fn pseudo(&self) -> impl Iterator<Item = &PhysicsBody> + '_ {
        self.pseudo.iter().map(|&slot| &self.bodies[slot])
    }

    pub fn destroyed(&self) -> impl Iterator<Item = &PhysicsBody> + '_ {
        self.destroyed.iter().map(|&slot| &self.bodies[slot])
    }

    /// Id of the body `id` was most attracted to during the last force pass
    pub fn link_of(&self, id: BodyId) -> Option<BodyId> {
        self.body(id)
            .and_then(|body| body.link)
            .map(|slot| self.bodies[slot].id)
    }

    pub fn broad_phase(&self) -> &SweepAndPrune {
        &self.broad_phase
    }
}
