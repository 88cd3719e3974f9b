//! Two-tier Newtonian gravity
//!
//! Living bodies are split into real and pseudo bodies (see
//! `BodyManager::sort`). Only real bodies attract anything:
//! - real bodies feel every other real body, O(real * real)
//! - pseudo bodies feel every real body, O(pseudo * real)
//! - pseudo bodies never feel each other
//!
//! To keep the mass of a pseudo swarm from vanishing entirely, each pseudo
//! body hands its mass to the real body it is most attracted to. That
//! `pseudo_mass` is added to the real body's mass when it attracts others.

use super::body_manager::PhysicsBody;
use super::states::NVec2;

/// Summed pull on one body, and the body pulling hardest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attraction {
    pub force: NVec2,
    pub link: Option<usize>,
}

pub struct TwoTierGravity {
    pub g: f64, // gravitational constant
}

impl TwoTierGravity {
    pub fn new(g: f64) -> Self {
        Self { g }
    }

    /// Recompute `pseudo_mass`, `force` and `link` for every classified body
    ///
    /// Pseudo bodies go first so real bodies already carry their borrowed
    /// pseudo mass when forces are summed.
    pub fn accumulate(&self, bodies: &mut [PhysicsBody], real: &[usize], pseudo: &[usize]) {
        for &index in real.iter().chain(pseudo) {
            bodies[index].pseudo_mass = 0.0;
        }

        for &index in pseudo {
            let link = self.attraction(bodies, index, real, false).link;
            bodies[index].link = link;
            if let Some(link) = link {
                bodies[link].pseudo_mass += bodies[index].mass;
            }
        }

        for &index in pseudo.iter().chain(real) {
            let attraction = self.attraction(bodies, index, real, true);
            let body = &mut bodies[index];
            body.force = attraction.force;
            body.link = attraction.link;
        }
    }

    /// Pull of every real body on `bodies[index]`
    ///
    /// Ties on attraction keep the first real body encountered.
    pub fn attraction(
        &self,
        bodies: &[PhysicsBody],
        index: usize,
        real: &[usize],
        with_pseudo_mass: bool,
    ) -> Attraction {
        let body = &bodies[index];

        let mut force = NVec2::zeros();
        let mut link = None;
        let mut link_attraction = f64::NEG_INFINITY;

        for &other_index in real {
            if other_index == index {
                continue;
            }
            let other = &bodies[other_index];

            let relative = other.pos - body.pos;
            let dist_sqr = relative.norm_squared();
            // coincident bodies are left to the collision pass
            if dist_sqr <= 0.0 {
                continue;
            }

            let mass = if with_pseudo_mass {
                other.mass + other.pseudo_mass
            } else {
                other.mass
            };

            let attraction = self.g * mass / dist_sqr;
            if link_attraction < attraction {
                link_attraction = attraction;
                link = Some(other_index);
            }

            force += relative * (attraction / dist_sqr.sqrt());
        }

        Attraction { force, link }
    }
}
