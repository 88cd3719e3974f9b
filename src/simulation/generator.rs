//! Body seeding helpers and the random disc generator
//!
//! The disc is built around one heavy core body. The rest of the mass is
//! spread over lighter bodies whose placement and speed depend on their mass.
//! All randomness comes from a seeded `StdRng` so a scenario always produces
//! the same bodies.

use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::params::{MASS_MIN, ORBIT_SPEED_FACTOR, RADIUS_MIN};
use super::states::{BodyProps, NVec2};
use crate::configuration::config::GeneratorConfig;

/// Random point in the ring between `min_r` and `max_r` around the origin
pub fn random_vector<R: Rng + ?Sized>(rng: &mut R, max_r: f64, min_r: f64) -> NVec2 {
    let angle = rng.gen_range(0.0..TAU);
    let radius = if min_r < max_r {
        rng.gen_range(min_r..=max_r)
    } else {
        max_r
    };
    NVec2::new(radius * angle.cos(), radius * angle.sin())
}

/// Velocity for a circular-ish orbit around a parent body
///
/// Perpendicular to the direction of the parent, scaled by
/// `sqrt(g * parent_mass / dist)` and `ORBIT_SPEED_FACTOR`. A body sitting on
/// its parent just inherits the parent's velocity.
pub fn orbital_velocity(
    pos: &NVec2,
    parent_pos: &NVec2,
    parent_vel: &NVec2,
    parent_mass: f64,
    g: f64,
) -> NVec2 {
    let relative = pos - parent_pos;
    let dist = relative.norm();
    if dist <= 0.0 || !dist.is_finite() {
        return *parent_vel;
    }

    let speed = (g * parent_mass / dist).sqrt() * ORBIT_SPEED_FACTOR;
    let perpendicular = NVec2::new(relative.y, -relative.x) / dist;

    perpendicular * speed + parent_vel
}

/// Center of mass of two bodies
pub fn bary_center(a_pos: &NVec2, a_mass: f64, b_pos: &NVec2, b_mass: f64) -> NVec2 {
    let total = a_mass + b_mass;
    if total <= 0.0 {
        return (a_pos + b_pos) * 0.5;
    }
    b_pos + (a_pos - b_pos) * (a_mass / total)
}

fn lerp(from: &NVec2, to: &NVec2, t: f64) -> NVec2 {
    from + (to - from) * t
}

/// Bodies for a disc scenario
pub fn generate_disc(cfg: &GeneratorConfig, g: f64) -> Vec<BodyProps> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let [lo, hi] = cfg.mass_range;
    let (lo, hi) = (lo.min(hi), lo.max(hi));
    let pos_offset = NVec2::new(cfg.pos_offset[0], cfg.pos_offset[1]);
    let vel_offset = NVec2::new(cfg.vel_offset[0], cfg.vel_offset[1]);

    let mut total_mass = cfg.area_density * cfg.area_radius;
    let mut props: Vec<BodyProps> = Vec::new();
    let mut core_mass = 0.0;

    while total_mass > 0.0 && props.len() < cfg.max_body_count {
        let first = props.is_empty();

        if first && cfg.mass_core > 0.0 {
            let mass = (cfg.mass_core * total_mass).max(MASS_MIN);
            total_mass -= mass;
            core_mass = mass;
            props.push(BodyProps::new(mass, pos_offset, vel_offset));
            continue;
        }

        let mass = (if lo < hi { rng.gen_range(lo..hi) } else { lo }).max(MASS_MIN);
        total_mass -= mass;

        let mass_factor = if hi > lo { (mass - lo) / (hi - lo) } else { 0.0 };

        // positive balance pushes light bodies outwards, negative pushes heavy ones
        let edge_factor = if cfg.mass_edge_balance >= 0.0 {
            1.0 - mass_factor
        } else {
            mass_factor
        };
        let random_pos = random_vector(&mut rng, cfg.area_radius, RADIUS_MIN);
        let direction = random_pos.try_normalize(0.0).unwrap_or_else(NVec2::zeros);
        let mass_pos = direction * (edge_factor * cfg.area_radius);
        let pos = lerp(&random_pos, &mass_pos, cfg.mass_edge_balance.abs()) + pos_offset;

        let random_speed = if cfg.speed_max > 0.0 {
            rng.gen_range(0.0..cfg.speed_max)
        } else {
            0.0
        };
        let random_vel = random_vector(&mut rng, 1.0, 1.0) * random_speed;
        let orbit_vel = orbital_velocity(&pos, &pos_offset, &NVec2::zeros(), core_mass, g);

        let vel = lerp(&orbit_vel, &random_vel, 1.0 - cfg.direction) + vel_offset;

        props.push(BodyProps::new(mass, pos, vel));
    }

    // hand out whatever mass the count limit left over
    if total_mass > 0.0 && !props.is_empty() {
        let share = total_mass / props.len() as f64;
        for prop in props.iter_mut() {
            prop.mass += share;
        }
    }

    props
}
