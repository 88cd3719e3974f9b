//! Narrow phase collision test and inelastic merging

use super::body_manager::PhysicsBody;
use super::params::{radius_from_mass, RELATIVE_VELOCITY_EPSILON};
use super::states::NVec2;

/// Closest point to `point` on the segment `start..end`
pub fn closest_point_on_segment(start: &NVec2, end: &NVec2, point: &NVec2) -> NVec2 {
    let segment = end - start;
    let length_sqr = segment.norm_squared();
    if length_sqr == 0.0 {
        return *start;
    }

    let t = ((point - start).dot(&segment) / length_sqr).clamp(0.0, 1.0);
    *start + segment * t
}

/// Did two bodies touch during the last sub-step?
///
/// Works in the frame of the slower body: the faster one travelled from
/// `pos - relative_vel` to `pos`, and the slower body is tested against
/// that whole segment so fast bodies cannot tunnel through each other.
/// Nearly equal velocities fall back to a plain distance check, where the
/// segment would be too short to be numerically useful.
pub fn did_collide(a: &PhysicsBody, b: &PhysicsBody) -> bool {
    let (fast, slow) = if b.vel.norm_squared() > a.vel.norm_squared() {
        (b, a)
    } else {
        (a, b)
    };

    let relative = fast.vel - slow.vel;

    let dist = if relative.norm_squared() < RELATIVE_VELOCITY_EPSILON {
        (fast.pos - slow.pos).norm()
    } else {
        let start = fast.pos - relative;
        let closest = closest_point_on_segment(&start, &fast.pos, &slow.pos);
        (closest - slow.pos).norm()
    };

    dist < fast.radius + slow.radius
}

/// Result of merging two bodies, as slots into the body list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merge {
    pub survivor: usize,
    pub destroyed: usize,
}

/// Perfectly inelastic merge: the heavier body absorbs the lighter one
///
/// Position and velocity of the survivor become the mass-weighted average of
/// both bodies. On equal mass the body at slot `a` survives.
pub fn merge_bodies(bodies: &mut [PhysicsBody], a: usize, b: usize) -> Merge {
    let (big, small) = if bodies[b].mass > bodies[a].mass {
        (b, a)
    } else {
        (a, b)
    };

    let small_mass = bodies[small].mass;
    let small_pos = bodies[small].pos;
    let small_vel = bodies[small].vel;

    let survivor = &mut bodies[big];
    let total_mass = survivor.mass + small_mass;

    survivor.pos = (survivor.pos * survivor.mass + small_pos * small_mass) / total_mass;
    survivor.vel = (survivor.vel * survivor.mass + small_vel * small_mass) / total_mass;
    survivor.mass = total_mass;
    survivor.radius = radius_from_mass(total_mass);
    let survivor_id = survivor.id;

    let destroyed = &mut bodies[small];
    destroyed.mass = 0.0;
    destroyed.radius = 0.0;
    destroyed.link = None;
    destroyed.merge = Some(survivor_id);

    Merge {
        survivor: big,
        destroyed: small,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn body(id: u64, mass: f64, pos: (f64, f64), vel: (f64, f64)) -> PhysicsBody {
        PhysicsBody::new(id, mass, NVec2::new(pos.0, pos.1), NVec2::new(vel.0, vel.1))
    }

    #[test]
    fn closest_point_clamps_to_segment() {
        let start = NVec2::new(0.0, 0.0);
        let end = NVec2::new(10.0, 0.0);

        let mid = closest_point_on_segment(&start, &end, &NVec2::new(4.0, 3.0));
        assert_relative_eq!(mid.x, 4.0);
        assert_relative_eq!(mid.y, 0.0);

        let before = closest_point_on_segment(&start, &end, &NVec2::new(-5.0, 1.0));
        assert_eq!(before, start);

        let after = closest_point_on_segment(&start, &end, &NVec2::new(15.0, -1.0));
        assert_eq!(after, end);
    }

    #[test]
    fn swept_test_catches_tunneling() {
        // moved from x = -30 to x = 30 in one step, straight through the other body
        let fast = body(0, 1.0, (30.0, 0.0), (60.0, 0.0));
        let slow = body(1, 1.0, (0.0, 0.0), (0.0, 0.0));
        assert!(did_collide(&fast, &slow));
        assert!(did_collide(&slow, &fast));

        let passing = body(2, 1.0, (30.0, 10.0), (60.0, 0.0));
        assert!(!did_collide(&passing, &slow));
    }

    #[test]
    fn slow_bodies_use_distance() {
        let a = body(0, 1000.0, (0.0, 0.0), (0.1, 0.0));
        let b = body(1, 500.0, (19.0, 0.0), (0.0, 0.0));
        assert!(did_collide(&a, &b));

        let far = body(2, 500.0, (40.0, 0.0), (0.0, 0.0));
        assert!(!did_collide(&a, &far));
    }

    #[test]
    fn merge_conserves_mass_and_momentum() {
        let mut bodies = vec![
            body(0, 500.0, (20.0, 0.0), (0.0, 3.0)),
            body(1, 1000.0, (0.0, 0.0), (0.0, 0.0)),
        ];

        let merge = merge_bodies(&mut bodies, 0, 1);
        assert_eq!(merge, Merge { survivor: 1, destroyed: 0 });

        let big = &bodies[1];
        assert_eq!(big.mass, 1500.0);
        assert_relative_eq!(big.pos.x, 20.0 * 500.0 / 1500.0);
        assert_relative_eq!(big.vel.y, 3.0 * 500.0 / 1500.0);
        assert_relative_eq!(big.radius, radius_from_mass(1500.0));

        let small = &bodies[0];
        assert_eq!(small.mass, 0.0);
        assert_eq!(small.merge, Some(1));
    }
}
