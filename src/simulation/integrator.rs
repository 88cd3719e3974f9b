//! Fixed-step integrator for the worker's bodies
//!
//! Forces are summed once per emitted tick and reused by every sub-step,
//! trading some precision for a force pass per tick instead of per sub-step.

use super::body_manager::PhysicsBody;

/// Advance one body by one sub-step
///
/// Averages the current velocity with the velocity after the kick:
/// `vel = (vel + (vel + force * dt)) / 2`, then drifts `pos += vel`.
pub fn quasi_verlet_step(body: &mut PhysicsBody, dt: f64) {
    let kicked = body.vel + body.force * dt;
    body.vel = (body.vel + kicked) * 0.5;
    body.pos += body.vel;
}

/// Advance every living body in `slots` by one sub-step
pub fn integrate_sub_step(bodies: &mut [PhysicsBody], slots: &[usize], dt: f64) {
    for &slot in slots {
        let body = &mut bodies[slot];
        // merged away earlier this tick
        if !body.is_alive() {
            continue;
        }
        quasi_verlet_step(body, dt);
    }
}
