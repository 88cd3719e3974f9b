use approx::assert_relative_eq;

use gravsim::simulation::body_manager::{BodyManager, Destroyed, PhysicsBody};
use gravsim::simulation::params::{radius_from_mass, PhysicsSettings};
use gravsim::simulation::states::NVec2;
use gravsim::simulation::worker::{
    FromWorker, InitMessage, InlineWorker, ToWorker, WorkerHandle, WorkerState,
};
use gravsim::SimError;

/// Body at rest
pub fn body(id: u64, mass: f64, x: f64, y: f64) -> PhysicsBody {
    PhysicsBody::new(id, mass, NVec2::new(x, y), NVec2::zeros())
}

/// Physics with the real / pseudo split enabled
pub fn split_params(threshold: f64, min: usize) -> PhysicsSettings {
    PhysicsSettings {
        real_mass_threshold: threshold,
        real_bodies_min: min,
        ..PhysicsSettings::default()
    }
}

/// Build a manager and classify its bodies
pub fn manager_with(bodies: Vec<PhysicsBody>, physics: &PhysicsSettings) -> BodyManager {
    let mut manager = BodyManager::new();
    manager.set_bodies(bodies, physics);
    manager
}

fn total_mass(manager: &BodyManager) -> f64 {
    manager.bodies().iter().map(|body| body.mass).sum()
}

// ==================================================================================
// Classification tests
// ==================================================================================

#[test]
fn classification_by_threshold() {
    let physics = split_params(100.0, 0);
    let manager = manager_with(
        vec![
            body(0, 50.0, 0.0, 0.0),
            body(1, 200.0, 100.0, 0.0),
            body(2, 150.0, 200.0, 0.0),
            body(3, 99.0, 300.0, 0.0),
            body(4, 100.0, 400.0, 0.0),
        ],
        &physics,
    );

    let mut real: Vec<u64> = manager.real().map(|b| b.id).collect();
    real.sort();
    assert_eq!(real, vec![1, 2, 4]);

    let mut pseudo: Vec<u64> = manager.pseudo().map(|b| b.id).collect();
    pseudo.sort();
    assert_eq!(pseudo, vec![0, 3]);
    assert!(manager.pseudo().all(|b| !b.real));
}

#[test]
fn classification_by_minimum_count() {
    let physics = split_params(1.0e9, 2);
    let manager = manager_with(
        vec![
            body(0, 10.0, 0.0, 0.0),
            body(1, 30.0, 100.0, 0.0),
            body(2, 20.0, 200.0, 0.0),
        ],
        &physics,
    );

    let real: Vec<u64> = manager.real().map(|b| b.id).collect();
    assert_eq!(real, vec![1, 2], "heaviest first");
    assert_eq!(manager.pseudo().count(), 1);
}

#[test]
fn default_physics_keeps_every_body_real() {
    let physics = PhysicsSettings::default();
    let manager = manager_with(
        vec![
            body(0, 2.0, 0.0, 0.0),
            body(1, 5.0, 100.0, 0.0),
            body(2, 500.0, 200.0, 0.0),
        ],
        &physics,
    );

    // below the mass threshold, but the minimum count covers everything
    assert_eq!(manager.real().count(), 3);
    assert_eq!(manager.pseudo().count(), 0);
}

#[test]
fn classification_invariant_holds() {
    let masses = [10.0, 50.0, 75.0, 120.0, 300.0];

    for min in 0..7 {
        for threshold in [0.0, 60.0, 120.0, 1.0e9] {
            let physics = split_params(threshold, min);
            let bodies = masses
                .iter()
                .enumerate()
                .map(|(i, &m)| body(i as u64, m, i as f64 * 100.0, 0.0))
                .collect();
            let manager = manager_with(bodies, &physics);

            let heavy = masses.iter().filter(|&&m| m >= threshold).count();
            let expected = heavy.max(min).min(masses.len());
            assert_eq!(
                manager.real().count(),
                expected,
                "min = {min}, threshold = {threshold}"
            );
            assert_eq!(manager.real().count() + manager.pseudo().count(), masses.len());
        }
    }
}

// ==================================================================================
// Gravity tests
// ==================================================================================

#[test]
fn real_bodies_attract_each_other() {
    let physics = PhysicsSettings::default();
    let mut manager = manager_with(
        vec![body(0, 1000.0, 0.0, 0.0), body(1, 1000.0, 100.0, 0.0)],
        &physics,
    );
    manager.calculate_forces(physics.g);

    let a = manager.body(0).unwrap();
    let b = manager.body(1).unwrap();

    assert_relative_eq!(a.force.x, 0.1, epsilon = 1e-12);
    assert_relative_eq!(b.force.x, -0.1, epsilon = 1e-12);
    assert_relative_eq!(a.force.y, 0.0);

    assert_eq!(manager.link_of(0), Some(1));
    assert_eq!(manager.link_of(1), Some(0));
}

#[test]
fn gravity_inverse_square_law() {
    let physics = PhysicsSettings::default();

    let mut near = manager_with(
        vec![body(0, 10.0, 0.0, 0.0), body(1, 10.0, 50.0, 0.0)],
        &physics,
    );
    let mut far = manager_with(
        vec![body(0, 10.0, 0.0, 0.0), body(1, 10.0, 100.0, 0.0)],
        &physics,
    );
    near.calculate_forces(physics.g);
    far.calculate_forces(physics.g);

    let ratio = near.body(0).unwrap().force.norm() / far.body(0).unwrap().force.norm();
    assert_relative_eq!(ratio, 4.0, epsilon = 1e-9);
}

#[test]
fn pseudo_body_inherits_nothing_but_lends_mass() {
    let physics = split_params(100.0, 0);
    let mut manager = manager_with(
        vec![body(0, 1000.0, 0.0, 0.0), body(1, 99.0, 50.0, 0.0)],
        &physics,
    );
    manager.calculate_forces(physics.g);

    let real = manager.body(0).unwrap();
    let pseudo = manager.body(1).unwrap();

    // the pseudo body does not pull on the real one
    assert_eq!(real.force, NVec2::zeros());
    assert_eq!(real.pseudo_mass, 99.0);
    assert_eq!(manager.link_of(1), Some(0));
    assert_eq!(manager.link_of(0), None);

    // but feels the real body together with the mass it lent
    assert_relative_eq!(pseudo.force.x, -(1000.0 + 99.0) / 2500.0, epsilon = 1e-12);
}

#[test]
fn pseudo_bodies_ignore_each_other() {
    let physics = split_params(100.0, 0);
    let mut manager = manager_with(
        vec![body(0, 10.0, 0.0, 0.0), body(1, 10.0, 30.0, 0.0)],
        &physics,
    );
    assert_eq!(manager.real().count(), 0);

    for _ in 0..60 {
        manager.step(&physics);
    }

    assert_eq!(manager.body(0).unwrap().pos, NVec2::new(0.0, 0.0));
    assert_eq!(manager.body(1).unwrap().pos, NVec2::new(30.0, 0.0));
}

#[test]
fn pseudo_body_falls_towards_still_real_body() {
    let physics = split_params(100.0, 0);
    let mut manager = manager_with(
        vec![body(0, 1000.0, 0.0, 0.0), body(1, 99.0, 50.0, 0.0)],
        &physics,
    );

    let mut last_dist = 50.0;
    for _ in 0..10 {
        let report = manager.step(&physics);
        assert!(report.destroyed.is_empty());

        let real = manager.body(0).unwrap();
        let pseudo = manager.body(1).unwrap();
        let dist = (pseudo.pos - real.pos).norm();

        assert_eq!(real.pos, NVec2::zeros(), "real body moved");
        assert!(dist < last_dist, "pseudo body did not get closer");
        last_dist = dist;
    }
}

// ==================================================================================
// Integrator tests
// ==================================================================================

#[test]
fn lone_body_drifts_one_velocity_per_sub_step() {
    let physics = PhysicsSettings::default();
    let mut manager = manager_with(
        vec![PhysicsBody::new(0, 10.0, NVec2::zeros(), NVec2::new(1.0, -0.5))],
        &physics,
    );

    manager.step(&physics);

    let lone = manager.body(0).unwrap();
    let steps = physics.physics_steps as f64;
    assert_relative_eq!(lone.pos.x, steps);
    assert_relative_eq!(lone.pos.y, -0.5 * steps);
    assert_eq!(lone.vel, NVec2::new(1.0, -0.5));
}

// ==================================================================================
// Broad phase tests
// ==================================================================================

#[test]
fn overlaps_are_added_and_removed() {
    let physics = PhysicsSettings::default();
    let mut manager = manager_with(
        vec![body(0, 1000.0, 0.0, 0.0), body(1, 1000.0, 25.0, 0.0)],
        &physics,
    );

    manager.update_overlaps();
    assert!(manager.broad_phase().is_empty());

    manager.body_mut(1).unwrap().pos = NVec2::new(15.0, 0.0);
    manager.update_overlaps();
    assert!(manager.broad_phase().contains(&(0, 1)));

    manager.body_mut(1).unwrap().pos = NVec2::new(25.0, 0.0);
    manager.update_overlaps();
    assert!(!manager.broad_phase().contains(&(0, 1)));

    // moving boxes grow towards where they came from
    manager.body_mut(1).unwrap().pos = NVec2::new(40.0, 10.0);
    manager.body_mut(1).unwrap().vel = NVec2::new(20.0, 10.0);
    manager.update_overlaps();
    assert!(manager.broad_phase().contains(&(0, 1)));
}

#[test]
fn initially_overlapping_bodies_are_found() {
    let physics = PhysicsSettings::default();
    let mut manager = manager_with(
        vec![body(0, 1000.0, 0.0, 0.0), body(1, 500.0, 5.0, 5.0)],
        &physics,
    );

    manager.update_overlaps();
    assert_eq!(manager.broad_phase().len(), 1);
}

// ==================================================================================
// Collision tests
// ==================================================================================

#[test]
fn overlapping_bodies_merge_and_lose_their_edges() {
    let physics = PhysicsSettings::default();
    let mut manager = manager_with(
        vec![body(0, 1000.0, 0.0, 0.0), body(1, 500.0, 5.0, 0.0)],
        &physics,
    );
    assert_eq!(manager.broad_phase().edge_count(), 8);

    let report = manager.step(&physics);
    assert_eq!(report.destroyed, vec![Destroyed { id: 1, merge_id: 0 }]);

    let big = manager.body(0).unwrap();
    assert_eq!(big.mass, 1500.0);
    assert_relative_eq!(big.radius, radius_from_mass(1500.0));

    let small = manager.body(1).unwrap();
    assert_eq!(small.mass, 0.0);
    assert_eq!(small.merge, Some(0));
    assert_eq!(manager.broad_phase().edge_count(), 4);

    // the destroyed body is streamed once with zero mass, then dropped
    assert_eq!(manager.stream().len(), 14);
    manager.step(&physics);
    assert_eq!(manager.stream().len(), 7);
    assert_eq!(manager.destroyed().map(|b| b.id).collect::<Vec<_>>(), vec![1]);
}

#[test]
fn mass_is_conserved_through_merges() {
    let physics = PhysicsSettings::default();
    let bodies = (0..6)
        .map(|i| body(i, 100.0 + i as f64, i as f64 * 12.0, (i % 2) as f64 * 3.0))
        .collect();
    let mut manager = manager_with(bodies, &physics);
    let before = total_mass(&manager);

    let mut merges = 0;
    for _ in 0..120 {
        merges += manager.step(&physics).destroyed.len();
        assert_relative_eq!(total_mass(&manager), before, epsilon = 1e-9);
    }

    assert!(merges > 0, "bodies this close should merge");
    assert_eq!(manager.living().count() + merges, 6);
}

#[test]
fn fast_bodies_do_not_tunnel() {
    let physics = PhysicsSettings {
        physics_steps: 1,
        ..PhysicsSettings::default()
    };
    let mut manager = manager_with(
        vec![
            body(0, 1000.0, 0.0, 0.0),
            PhysicsBody::new(1, 10.0, NVec2::new(-100.0, 0.0), NVec2::new(200.0, 0.0)),
        ],
        &physics,
    );

    let report = manager.step(&physics);

    // jumped from x = -100 to x = 100 in one sub-step, straight through body 0
    assert_eq!(report.destroyed, vec![Destroyed { id: 1, merge_id: 0 }]);
    assert_eq!(manager.body(0).unwrap().mass, 1010.0);
}

// ==================================================================================
// Worker tests
// ==================================================================================

#[test]
fn worker_rejects_malformed_init() {
    let physics = PhysicsSettings::default();

    let empty = InitMessage { physics, bodies: vec![] };
    assert!(matches!(WorkerState::new(&empty), Err(SimError::MalformedMessage(_))));

    let short = InitMessage {
        physics,
        bodies: vec![1.0, 0.0, 10.0, 0.0, 0.0, 0.0],
    };
    assert!(matches!(WorkerState::new(&short), Err(SimError::MalformedMessage(_))));

    let bad_id = InitMessage {
        physics,
        bodies: vec![1.0, -3.0, 10.0, 0.0, 0.0, 0.0, 0.0],
    };
    assert!(matches!(WorkerState::new(&bad_id), Err(SimError::MalformedMessage(_))));

    let bad_physics = InitMessage {
        physics: PhysicsSettings { g: 0.0, ..physics },
        bodies: vec![1.0, 0.0, 10.0, 0.0, 0.0, 0.0, 0.0],
    };
    assert!(matches!(WorkerState::new(&bad_physics), Err(SimError::InvalidSettings(_))));
}

#[test]
fn worker_streams_every_living_body() {
    let init = InitMessage {
        physics: PhysicsSettings::default(),
        bodies: vec![
            2.0, // next id
            0.0, 1000.0, 0.0, 0.0, 0.0, 0.0, //
            1.0, 10.0, 300.0, 0.0, 0.0, 0.0,
        ],
    };
    let mut state = WorkerState::new(&init).unwrap();

    let tick = state.tick();
    assert_eq!(tick.next_assign_id, 2);
    assert!(tick.destroyed.is_empty());
    assert!(tick.created.is_empty());
    assert_eq!(tick.stream.len(), 14);

    // heaviest first, each linked to the other
    assert_eq!(tick.stream[0], 0.0);
    assert_eq!(tick.stream[6], 1.0);
    assert_eq!(tick.stream[7], 1.0);
    assert_eq!(tick.stream[13], 0.0);
}

#[test]
fn inline_worker_reports_failure() {
    let mut worker = InlineWorker::new();
    worker
        .send(ToWorker::Init(InitMessage {
            physics: PhysicsSettings::default(),
            bodies: vec![0.0, 1.0],
        }))
        .unwrap();

    assert!(matches!(worker.recv(), Ok(FromWorker::Failed(_))));
    assert!(matches!(worker.try_recv(), Ok(None)));
}

#[test]
fn inline_worker_stops() {
    let mut worker = InlineWorker::new();
    worker
        .send(ToWorker::Init(InitMessage {
            physics: PhysicsSettings::default(),
            bodies: vec![1.0, 0.0, 10.0, 0.0, 0.0, 0.0, 0.0],
        }))
        .unwrap();

    assert!(matches!(worker.try_recv(), Ok(Some(FromWorker::Tick(_)))));
    worker.send(ToWorker::Stop).unwrap();
    assert!(matches!(worker.try_recv(), Ok(None)));
}
