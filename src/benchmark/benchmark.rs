use std::time::Instant;

use crate::simulation::body_manager::{BodyManager, PhysicsBody};
use crate::simulation::engine::Simulation;
use crate::simulation::params::PhysicsSettings;
use crate::simulation::states::{BodyProps, NVec2};
use crate::simulation::worker::WorkerBackend;

/// Helper to build `n` bodies spread over a disc
fn make_bodies(n: usize) -> Vec<PhysicsBody> {
    (0..n)
        .map(|i| {
            let i_f = i as f64;
            // deterministic positions, no rand needed
            let pos = NVec2::new((i_f * 0.37).sin() * 2000.0, (i_f * 0.13).cos() * 2000.0);
            // a few heavy bodies, many light ones
            let mass = if i % 50 == 0 { 5000.0 } else { 10.0 + (i % 7) as f64 };
            PhysicsBody::new(i as u64, mass, pos, NVec2::zeros())
        })
        .collect()
}

fn all_real() -> PhysicsSettings {
    PhysicsSettings::default()
}

fn split_real_pseudo() -> PhysicsSettings {
    PhysicsSettings {
        real_mass_threshold: 1000.0,
        real_bodies_min: 0,
        ..PhysicsSettings::default()
    }
}

/// Seconds per emitted tick, averaged over `steps`
fn time_ticks(n: usize, physics: &PhysicsSettings, steps: usize) -> f64 {
    let mut manager = BodyManager::new();
    manager.set_bodies(make_bodies(n), physics);

    // Warm up
    manager.step(physics);

    let t0 = Instant::now();
    for _ in 0..steps {
        manager.step(physics);
    }
    t0.elapsed().as_secs_f64() / steps as f64
}

/// Compare full pairwise gravity against the real / pseudo split
pub fn bench_body_manager() {
    let ns = [200, 400, 800, 1600, 3200];
    let steps = 5;

    for n in ns {
        let real = time_ticks(n, &all_real(), steps);
        let split = time_ticks(n, &split_real_pseudo(), steps);

        println!("N = {n:5}, all real tick = {:8.6} s, real/pseudo tick = {:8.6} s", real, split);
    }
}

/// Tick cost of the real / pseudo split for a range of n
/// Paste output directly into excel to graph
pub fn bench_tick_curve() {
    println!("N,all_real_ms,split_ms");

    for n in (200..=3200).step_by(200) {
        // Small n: average over a few steps to smooth noise
        let steps = if n <= 800 { 5 } else { 1 };

        let real_ms = time_ticks(n, &all_real(), steps) * 1000.0;
        let split_ms = time_ticks(n, &split_real_pseudo(), steps) * 1000.0;

        println!("{},{:.6},{:.6}", n, real_ms, split_ms);
    }
}

/// Host throughput: ticks applied to the cache per second, for both backends
pub fn bench_cache() {
    let ns = [100, 400, 1600];
    let ticks = 120;

    for n in ns {
        let props: Vec<BodyProps> = make_bodies(n)
            .iter()
            .map(|body| BodyProps::new(body.mass, body.pos, body.vel))
            .collect();

        for backend in [WorkerBackend::Inline, WorkerBackend::Thread] {
            let Ok(simulation) = Simulation::new(split_real_pseudo(), 512.0) else {
                continue;
            };
            let mut simulation = simulation.with_backend(backend);
            if simulation.create_bodies(&props, None).is_err() {
                continue;
            }

            let t0 = Instant::now();
            let result = simulation.run_for_num_ticks(ticks, None);
            let elapsed = t0.elapsed().as_secs_f64();

            match result {
                Ok(last) => println!(
                    "N = {n:5}, {backend:?}: {last} ticks in {:8.6} s, cache = {:.3} MB",
                    elapsed,
                    simulation.used_cache_memory()
                ),
                Err(e) => println!("N = {n:5}, {backend:?}: {e}"),
            }
        }
    }
}
