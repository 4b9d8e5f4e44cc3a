#![cfg(feature = "gpu")]

use nbody_octree::{Body, Bounds, Gpu, Mode, Octree, Simulation, Vec3, utils};

/// GPU tests need an adapter; skip quietly on machines without one.
fn gpu_or_skip() -> Option<Gpu> {
    match Gpu::new() {
        Ok(gpu) => Some(gpu),
        Err(err) => {
            eprintln!("skipping gpu test: {err}");
            None
        }
    }
}

fn disk_bodies(num: usize) -> Vec<Body> {
    let mut bodies = vec![Body::default(); num];
    utils::disk(
        &mut bodies,
        &utils::DiskArgs {
            outer_radius: 100.0,
            thickness: 0.5,
            ..Default::default()
        },
    )
    .unwrap();
    bodies
}

fn assert_close(cpu: Vec3, gpu: Vec3, what: &str) {
    let diff = (cpu - gpu).mag();
    assert!(
        diff <= 1e-3 * cpu.mag() + 1e-3,
        "{what}: cpu {cpu:?} vs gpu {gpu:?}"
    );
}

#[test]
fn gpu_accelerate_matches_cpu_tree_path() {
    let Some(mut gpu) = gpu_or_skip() else { return };

    let bodies = disk_bodies(512);
    let mut sim = Simulation::with_bodies(bodies.clone());
    sim.accelerate().unwrap();

    let mut gpu_bodies = bodies;
    gpu.write(&gpu_bodies, sim.octree.nodes());
    gpu.accelerate(sim.theta, Mode::NLogN).unwrap();
    gpu.read(&mut gpu_bodies).unwrap();

    for (cpu_body, gpu_body) in sim.bodies.iter().zip(&gpu_bodies) {
        assert_close(cpu_body.acc, gpu_body.acc, "tree acceleration");
    }
}

#[test]
fn gpu_direct_summation_matches_the_oracle() {
    let Some(mut gpu) = gpu_or_skip() else { return };

    let bodies = disk_bodies(256);

    // Host-side N^2 oracle with the same softening rule.
    let expected: Vec<Vec3> = bodies
        .iter()
        .map(|body| {
            let radii_sq = body.radius * body.radius;
            let mut acc = Vec3::zero();
            for other in &bodies {
                let delta = other.pos - body.pos;
                let delta_sq = delta.mag_sq();
                if delta_sq < radii_sq {
                    continue;
                }
                acc += other.mass * delta / (delta_sq.sqrt() * delta_sq);
            }
            acc
        })
        .collect();

    let mut sim = Simulation::with_bodies(bodies.clone());
    sim.accelerate().unwrap();

    let mut gpu_bodies = bodies;
    gpu.write(&gpu_bodies, sim.octree.nodes());
    gpu.accelerate(sim.theta, Mode::N2).unwrap();
    gpu.read(&mut gpu_bodies).unwrap();

    for (want, gpu_body) in expected.iter().zip(&gpu_bodies) {
        assert_close(*want, gpu_body.acc, "direct acceleration");
    }
}

#[test]
fn gpu_integrate_advances_velocity_then_position() {
    let Some(mut gpu) = gpu_or_skip() else { return };

    let mut bodies = vec![Body::new(
        Vec3::new(1.0, 2.0, 3.0),
        Vec3::new(1.0, 0.0, 0.0),
        1.0,
        0.1,
    )];
    bodies[0].acc = Vec3::new(0.0, 10.0, 0.0);

    let octree = Octree::new(Bounds::new(Vec3::zero(), 10.0), 16);
    gpu.write(&bodies, octree.nodes());
    gpu.integrate(0.5).unwrap();
    gpu.read(&mut bodies).unwrap();

    // vel = (1, 5, 0), pos = old + vel * dt = (1.5, 4.5, 3)
    assert_close(Vec3::new(1.0, 5.0, 0.0), bodies[0].vel, "velocity");
    assert_close(Vec3::new(1.5, 4.5, 3.0), bodies[0].pos, "position");
}

#[test]
fn gpu_sim_keeps_disk_orbits_bounded() {
    let rad = 100.0f32;
    let mut sim = Simulation::with_bodies(disk_bodies(512));
    if let Err(err) = sim.enable_gpu() {
        eprintln!("skipping gpu test: {err}");
        return;
    }

    for _ in 0..100 {
        sim.update(1.0 / 120.0).unwrap();
    }

    for body in &sim.bodies {
        assert!(
            body.pos.mag_sq() <= rad * rad,
            "body escaped to {:?}",
            body.pos
        );
    }
}
