use std::f32::consts::{PI, TAU};

use ultraviolet::Vec3;

use crate::body::Body;
use crate::bounds::Bounds;
use crate::octree::{Octree, TreeError};
use crate::{DEFAULT_THETA, G, SAGITTARIUS_MASS, SOLAR_MASS, STAR_DENSITY};

/// Radius of a sphere of the given mass and density.
pub fn compute_radius(mass: f32, density: f32) -> f32 {
    ((3.0 * PI * mass) / (4.0 * density)).cbrt()
}

/// Reciprocal magnitude of a vector, or `fallback` when the vector is too
/// close to zero to invert.
pub fn mag_inv_or(v: Vec3, fallback: f32) -> f32 {
    let mag_sq = v.mag_sq();
    if mag_sq > f32::EPSILON {
        1.0 / mag_sq.sqrt()
    } else {
        fallback
    }
}

/// Standard normal sample via the Box-Muller transform.
fn gaussian(rng: &mut fastrand::Rng) -> f32 {
    let u0 = 1.0 - rng.f32();
    let u1 = rng.f32();
    (-2.0 * u0.ln()).sqrt() * (TAU * u1).cos()
}

/// Parameters for [`disk`].
#[derive(Clone, Copy, Debug)]
pub struct DiskArgs {
    pub center: Vec3,
    /// Bulk velocity of the whole disk.
    pub vel: Vec3,
    /// Rotation axis; the disk lies in the perpendicular plane.
    pub axis: Vec3,
    pub inner_radius: f32,
    pub outer_radius: f32,
    /// Disk thickness as a fraction of the central body's radius.
    pub thickness: f32,
    pub central_mass: f32,
    pub star_mass: f32,
    /// PRNG seed, so a given configuration reproduces exactly.
    pub seed: u64,
}

impl Default for DiskArgs {
    fn default() -> Self {
        Self {
            center: Vec3::zero(),
            vel: Vec3::zero(),
            axis: Vec3::unit_z(),
            inner_radius: 0.0,
            outer_radius: 250.0,
            thickness: 1.0,
            central_mass: SAGITTARIUS_MASS,
            star_mass: SOLAR_MASS,
            seed: 0,
        }
    }
}

/// Fill `bodies` with a rotating disk of stars around a heavy central mass.
///
/// Stars get a unit tangential placeholder velocity at generation time;
/// afterwards a temporary acceleration tree measures the mass enclosed
/// around each body and rescales the placeholder so the orbit is
/// approximately circular about that enclosed mass.
pub fn disk(bodies: &mut [Body], args: &DiskArgs) -> Result<(), TreeError> {
    if bodies.is_empty() {
        return Ok(());
    }

    let mut rng = fastrand::Rng::with_seed(args.seed);

    // The central gravitational body.
    let center_radius = compute_radius(args.central_mass, STAR_DENSITY);
    bodies[0] = Body::new(args.center, args.vel, args.central_mass, center_radius);

    // Make sure no star spawns inside the central body.
    let outer = args.outer_radius.max(center_radius);
    let inner = args.inner_radius.max(center_radius);

    // An orthonormal pair spanning the disk plane; the sign copying keeps
    // the construction away from the degenerate cross-product cases.
    // https://math.stackexchange.com/questions/137362
    let axis = args.axis;
    let e0 = Vec3::new(
        axis.z.copysign(axis.x),
        axis.z.copysign(axis.y),
        -axis.x.copysign(axis.z) - axis.y.copysign(axis.z),
    )
    .normalized();
    let e1 = axis.cross(e0).normalized();

    let num = bodies.len();
    let star_radius = compute_radius(args.star_mass, STAR_DENSITY);
    for i in 1..num {
        let t = i as f32 / (num - 1) as f32;
        let angle = t * TAU;

        // Square root of a uniform sample makes the radial density uniform
        // per unit of disk area.
        let dist = inner + rng.f32().sqrt() * (outer - inner);

        let radial = e0 * angle.sin() + e1 * angle.cos();
        let tangent = axis.cross(radial);

        // Thinner towards the rim.
        let disp = gaussian(&mut rng) * ((outer - dist) / outer) * args.thickness * center_radius;

        let pos = args.center + radial * dist + axis * disp;
        bodies[i] = Body::new(pos, tangent, args.star_mass, star_radius);
    }

    // Adjust velocities so each body orbits the net mass interior to it.
    let mut tree = Octree::new(Bounds::new(args.center, 2.0 * outer), bodies.len() * 4);
    tree.build(bodies)?;

    for body in bodies.iter_mut() {
        let mut com = Vec3::zero();
        let mut mass = 0.0f32;
        tree.apply(body.pos, DEFAULT_THETA, |node| {
            com = (com * mass + node.com * node.mass) / (mass + node.mass);
            mass += node.mass;
        });

        // v = sqrt(G M / r) for a circular orbit; the guarded reciprocal
        // leaves the central body at the bulk velocity.
        let speed = (G * mass * mag_inv_or(com - body.pos, 0.0)).sqrt();
        body.vel = args.vel + body.vel * speed;
    }

    Ok(())
}

/// Parameters for [`cube`].
#[derive(Clone, Copy, Debug)]
pub struct CubeArgs {
    pub center: Vec3,
    /// Edge length of the cube.
    pub size: f32,
    /// Bulk velocity shared by every body.
    pub vel: Vec3,
    pub star_mass: f32,
    pub seed: u64,
}

impl Default for CubeArgs {
    fn default() -> Self {
        Self {
            center: Vec3::zero(),
            size: 500.0,
            vel: Vec3::zero(),
            star_mass: SOLAR_MASS,
            seed: 0,
        }
    }
}

/// Fill `bodies` with a uniformly random cube of equal-mass stars.
pub fn cube(bodies: &mut [Body], args: &CubeArgs) {
    let mut rng = fastrand::Rng::with_seed(args.seed);
    let radius = compute_radius(args.star_mass, STAR_DENSITY);
    for body in bodies.iter_mut() {
        let pos = args.center
            + Vec3::new(
                (rng.f32() - 0.5) * args.size,
                (rng.f32() - 0.5) * args.size,
                (rng.f32() - 0.5) * args.size,
            );
        *body = Body::new(pos, args.vel, args.star_mass, radius);
    }
}
