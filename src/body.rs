use bytemuck::{Pod, Zeroable};
use ultraviolet::Vec3;

/// A point mass in the simulation.
///
/// The field order and the trailing pad give the struct the same 48-byte
/// layout as the `Body` struct in the compute shaders, so the body array
/// can be uploaded to a storage buffer as-is.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Body {
    /// Position vector.
    pub pos: Vec3,
    /// Radius, also the softening length for the force kernel.
    pub radius: f32,
    /// Velocity vector.
    pub vel: Vec3,
    /// Mass of the body.
    pub mass: f32,
    /// Acceleration vector (recomputed each step).
    pub acc: Vec3,
    pad: f32,
}

impl Default for Body {
    fn default() -> Self {
        Self::new(Vec3::zero(), Vec3::zero(), 1.0, 1.0)
    }
}

impl Body {
    /// Creates a new Body with the given properties.
    /// Initial acceleration is zero.
    pub fn new(pos: Vec3, vel: Vec3, mass: f32, radius: f32) -> Self {
        Self {
            pos,
            radius,
            vel,
            mass,
            acc: Vec3::zero(),
            pad: 0.0,
        }
    }

    /// Updates the body's position and velocity based on its current acceleration and time step `dt`.
    /// Uses semi-implicit Euler integration (velocity update first, then position).
    pub fn update(&mut self, dt: f32) {
        self.vel += self.acc * dt;
        self.pos += self.vel * dt;
    }
}
