use rayon::prelude::*;
use thiserror::Error;
use ultraviolet::Vec3;

use crate::body::Body;
use crate::bounds::Bounds;
#[cfg(feature = "gpu")]
use crate::gpu::{Gpu, GpuError, Mode};
use crate::octree::{Octree, TreeError};
use crate::{DEFAULT_THETA, G};

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[cfg(feature = "gpu")]
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Manages the Barnes-Hut N-body simulation state and logic.
///
/// A step rebuilds the acceleration tree, evaluates the softened
/// inverse-square force for every body against the tree, then advances the
/// bodies with semi-implicit Euler inside a toroidally wrapped cube of edge
/// `size`. With `use_gpu` set and a backend attached, the two kernels run
/// as compute shaders instead; the tree is always built on the CPU.
#[derive(Debug)]
pub struct Simulation {
    /// Edge length of the universe cube.
    pub size: f32,
    /// Barnes-Hut opening parameter.
    pub theta: f32,
    /// Collection of all bodies in the simulation.
    pub bodies: Vec<Body>,
    /// The octree used for spatial acceleration of gravitational calculations.
    pub octree: Octree,
    /// Whether to run the accelerate/integrate kernels on the GPU backend.
    pub use_gpu: bool,
    #[cfg(feature = "gpu")]
    /// Which accelerate kernel the GPU backend runs.
    pub mode: Mode,
    #[cfg(feature = "gpu")]
    gpu: Option<Gpu>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    /// Default universe edge length.
    pub const DEFAULT_SIZE: f32 = 10_000.0;

    /// An empty simulation with default parameters.
    pub fn new() -> Self {
        Self::with_bodies(Vec::new())
    }

    /// A simulation over the given bodies with default parameters.
    pub fn with_bodies(bodies: Vec<Body>) -> Self {
        let octree = Octree::new(
            Bounds::new(Vec3::zero(), Self::DEFAULT_SIZE),
            (bodies.len() * 4).max(16),
        );
        Self {
            size: Self::DEFAULT_SIZE,
            theta: DEFAULT_THETA,
            bodies,
            octree,
            use_gpu: false,
            #[cfg(feature = "gpu")]
            mode: Mode::NLogN,
            #[cfg(feature = "gpu")]
            gpu: None,
        }
    }

    /// Attach a GPU backend and route subsequent steps through it.
    #[cfg(feature = "gpu")]
    pub fn enable_gpu(&mut self) -> Result<(), GpuError> {
        if self.gpu.is_none() {
            self.gpu = Some(Gpu::new()?);
        }
        self.use_gpu = true;
        Ok(())
    }

    /// Full update of the simulation.
    pub fn update(&mut self, dt: f32) -> Result<(), SimError> {
        self.accelerate()?;
        self.integrate(dt)?;
        Ok(())
    }

    /// Rebuild the acceleration tree and recompute every body's
    /// acceleration from it.
    pub fn accelerate(&mut self) -> Result<(), SimError> {
        self.octree.clear(Bounds::new(Vec3::zero(), self.size));
        self.octree.reserve(self.bodies.len() * 4);
        self.octree.build(&self.bodies)?;

        #[cfg(feature = "gpu")]
        if self.use_gpu {
            if let Some(gpu) = self.gpu.as_mut() {
                gpu.write(&self.bodies, self.octree.nodes());
                gpu.accelerate(self.theta, self.mode)?;
                return Ok(());
            }
        }

        // Spread force evaluation across the worker pool in contiguous
        // chunks; the tree is read-only for the whole pass.
        let octree = &self.octree;
        let theta = self.theta;
        let chunk_len = chunk_len(self.bodies.len());
        self.bodies.par_chunks_mut(chunk_len).for_each(|chunk| {
            for body in chunk {
                let pos = body.pos;
                let radii_sq = body.radius * body.radius;
                let mut acc = Vec3::zero();
                octree.apply(pos, theta, |node| {
                    let delta = node.com - pos;
                    let delta_sq = delta.mag_sq();

                    // Too close: skip the contribution instead of blowing up.
                    if delta_sq < radii_sq {
                        return;
                    }

                    acc += G * node.mass * delta / (delta_sq.sqrt() * delta_sq);
                });
                body.acc = acc;
            }
        });
        Ok(())
    }

    /// Advance velocities then positions, wrapping each axis back into the
    /// universe cube.
    pub fn integrate(&mut self, dt: f32) -> Result<(), SimError> {
        let size = self.size;

        #[cfg(feature = "gpu")]
        if self.use_gpu {
            if let Some(gpu) = self.gpu.as_mut() {
                gpu.integrate(dt)?;
                gpu.read(&mut self.bodies)?;
                // The integrate kernel leaves wrapping to the host.
                self.bodies
                    .par_iter_mut()
                    .for_each(|body| wrap(&mut body.pos, size));
                return Ok(());
            }
        }

        let chunk_len = chunk_len(self.bodies.len());
        self.bodies.par_chunks_mut(chunk_len).for_each(|chunk| {
            for body in chunk {
                body.update(dt);
                wrap(&mut body.pos, size);
            }
        });
        Ok(())
    }

    /// Apply a function to every body in parallel.
    pub fn visit<F>(&mut self, func: F)
    where
        F: Fn(&mut Body) + Send + Sync,
    {
        self.bodies.par_iter_mut().for_each(func);
    }
}

/// Chunk length splitting `len` bodies across the worker pool.
fn chunk_len(len: usize) -> usize {
    len.div_ceil(rayon::current_num_threads()).max(1)
}

/// Wrap a position into the `[-size/2, size/2]` cube, treating opposite
/// faces as identified. The epsilon keeps a wrapped coordinate strictly
/// inside the far edge so a body cannot pin to the boundary.
fn wrap(pos: &mut Vec3, size: f32) {
    let period = size - f32::EPSILON;
    let half = size * 0.5;
    for axis in [&mut pos.x, &mut pos.y, &mut pos.z] {
        while *axis > half {
            *axis -= period;
        }
        while *axis < -half {
            *axis += period;
        }
    }
}
