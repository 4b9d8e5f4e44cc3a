pub mod body;
pub mod bounds;
pub mod c_api;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod octree;
pub mod simulation;
pub mod utils;

pub use body::Body;
pub use bounds::{Bounds, Ray, RayHit};
#[cfg(feature = "gpu")]
pub use gpu::{Gpu, GpuError, Mode};
pub use octree::{Node, Octree, TreeError};
pub use simulation::{SimError, Simulation};
pub use ultraviolet::Vec3;

/// Gravitational constant in simulation units.
pub const G: f32 = 1.0;
/// Mass of Sagittarius A*, the default central body.
pub const SAGITTARIUS_MASS: f32 = 4.1e6;
/// Mass of each star.
pub const SOLAR_MASS: f32 = 1.0;
/// Density used to derive body radii from masses.
pub const STAR_DENSITY: f32 = 1e2;
/// Roughly a million bodies, the real-time target.
pub const MAX_BODIES: usize = 1 << 20;
/// Barnes-Hut opening parameter used when the caller has no opinion.
pub const DEFAULT_THETA: f32 = 0.5;
