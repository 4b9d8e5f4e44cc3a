use bytemuck::{Pod, Zeroable};
use ultraviolet::Vec3;

/// An axis-aligned cube region, the spatial extent of one octree node.
///
/// `size` is the full edge length. Layout matches the `Bounds` struct in the
/// compute shaders (center first, then size).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Bounds {
    pub center: Vec3,
    pub size: f32,
}

/// A ray with an origin and a (not necessarily normalized) direction.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Result of a successful ray-bounds intersection.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    /// The nearest intersection point.
    pub point: Vec3,
    /// Ray parameter of the hit, in units of the direction vector.
    pub t: f32,
}

#[inline]
fn axis(v: Vec3, i: usize) -> f32 {
    match i {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

impl Bounds {
    pub fn new(center: Vec3, size: f32) -> Self {
        Self { center, size }
    }

    /// Minimum corner of the cube.
    pub fn min(&self) -> Vec3 {
        self.center - Vec3::broadcast(self.size * 0.5)
    }

    /// Maximum corner of the cube.
    pub fn max(&self) -> Vec3 {
        self.center + Vec3::broadcast(self.size * 0.5)
    }

    pub fn contains(&self, pos: Vec3) -> bool {
        let half = self.size * 0.5;
        (pos.x - self.center.x).abs() <= half
            && (pos.y - self.center.y).abs() <= half
            && (pos.z - self.center.z).abs() <= half
    }

    /// Octant code of a position relative to the center.
    /// Bit `i` is set iff component `i` of the position is less than the
    /// center's component `i`.
    pub fn octant(&self, pos: Vec3) -> u8 {
        ((pos.x < self.center.x) as u8)
            | (((pos.y < self.center.y) as u8) << 1)
            | (((pos.z < self.center.z) as u8) << 2)
    }

    /// Bounds of the child cube for an octant code. The eight children tile
    /// the parent exactly, and `octant(p)` of any point inside child `q`
    /// within the parent is `q`.
    pub fn octant_bounds(&self, q: u8) -> Self {
        let quart = self.size * 0.25;
        let offset = |bit: u8| if q & (1 << bit) != 0 { -quart } else { quart };
        Self {
            center: self.center + Vec3::new(offset(0), offset(1), offset(2)),
            size: self.size * 0.5,
        }
    }

    /// Slab test against the three face pairs, returning the nearest hit.
    /// An origin inside the bounds is an immediate hit at the origin.
    pub fn ray_intersect(&self, ray: &Ray) -> Option<RayHit> {
        if self.contains(ray.origin) {
            return Some(RayHit {
                point: ray.origin,
                t: 0.0,
            });
        }

        let half = self.size * 0.5;
        let mut best: Option<RayHit> = None;

        for i in 0..3 {
            let dir = axis(ray.direction, i);
            if dir.abs() <= f32::EPSILON {
                continue;
            }

            // The near face along this axis, given the ray direction.
            let face = axis(self.center, i) + if dir > 0.0 { -half } else { half };
            let t = (face - axis(ray.origin, i)) / dir;
            if t < 0.0 {
                continue;
            }
            if let Some(hit) = best {
                if hit.t <= t {
                    continue;
                }
            }

            let point = ray.origin + ray.direction * t;
            let j = (i + 1) % 3;
            let k = (i + 2) % 3;
            if (axis(point, j) - axis(self.center, j)).abs() <= half
                && (axis(point, k) - axis(self.center, k)).abs() <= half
            {
                best = Some(RayHit { point, t });
            }
        }

        best
    }
}
