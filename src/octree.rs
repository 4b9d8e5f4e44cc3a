use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use thiserror::Error;
use ultraviolet::Vec3;

use crate::body::Body;
use crate::bounds::{Bounds, Ray};

/// Number of staging sub-trees built in parallel.
const NUM_STAGES: usize = 8;
/// Number of octant ranges the final arena is partitioned into.
const NUM_OCTANTS: usize = 8;
/// Arena floor. The merge phase hands each root octant an equal slice of
/// the arena, so the 4x-body-count guideline needs a floor before small
/// body sets can subdivide at all.
const MIN_NODES: usize = 4096;

#[derive(Debug, Error)]
pub enum TreeError {
    /// A subdivision would overflow its node range. The caller undersized
    /// the arena; the 4x-body-count heuristic avoids this for
    /// non-pathological distributions.
    #[error("node arena exhausted: subdivision needs {required} nodes, range holds {capacity}")]
    CapacityExceeded { required: usize, capacity: usize },
}

/// One cell of the flattened octree.
///
/// `children` is the index of the first of eight contiguous children, or 0
/// for a leaf. `next` is the node visited when this subtree is skipped (the
/// sibling, or an ancestor's sibling), forming a single stackless thread
/// through the whole tree that terminates at 0. Layout matches the `Node`
/// struct in the compute shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Node {
    /// Spatial extent of the cell.
    pub bounds: Bounds,
    /// Center of mass of the subtree.
    pub com: Vec3,
    /// Total mass of the subtree.
    pub mass: f32,
    /// Index of the next node once this subtree is done, 0 at the end.
    pub next: u32,
    /// Index of the first child (children occupy `children..children + 8`),
    /// 0 if this node is a leaf.
    pub children: u32,
    pad0: u32,
    pad1: u32,
}

impl Node {
    fn empty(bounds: Bounds, next: u32) -> Self {
        Self {
            bounds,
            com: Vec3::zero(),
            mass: 0.0,
            next,
            children: 0,
            pad0: 0,
            pad1: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children == 0
    }

    pub fn is_branch(&self) -> bool {
        self.children != 0
    }

    pub fn is_empty(&self) -> bool {
        self.mass == 0.0
    }
}

/// Fold a point mass into a node's aggregate mass and center of mass.
fn accumulate(node: &mut Node, pos: Vec3, mass: f32) {
    let total = node.mass + mass;
    if total <= f32::EPSILON {
        return;
    }
    node.com = (node.com * node.mass + pos * mass) / total;
    node.mass = total;
}

/// A contiguous span of a node arena owned by one insertion task.
///
/// Links written into nodes are absolute indices into the surrounding arena,
/// so the finished tree threads together without offset fixups; `base` is
/// the absolute index of `nodes[0]`.
struct NodeRange<'a> {
    nodes: &'a mut [Node],
    base: u32,
    used: u32,
}

impl<'a> NodeRange<'a> {
    fn new(nodes: &'a mut [Node], base: u32, root: Node) -> Self {
        nodes[0] = root;
        Self {
            nodes,
            base,
            used: 1,
        }
    }

    fn node(&mut self, index: u32) -> &mut Node {
        &mut self.nodes[(index - self.base) as usize]
    }

    /// Insert a point mass, descending from the range root.
    fn insert(&mut self, pos: Vec3, mass: f32) -> Result<(), TreeError> {
        let mut index = self.base;

        // Descend to a leaf, folding the new mass into every branch passed.
        while self.node(index).is_branch() {
            accumulate(self.node(index), pos, mass);
            let q = self.node(index).bounds.octant(pos);
            index = self.node(index).children + q as u32;
        }

        // Empty leaf: place the mass directly.
        if self.node(index).is_empty() {
            let node = self.node(index);
            node.mass = mass;
            node.com = pos;
            return Ok(());
        }

        // Occupied leaf: subdivide until the two masses separate.
        loop {
            let parent = *self.node(index);

            // Degenerate cell: merge coincident masses rather than recurse.
            if parent.bounds.size < f32::EPSILON {
                self.node(index).mass += mass;
                return Ok(());
            }

            if self.used as usize + 8 > self.nodes.len() {
                return Err(TreeError::CapacityExceeded {
                    required: self.used as usize + 8,
                    capacity: self.nodes.len(),
                });
            }

            // Allocate eight children chained sibling-to-sibling; the last
            // child inherits the parent's exit link, preserving the thread.
            let first_child = self.base + self.used;
            self.node(index).children = first_child;
            for q in 0..8u32 {
                let next = if q < 7 { first_child + q + 1 } else { parent.next };
                *self.node(first_child + q) =
                    Node::empty(parent.bounds.octant_bounds(q as u8), next);
            }
            self.used += 8;

            let new_q = parent.bounds.octant(pos) as u32;
            let old_q = parent.bounds.octant(parent.com) as u32;

            if new_q == old_q {
                // Both masses fall into the same child: push the old
                // aggregate down and keep subdividing from there.
                let child = first_child + new_q;
                {
                    let node = self.node(child);
                    node.mass = parent.mass;
                    node.com = parent.com;
                }
                accumulate(self.node(index), pos, mass);
                index = child;
            } else {
                {
                    let node = self.node(first_child + new_q);
                    node.mass = mass;
                    node.com = pos;
                }
                {
                    let node = self.node(first_child + old_q);
                    node.mass = parent.mass;
                    node.com = parent.com;
                }
                accumulate(self.node(index), pos, mass);
                return Ok(());
            }
        }
    }
}

/// A pointer-free Barnes-Hut octree.
///
/// Nodes live in a single contiguous arena and refer to each other by `u32`
/// index only, which keeps the structure uploadable to a GPU storage buffer
/// as-is. Construction is an 8-way stage-then-merge: bodies are first
/// inserted into private staging sub-trees in parallel, then the staged
/// trees are merged into the final arena one root octant per task.
#[derive(Debug)]
pub struct Octree {
    nodes: Vec<Node>,
    stage: Vec<Node>,
    max_nodes: usize,
}

impl Default for Octree {
    fn default() -> Self {
        Self::new(Bounds::new(Vec3::zero(), 1.0), 1024)
    }
}

impl Octree {
    /// Create a tree with the given root bounds and node capacity. The
    /// arena is realized lazily on the first build; a good capacity is four
    /// times the maximum body count.
    pub fn new(bounds: Bounds, max_nodes: usize) -> Self {
        let max_nodes = max_nodes.max(MIN_NODES);
        let mut nodes = Vec::with_capacity(max_nodes);
        nodes.push(Node::empty(bounds, 0));
        Self {
            nodes,
            stage: Vec::new(),
            max_nodes,
        }
    }

    /// Reserve space for at least this many nodes. Never shrinks.
    pub fn reserve(&mut self, max_nodes: usize) {
        self.max_nodes = self.max_nodes.max(max_nodes);
    }

    /// Root node bounds, the universe cube.
    pub fn bounds(&self) -> Bounds {
        self.nodes[0].bounds
    }

    /// All nodes, for rendering and GPU upload.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Wipe all masses and links and set new root bounds. Capacity is kept.
    pub fn clear(&mut self, bounds: Bounds) {
        self.nodes.fill(Node::zeroed());
        self.stage.fill(Node::zeroed());
        self.nodes[0] = Node::empty(bounds, 0);
    }

    /// Clear and rebuild the tree from a body array.
    pub fn build(&mut self, bodies: &[Body]) -> Result<(), TreeError> {
        let bounds = self.bounds();
        if bodies.is_empty() {
            self.clear(bounds);
            return Ok(());
        }

        self.grow_arena();
        self.clear(bounds);
        self.stage_bodies(bodies)?;
        self.merge()?;

        tracing::trace!(
            bodies = bodies.len(),
            arena = self.nodes.len(),
            "octree rebuilt"
        );
        Ok(())
    }

    fn grow_arena(&mut self) {
        if self.nodes.len() < self.max_nodes {
            self.nodes.resize(self.max_nodes, Node::zeroed());
        }
        if self.stage.len() < self.nodes.len() {
            self.stage.resize(self.nodes.len(), Node::zeroed());
        }
    }

    /// Build one private sub-tree per contiguous body slice, in parallel.
    /// Every staged range root carries the universe bounds and a `next` of
    /// 0, so each staged thread terminates inside its own range.
    fn stage_bodies(&mut self, bodies: &[Body]) -> Result<(), TreeError> {
        let bounds = self.bounds();
        let nodes_per_stage = (self.stage.len() / NUM_STAGES).max(1);
        let bodies_per_stage = bodies.len().div_ceil(NUM_STAGES).max(1);

        self.stage[..nodes_per_stage * NUM_STAGES]
            .par_chunks_mut(nodes_per_stage)
            .zip(bodies.par_chunks(bodies_per_stage))
            .enumerate()
            .try_for_each(|(s, (nodes, slice))| {
                let base = (s * nodes_per_stage) as u32;
                let mut range = NodeRange::new(nodes, base, Node::empty(bounds, 0));
                for body in slice {
                    range.insert(body.pos, body.mass)?;
                }
                Ok(())
            })
    }

    /// Merge the staged sub-trees into the final arena, one root octant per
    /// task. Octant roots are chained `next`-wise so the whole tree reads
    /// as a single thread again.
    fn merge(&mut self) -> Result<(), TreeError> {
        let nodes_per_stage = (self.stage.len() / NUM_STAGES).max(1);
        let nodes_per_octant = ((self.nodes.len() - 1) / NUM_OCTANTS).max(1);
        let root_bounds = self.bounds();

        // Fold the staged roots into the real root; octant 0 starts at 1.
        let (root, rest) = self.nodes.split_first_mut().expect("arena has a root");
        root.children = 1;
        for s in 0..NUM_STAGES {
            let staged = &self.stage[s * nodes_per_stage];
            if staged.mass > 0.0 {
                accumulate(root, staged.com, staged.mass);
            }
        }

        let stage = &self.stage;
        rest[..nodes_per_octant * NUM_OCTANTS]
            .par_chunks_mut(nodes_per_octant)
            .enumerate()
            .try_for_each(|(q, chunk)| {
                let base = 1 + q * nodes_per_octant;
                let next = if q < NUM_OCTANTS - 1 {
                    (base + nodes_per_octant) as u32
                } else {
                    0
                };
                let q = q as u8;
                let mut range = NodeRange::new(
                    chunk,
                    base as u32,
                    Node::empty(root_bounds.octant_bounds(q), next),
                );

                for s in 0..NUM_STAGES {
                    let staged_root = &stage[s * nodes_per_stage];
                    if staged_root.mass == 0.0 {
                        continue;
                    }

                    // A one-body stage belongs to whichever octant holds its
                    // center of mass.
                    if staged_root.is_leaf() {
                        if root_bounds.octant(staged_root.com) == q {
                            range.insert(staged_root.com, staged_root.mass)?;
                        }
                        continue;
                    }

                    // Walk this stage's subtree for our octant via its
                    // thread links, re-inserting every occupied leaf. The
                    // starting child's `next` is the subtree's exit link;
                    // reaching it (or the 0 terminator) ends the walk.
                    let start = staged_root.children + q as u32;
                    if stage[start as usize].mass == 0.0 {
                        continue;
                    }
                    let stop = stage[start as usize].next;

                    let mut index = start;
                    loop {
                        let node = &stage[index as usize];
                        if node.is_branch() {
                            index = node.children;
                        } else {
                            if node.mass > 0.0 {
                                range.insert(node.com, node.mass)?;
                            }
                            index = node.next;
                        }
                        if index == stop || index == 0 {
                            break;
                        }
                    }
                }
                Ok(())
            })
    }

    /// Visit every node that stands in for a distinct set of bodies around
    /// `pos` under the Barnes-Hut opening criterion: a subtree of edge
    /// length `s` at distance `d` is summarized when `d^2 > (s * theta)^2`,
    /// otherwise it is opened. Runs on the thread links, without a stack.
    pub fn apply<F: FnMut(&Node)>(&self, pos: Vec3, theta: f32, mut visit: F) {
        let theta_sq = theta * theta;
        let len = self.nodes.len() as u32;
        let mut index = 0u32;
        loop {
            let node = &self.nodes[index as usize];
            if node.is_empty() {
                index = node.next;
            } else if node.is_leaf() {
                visit(node);
                index = node.next;
            } else {
                let delta = node.com - pos;
                let dist_sq = delta.mag_sq();
                let size_sq = node.bounds.size * node.bounds.size;
                if dist_sq > size_sq * theta_sq {
                    // Far enough away to stand in for its whole subtree.
                    visit(node);
                    index = node.next;
                } else {
                    index = node.children;
                }
            }
            if index == 0 || index >= len {
                break;
            }
        }
    }

    /// Visit every node whose bounds intersect the ray, depth first. The
    /// visitor returns `false` to stop the walk.
    pub fn query<F: FnMut(&Node) -> bool>(&self, ray: &Ray, mut visit: F) {
        let len = self.nodes.len() as u32;
        let mut index = 0u32;
        loop {
            let node = &self.nodes[index as usize];
            if node.bounds.ray_intersect(ray).is_some() {
                if !visit(node) {
                    break;
                }
                index = if node.is_branch() {
                    node.children
                } else {
                    node.next
                };
            } else {
                index = node.next;
            }
            if index == 0 || index >= len {
                break;
            }
        }
    }
}
