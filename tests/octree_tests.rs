use nbody_octree::{Body, Bounds, G, Node, Octree, Ray, Vec3, utils};

fn approx(a: Vec3, b: Vec3, tol: f32) -> bool {
    (a - b).mag() <= tol
}

/// Walk the whole tree with the next-with-descent rule, calling `visit` for
/// every node reached, and assert the walk terminates within the arena size.
fn walk_all(tree: &Octree, mut visit: impl FnMut(&Node)) {
    let nodes = tree.nodes();
    let mut index = 0usize;
    let mut steps = 0usize;
    loop {
        let node = &nodes[index];
        visit(node);
        steps += 1;
        assert!(
            steps <= nodes.len(),
            "threaded traversal did not terminate within {} steps",
            nodes.len()
        );
        let next = if node.is_branch() {
            node.children
        } else {
            node.next
        };
        if next == 0 || next as usize >= nodes.len() {
            break;
        }
        index = next as usize;
    }
}

#[test]
fn empty_tree_is_a_single_root() {
    let tree = Octree::new(Bounds::new(Vec3::zero(), 100.0), 1024);
    assert_eq!(tree.nodes().len(), 1);
    assert_eq!(tree.nodes()[0].mass, 0.0);
    assert_eq!(tree.nodes()[0].com, Vec3::zero());
    assert_eq!(tree.bounds().size, 100.0);
}

#[test]
fn build_with_no_bodies_keeps_the_root_only() {
    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 100.0), 1024);
    tree.build(&[]).unwrap();
    assert_eq!(tree.nodes().len(), 1);
    assert!(tree.nodes()[0].is_leaf());
    assert_eq!(tree.nodes()[0].mass, 0.0);
}

#[test]
fn two_bodies_in_opposite_octants() {
    let m0 = 1.0;
    let p0 = Vec3::new(1.0, 1.0, 1.0);
    let m1 = 2.0;
    let p1 = Vec3::new(-1.0, -1.0, -1.0);

    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 100.0), 64);
    tree.build(&[
        Body::new(p0, Vec3::zero(), m0, 0.0),
        Body::new(p1, Vec3::zero(), m1, 0.0),
    ])
    .unwrap();

    let root = &tree.nodes()[0];
    assert_eq!(root.mass, m0 + m1);
    assert!(approx(root.com, (p0 * m0 + p1 * m1) / (m0 + m1), 1e-6));
    assert_eq!(root.children, 1);

    // Each body sits alone in its octant's subtree root.
    let q0 = tree.bounds().octant(p0);
    let q1 = tree.bounds().octant(p1);
    assert_ne!(q0, q1);
    for (q, mass, pos) in [(q0, m0, p0), (q1, m1, p1)] {
        let bounds = tree.bounds().octant_bounds(q);
        let cell = tree
            .nodes()
            .iter()
            .find(|node| node.bounds == bounds && !node.is_empty())
            .expect("octant cell holds the body");
        assert_eq!(cell.mass, mass);
        assert!(approx(cell.com, pos, 1e-6));
        assert!(cell.is_leaf());
    }
}

#[test]
fn coincident_bodies_merge_instead_of_recursing() {
    let p = Vec3::new(1.0, 1.0, 1.0);
    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 100.0), 4096);
    tree.build(&[
        Body::new(p, Vec3::zero(), 1.0, 0.0),
        Body::new(p, Vec3::zero(), 1.0, 0.0),
    ])
    .unwrap();

    let root = &tree.nodes()[0];
    assert_eq!(root.mass, 2.0);
    assert!(approx(root.com, p, 1e-6));
    walk_all(&tree, |_| {});
}

#[test]
fn nearly_coincident_bodies_build() {
    let p = Vec3::new(1.0, 1.0, 1.0);
    let q = Vec3::new(1.0 + f32::EPSILON, 1.0, 1.0);
    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 100.0), 4096);
    tree.build(&[
        Body::new(p, Vec3::zero(), 1.0, 0.0),
        Body::new(q, Vec3::zero(), 1.0, 0.0),
    ])
    .unwrap();
    assert_eq!(tree.nodes()[0].mass, 2.0);
}

#[test]
fn far_field_cluster_is_summarized_as_one_node() {
    let p0 = Vec3::new(100.0, 100.0, 100.0);
    let p1 = Vec3::new(99.0, 99.0, 99.0);
    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 400.0), 4096);
    tree.build(&[
        Body::new(p0, Vec3::zero(), 1.0, 0.0),
        Body::new(p1, Vec3::zero(), 1.0, 0.0),
    ])
    .unwrap();

    let mut visits = 0;
    tree.apply(Vec3::zero(), 0.5, |node| {
        visits += 1;
        assert_eq!(node.mass, 2.0);
        assert!(approx(node.com, (p0 + p1) / 2.0, 1e-4));
    });
    assert_eq!(visits, 1);
}

#[test]
fn octant_children_tile_the_parent() {
    let parent = Bounds::new(Vec3::new(3.0, -2.0, 5.0), 80.0);
    for q in 0..8u8 {
        let child = parent.octant_bounds(q);
        assert_eq!(child.size, parent.size * 0.5);
        assert!(parent.contains(child.center));
        assert_eq!(parent.octant(child.center), q);
        assert!(child.contains(child.center));
    }
}

#[test]
fn root_aggregates_match_the_body_set() {
    let n = 1003; // not a multiple of the stage count
    let mut bodies = vec![Body::default(); n];
    utils::cube(
        &mut bodies,
        &utils::CubeArgs {
            size: 500.0,
            ..Default::default()
        },
    );

    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 600.0), 8 * n);
    tree.build(&bodies).unwrap();

    let total_mass: f32 = bodies.iter().map(|b| b.mass).sum();
    let centroid = bodies.iter().fold(Vec3::zero(), |acc, b| acc + b.pos * b.mass) / total_mass;

    let root = &tree.nodes()[0];
    assert!((root.mass - total_mass).abs() <= 1e-3 * total_mass);
    assert!(approx(root.com, centroid, 1e-3 * tree.bounds().size));
}

#[test]
fn every_body_lands_in_exactly_one_leaf() {
    let n = 512;
    let mut bodies = vec![Body::default(); n];
    utils::cube(&mut bodies, &utils::CubeArgs::default());

    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 600.0), 8 * n);
    tree.build(&bodies).unwrap();

    let mut occupied_leaves = 0;
    walk_all(&tree, |node| {
        if node.is_leaf() && !node.is_empty() {
            occupied_leaves += 1;
        }
    });
    assert_eq!(occupied_leaves, n);
}

fn accel_toward(pos: Vec3, radii_sq: f32, src: Vec3, mass: f32) -> Vec3 {
    let delta = src - pos;
    let delta_sq = delta.mag_sq();
    if delta_sq < radii_sq {
        return Vec3::zero();
    }
    G * mass * delta / (delta_sq.sqrt() * delta_sq)
}

/// Per-body direct and tree accelerations plus interaction counts.
fn compare_forces(bodies: &[Body], tree: &Octree, theta: f32) -> (Vec<(Vec3, Vec3)>, usize, usize) {
    let mut pairs = Vec::with_capacity(bodies.len());
    let mut interactions_n2 = 0usize;
    let mut interactions_nlogn = 0usize;
    for body in bodies {
        let radii_sq = body.radius * body.radius;

        let mut acc_n2 = Vec3::zero();
        for other in bodies {
            acc_n2 += accel_toward(body.pos, radii_sq, other.pos, other.mass);
            interactions_n2 += 1;
        }

        let mut acc_bh = Vec3::zero();
        tree.apply(body.pos, theta, |node| {
            acc_bh += accel_toward(body.pos, radii_sq, node.com, node.mass);
            interactions_nlogn += 1;
        });

        pairs.push((acc_n2, acc_bh));
    }
    (pairs, interactions_n2, interactions_nlogn)
}

#[test]
fn barnes_hut_matches_direct_summation() {
    let n = 100;
    let mut bodies = vec![Body::default(); n];
    utils::cube(
        &mut bodies,
        &utils::CubeArgs {
            size: 200.0,
            ..Default::default()
        },
    );

    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 400.0), 8 * n);
    tree.build(&bodies).unwrap();

    // A subtree is summarized once d > s * theta, so larger theta opens
    // more cells. At theta 2 every summarized cell is at least a cell
    // diameter away and the agreement is tight.
    let (pairs, n2, nlogn) = compare_forces(&bodies, &tree, 2.0);
    for (acc_n2, acc_bh) in &pairs {
        let diff = (*acc_bh - *acc_n2).mag();
        assert!(
            diff <= 0.05 * acc_n2.mag() + 1e-4,
            "per-body force mismatch: {:?} vs {:?}",
            acc_bh,
            acc_n2
        );
    }
    assert!(nlogn > 0);
    assert!(nlogn < n2, "tree path touched {nlogn} of {n2} interactions");

    // The default real-time setting is much coarser; it must still track
    // the field in aggregate and touch strictly fewer interactions.
    let (pairs, n2, nlogn_coarse) = compare_forces(&bodies, &tree, 0.5);
    let mean_mag: f32 = pairs.iter().map(|(a, _)| a.mag()).sum::<f32>() / n as f32;
    let mean_diff: f32 = pairs.iter().map(|(a, b)| (*b - *a).mag()).sum::<f32>() / n as f32;
    assert!(mean_diff <= 0.5 * mean_mag);
    assert!(nlogn_coarse < nlogn);
    assert!(nlogn_coarse < n2);
}

#[test]
fn threaded_traversal_visits_each_node_once() {
    let n = 300;
    let mut bodies = vec![Body::default(); n];
    utils::cube(&mut bodies, &utils::CubeArgs::default());

    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 600.0), 8 * n);
    tree.build(&bodies).unwrap();

    let mut seen = std::collections::HashSet::new();
    let mut order = 0usize;
    walk_all(&tree, |node| {
        // Identity by address offset into the arena.
        let index = (node as *const Node as usize - tree.nodes().as_ptr() as usize)
            / std::mem::size_of::<Node>();
        assert!(seen.insert(index), "node {index} visited twice");
        order += 1;
    });
    assert!(order <= tree.nodes().len());
}

#[test]
fn rebuild_is_stable_over_identical_input() {
    let n = 128;
    let mut bodies = vec![Body::default(); n];
    utils::cube(&mut bodies, &utils::CubeArgs::default());

    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 600.0), 8 * n);
    tree.build(&bodies).unwrap();
    let first = (tree.nodes()[0].mass, tree.nodes()[0].com);
    tree.build(&bodies).unwrap();
    let second = (tree.nodes()[0].mass, tree.nodes()[0].com);
    assert_eq!(first.0.to_bits(), second.0.to_bits());
    assert_eq!(first.1.x.to_bits(), second.1.x.to_bits());
    assert_eq!(first.1.y.to_bits(), second.1.y.to_bits());
    assert_eq!(first.1.z.to_bits(), second.1.z.to_bits());
}

#[test]
fn capacity_exhaustion_fails_loudly() {
    // Pack far more bodies into one root octant than its arena slice can
    // hold leaves for; the build must reject instead of writing past the
    // range.
    let mut bodies = vec![Body::default(); 600];
    utils::cube(
        &mut bodies,
        &utils::CubeArgs {
            center: Vec3::new(25.0, 25.0, 25.0),
            size: 40.0,
            ..Default::default()
        },
    );

    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 100.0), 16);
    assert!(tree.build(&bodies).is_err());
}

#[test]
fn ray_from_inside_hits_at_the_origin() {
    let bounds = Bounds::new(Vec3::zero(), 100.0);
    let ray = Ray {
        origin: Vec3::new(1.0, 2.0, 3.0),
        direction: Vec3::new(0.0, 1.0, 0.0),
    };
    let hit = bounds.ray_intersect(&ray).expect("origin is inside");
    assert_eq!(hit.t, 0.0);
    assert!(approx(hit.point, ray.origin, 0.0));
}

#[test]
fn ray_hits_the_near_face() {
    let bounds = Bounds::new(Vec3::zero(), 100.0);
    let ray = Ray {
        origin: Vec3::new(-200.0, 0.0, 0.0),
        direction: Vec3::new(1.0, 0.0, 0.0),
    };
    let hit = bounds.ray_intersect(&ray).expect("ray points at the cube");
    assert!((hit.t - 150.0).abs() < 1e-3);
    assert!(approx(hit.point, Vec3::new(-50.0, 0.0, 0.0), 1e-3));
}

#[test]
fn ray_misses_to_the_side() {
    let bounds = Bounds::new(Vec3::zero(), 100.0);
    let ray = Ray {
        origin: Vec3::new(-200.0, 80.0, 0.0),
        direction: Vec3::new(1.0, 0.0, 0.0),
    };
    assert!(bounds.ray_intersect(&ray).is_none());
}

#[test]
fn query_visits_intersecting_nodes_and_can_stop_early() {
    let mut bodies = vec![Body::default(); 64];
    utils::cube(
        &mut bodies,
        &utils::CubeArgs {
            size: 100.0,
            ..Default::default()
        },
    );
    let mut tree = Octree::new(Bounds::new(Vec3::zero(), 200.0), 2048);
    tree.build(&bodies).unwrap();

    let ray = Ray {
        origin: Vec3::new(-500.0, 0.0, 0.0),
        direction: Vec3::new(1.0, 0.0, 0.0),
    };

    let mut visited = 0;
    tree.query(&ray, |node| {
        assert!(node.bounds.ray_intersect(&ray).is_some());
        visited += 1;
        true
    });
    assert!(visited > 0);

    let mut first_only = 0;
    tree.query(&ray, |_| {
        first_only += 1;
        false
    });
    assert_eq!(first_only, 1);
}
