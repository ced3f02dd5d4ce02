//! Contact pipeline
//!
//! Every step the contact sets are rebuilt from scratch: the broad phase
//! enumerates candidate pairs per rank and each pair runs through the
//! narrow phase and the ownership filter. Sphere pairs use the closed-form
//! test. All other pairs are first tested with their interaction spheres;
//! ownership is decided on that coarse contact point so that the exact
//! test cannot make two ranks claim the same contact near a periodic face.

use settle_core::collision::{detect_analytic, detect_bounding_sphere, detect_general, is_analytic_pair};
use settle_core::collision::{HashGrids, LinkedCells};
use settle_core::data::{Contact, Particle};
use settle_core::math::DVec3;
use settle_net::notifications::{reduce_property, NumContactNotification};
use settle_net::{Cluster, ContactFilter};
use tracing::debug;

/// Linked cells are at least this factor wider than the largest particle.
pub const CELL_WIDTH_FACTOR: f64 = 1.01;

#[derive(Debug, Clone)]
enum BroadPhase {
    /// One grid per rank over the rank's region plus one cell of margin.
    LinkedCells(Vec<LinkedCells>),
    HashGrids(Vec<HashGrids>),
}

#[derive(Debug, Clone)]
pub struct ContactPipeline {
    broad_phase: BroadPhase,
}

impl ContactPipeline {
    pub fn new(cluster: &Cluster, use_hash_grids: bool, max_diameter: f64) -> Self {
        let broad_phase = if use_hash_grids {
            BroadPhase::HashGrids(vec![HashGrids::new(); cluster.num_ranks()])
        } else {
            BroadPhase::LinkedCells(Self::linked_cells(cluster, max_diameter))
        };
        Self { broad_phase }
    }

    fn linked_cells(cluster: &Cluster, max_diameter: f64) -> Vec<LinkedCells> {
        let width = CELL_WIDTH_FACTOR * max_diameter;
        let forest = cluster.forest();
        (0..cluster.num_ranks())
            .map(|rank| {
                let region = forest.rank_aabb(rank).extended(DVec3::splat(width));
                LinkedCells::new(region, width)
            })
            .collect()
    }

    /// Re-derives the linked cells for a new maximum diameter; hash grids
    /// adapt on their own.
    pub fn resize(&mut self, cluster: &Cluster, max_diameter: f64) {
        if let BroadPhase::LinkedCells(cells) = &mut self.broad_phase {
            *cells = Self::linked_cells(cluster, max_diameter);
            debug!(
                width = CELL_WIDTH_FACTOR * max_diameter,
                "Linked cells resized"
            );
        }
    }

    pub fn uses_linked_cells(&self) -> bool {
        matches!(self.broad_phase, BroadPhase::LinkedCells(_))
    }

    /// Timer name of the broad phase rebuild.
    pub fn broad_phase_name(&self) -> &'static str {
        match self.broad_phase {
            BroadPhase::LinkedCells(_) => "Linked cells",
            BroadPhase::HashGrids(_) => "Hash grid",
        }
    }

    /// Orders each rank's particles by linked-cell index. Invalidates
    /// particle indices, so it must run before the contacts are built.
    pub fn sort_particles(&self, cluster: &mut Cluster) {
        if let BroadPhase::LinkedCells(cells) = &self.broad_phase {
            cluster.map_ranks_with(cells.iter().collect(), |domain, cells| {
                domain.particles.sort_by_key(|p| cells.cell_index(p.position));
            });
        }
    }

    /// Clears the contacts and rebuilds the broad phase from the current
    /// positions.
    pub fn rebuild(&mut self, cluster: &mut Cluster) {
        match &mut self.broad_phase {
            BroadPhase::LinkedCells(cells) => {
                cluster.map_ranks_with(cells.iter_mut().collect(), |domain, cells| {
                    domain.contacts.clear();
                    cells.rebuild(domain.particles.as_slice());
                });
            }
            BroadPhase::HashGrids(grids) => {
                cluster.map_ranks_with(grids.iter_mut().collect(), |domain, grid| {
                    domain.contacts.clear();
                    grid.rebuild(domain.particles.as_slice());
                });
            }
        }
    }

    /// Runs the narrow phase over all candidate pairs and stores the
    /// contacts each rank is responsible for.
    pub fn detect(&self, cluster: &mut Cluster) {
        let forest = cluster.forest().clone();
        match &self.broad_phase {
            BroadPhase::LinkedCells(cells) => {
                cluster.map_ranks_with(cells.iter().collect(), |domain, cells| {
                    let filter = ContactFilter::new(&forest, domain.rank);
                    let particles = domain.particles.as_slice();
                    let mut found = Vec::new();
                    cells.for_each_pair(|i, j| found.extend(detect_pair(&filter, particles, i, j)));
                    for contact in found {
                        domain.contacts.push(contact);
                    }
                });
            }
            BroadPhase::HashGrids(grids) => {
                cluster.map_ranks_with(grids.iter().collect(), |domain, grid| {
                    let filter = ContactFilter::new(&forest, domain.rank);
                    let particles = domain.particles.as_slice();
                    let found: Vec<Contact> = grid
                        .pairs(particles)
                        .into_iter()
                        .filter_map(|(i, j)| detect_pair(&filter, particles, i, j))
                        .collect();
                    for contact in found {
                        domain.contacts.push(contact);
                    }
                });
            }
        }
    }
}

/// Narrow phase and ownership test for one candidate pair.
pub fn detect_pair(filter: &ContactFilter<'_>, particles: &[Particle], i: usize, j: usize) -> Option<Contact> {
    let (p1, p2) = (&particles[i], &particles[j]);
    if i == j || (p1.is_infinite() && p2.is_infinite()) {
        return None;
    }
    let point = if is_analytic_pair(&p1.shape, &p2.shape) {
        let point = detect_analytic(p1, p2)?;
        filter.owns(p1, p2, point.position).then_some(point)?
    } else {
        let coarse = detect_bounding_sphere(p1, p2)?;
        if !filter.owns(p1, p2, coarse.position) {
            return None;
        }
        detect_general(p1, p2)?
    };
    Some(Contact::new(i, j, point.distance, point.normal, point.position))
}

/// Recounts the contacts of every particle and sums the counts of all
/// replicas into the owner.
pub fn count_contacts(cluster: &mut Cluster) {
    cluster.for_each_rank(|domain| {
        let particles = domain.particles.as_mut_slice();
        for p in particles.iter_mut() {
            p.num_contacts = 0;
        }
        for c in domain.contacts.iter() {
            particles[c.id1].num_contacts += 1;
            particles[c.id2].num_contacts += 1;
        }
    });
    reduce_property::<NumContactNotification>(cluster);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use settle_core::data::Shape;
    use settle_core::math::{Aabb, DQuat};
    use settle_net::BlockForest;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
    use std::sync::Arc;

    fn cluster() -> Cluster {
        let forest = BlockForest::new(
            Aabb::new(DVec3::new(-5.0, -5.0, 0.0), DVec3::new(5.0, 5.0, 10.0)),
            [1, 1, 1],
            [false; 3],
            1,
        );
        let mut cluster = Cluster::new(forest, false);
        cluster.add_global(DVec3::ZERO, Arc::new(Shape::HalfSpace { normal: DVec3::Z }));
        cluster
    }

    fn add(cluster: &mut Cluster, position: DVec3, shape: Shape) {
        let domain = &mut cluster.ranks_mut()[0];
        let uid = domain.particles.next_uid();
        let radius = shape.bounding_radius();
        domain
            .particles
            .insert(Particle::new(uid, 0, position, Arc::new(shape), radius, 1.0));
    }

    fn run(pipeline: &mut ContactPipeline, cluster: &mut Cluster) {
        pipeline.rebuild(cluster);
        pipeline.detect(cluster);
    }

    #[test]
    fn spheres_touch_each_other_and_the_floor() {
        for hash_grids in [false, true] {
            let mut c = cluster();
            add(&mut c, DVec3::new(0.0, 0.0, 0.45), Shape::Sphere { radius: 0.5 });
            add(&mut c, DVec3::new(0.9, 0.0, 0.6), Shape::Sphere { radius: 0.5 });
            add(&mut c, DVec3::new(3.0, 3.0, 3.0), Shape::Sphere { radius: 0.5 });
            let mut pipeline = ContactPipeline::new(&c, hash_grids, 1.0);
            run(&mut pipeline, &mut c);
            assert_eq!(c.num_contacts(), 2, "hash grids: {hash_grids}");
            for contact in c.ranks()[0].contacts.iter() {
                assert_ne!(contact.id1, contact.id2);
                assert!(contact.distance < 0.0);
                assert_relative_eq!(contact.normal.length(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn rebuild_replaces_previous_contacts() {
        let mut c = cluster();
        add(&mut c, DVec3::new(0.0, 0.0, 0.45), Shape::Sphere { radius: 0.5 });
        let mut pipeline = ContactPipeline::new(&c, false, 1.0);
        run(&mut pipeline, &mut c);
        run(&mut pipeline, &mut c);
        assert_eq!(c.num_contacts(), 1);
    }

    #[test]
    fn ellipsoids_use_the_general_test() {
        let mut c = cluster();
        add(&mut c, DVec3::new(0.0, 0.0, 3.0), Shape::Ellipsoid { semi_axes: DVec3::new(0.6, 0.3, 0.3) });
        add(&mut c, DVec3::new(1.1, 0.0, 3.0), Shape::Ellipsoid { semi_axes: DVec3::new(0.6, 0.3, 0.3) });
        // Interaction spheres overlap but the bodies do not.
        add(&mut c, DVec3::new(0.0, 1.0, 3.0), Shape::Ellipsoid { semi_axes: DVec3::new(0.6, 0.3, 0.3) });
        let mut pipeline = ContactPipeline::new(&c, false, 1.2);
        run(&mut pipeline, &mut c);
        assert_eq!(c.num_contacts(), 1);
        let contact = &c.ranks()[0].contacts.as_slice()[0];
        assert!(contact.normal.x.abs() > 0.99);
    }

    #[test]
    fn tilted_and_diagonal_ellipsoids() {
        let needle = || Shape::Ellipsoid { semi_axes: DVec3::new(1.0, 0.3, 0.3) };
        let mut c = cluster();
        // Diagonal neighbours with y as a separating axis.
        add(&mut c, DVec3::new(0.0, 0.0, 3.0), needle());
        add(&mut c, DVec3::new(0.9, 0.65, 3.0), needle());
        // Tip of a needle pointing along y pressed into the side of another.
        add(&mut c, DVec3::new(-3.0, 0.0, 3.0), needle());
        add(&mut c, DVec3::new(-3.0, 1.25, 3.0), needle());
        // Needle leaning on the floor.
        add(&mut c, DVec3::new(3.0, 0.0, 0.7), needle());
        {
            let particles = c.ranks_mut()[0].particles.as_mut_slice();
            let n = particles.len();
            particles[n - 2].rotation = DQuat::from_rotation_z(FRAC_PI_2);
            particles[n - 1].rotation = DQuat::from_rotation_y(FRAC_PI_4);
        }
        for hash_grids in [false, true] {
            let mut pipeline = ContactPipeline::new(&c, hash_grids, 2.0);
            run(&mut pipeline, &mut c);
            assert_eq!(c.num_contacts(), 2, "hash grids: {hash_grids}");
            let domain = &c.ranks()[0];
            let particles = domain.particles.as_slice();
            for contact in domain.contacts.iter() {
                let (p1, p2) = (&particles[contact.id1], &particles[contact.id2]);
                if p1.is_infinite() || p2.is_infinite() {
                    assert_relative_eq!(contact.distance, 0.7 - 0.545f64.sqrt(), epsilon = 1e-12);
                } else {
                    assert_relative_eq!(contact.distance, -0.05, epsilon = 1e-9);
                    assert_relative_eq!(contact.position.y, 0.275, epsilon = 1e-9);
                    assert_relative_eq!(contact.normal.y.abs(), 1.0, epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn contact_counts_include_walls() {
        let mut c = cluster();
        add(&mut c, DVec3::new(0.0, 0.0, 0.45), Shape::Sphere { radius: 0.5 });
        add(&mut c, DVec3::new(0.9, 0.0, 0.6), Shape::Sphere { radius: 0.5 });
        let mut pipeline = ContactPipeline::new(&c, false, 1.0);
        run(&mut pipeline, &mut c);
        count_contacts(&mut c);
        let counts: Vec<u32> = c.ranks()[0].particles.locals().map(|p| p.num_contacts).collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[test]
    fn sorting_keeps_the_contact_set() {
        let mut c = cluster();
        for i in 0..6 {
            add(&mut c, DVec3::new(4.0 - 0.9 * i as f64, 0.0, 2.0), Shape::Sphere { radius: 0.5 });
        }
        let mut pipeline = ContactPipeline::new(&c, false, 1.0);
        run(&mut pipeline, &mut c);
        let before = c.num_contacts();
        pipeline.sort_particles(&mut c);
        run(&mut pipeline, &mut c);
        assert_eq!(c.num_contacts(), before);
        assert_eq!(before, 5);
        let BroadPhase::LinkedCells(cells) = &pipeline.broad_phase else {
            unreachable!()
        };
        let keys: Vec<usize> = c.ranks()[0].particles.iter().map(|p| cells[0].cell_index(p.position)).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn resize_changes_cell_width() {
        let c = cluster();
        let mut pipeline = ContactPipeline::new(&c, false, 1.0);
        pipeline.resize(&c, 2.0);
        match &pipeline.broad_phase {
            BroadPhase::LinkedCells(cells) => assert!(cells[0].cell_width() >= 2.02),
            BroadPhase::HashGrids(_) => unreachable!(),
        }
        assert_eq!(pipeline.broad_phase_name(), "Linked cells");
        assert!(!ContactPipeline::new(&c, true, 1.0).uses_linked_cells());
    }
}
