//! Particle generator
//!
//! Fills a horizontal slab of the domain with particles placed on a
//! hexagonal close packed lattice. Every rank walks the whole lattice and
//! draws a diameter for every point, so the diameter sequence does not
//! depend on the partitioning; only points inside the rank's blocks become
//! particles there.

use settle_core::data::Particle;
use settle_core::distribution::{DiameterSource, ShapeSource};
use settle_core::math::{sorted_ascending, Aabb, DVec3, DeterministicRng};
use settle_net::{BlockForest, RankDomain};

/// Fraction of the initial velocity used for the random sideways and
/// angular components.
const VELOCITY_JITTER: f64 = 0.1;

/// Lattice points of a hexagonal close packing with nearest-neighbour
/// distance `spacing`, aligned so that `reference` is a lattice point,
/// restricted to `region` (half-open).
pub fn hcp_lattice(region: &Aabb, reference: DVec3, spacing: f64) -> Vec<DVec3> {
    if !(spacing > 0.0) || region.is_empty() {
        return Vec::new();
    }
    let dx = spacing;
    let dy = spacing * 3f64.sqrt() * 0.5;
    let dz = spacing * (2.0f64 / 3.0).sqrt();
    let layer_shift_y = spacing / (2.0 * 3f64.sqrt());

    let range = |min: f64, max: f64, origin: f64, step: f64| {
        let lo = ((min - origin) / step).floor() as i64 - 1;
        let hi = ((max - origin) / step).ceil() as i64 + 1;
        lo..=hi
    };

    let mut points = Vec::new();
    for k in range(region.min.z, region.max.z, reference.z, dz) {
        let odd_layer = k.rem_euclid(2) == 1;
        let z = reference.z + k as f64 * dz;
        let y0 = reference.y + if odd_layer { layer_shift_y } else { 0.0 };
        for j in range(region.min.y, region.max.y, y0, dy) {
            let shifted_row = (j + k).rem_euclid(2) == 1;
            let y = y0 + j as f64 * dy;
            let x0 = reference.x + if shifted_row { 0.5 * dx } else { 0.0 };
            for i in range(region.min.x, region.max.x, x0, dx) {
                let p = DVec3::new(x0 + i as f64 * dx, y, z);
                if region.contains(p) {
                    points.push(p);
                }
            }
        }
    }
    points
}

/// Per-rank generator state.
#[derive(Debug, Clone)]
pub struct RankGenerator {
    pub diameters: DiameterSource,
    pub shapes: ShapeSource,
    velocity_rng: DeterministicRng,
}

impl RankGenerator {
    /// Diameter and shape sources start identical on every rank; the
    /// velocity jitter is seeded from the rank.
    pub fn new(rank: usize, diameters: DiameterSource, shapes: ShapeSource) -> Self {
        Self {
            diameters,
            shapes,
            velocity_rng: DeterministicRng::new(rank as u64),
        }
    }
}

/// Outcome of one generation event on one rank.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationReport {
    pub created: usize,
    /// Particles whose shape was shrunk to the maximum interaction radius.
    pub clamped: usize,
    pub max_interaction_diameter: f64,
    pub volume: f64,
}

impl GenerationReport {
    pub fn combine(self, other: Self) -> Self {
        Self {
            created: self.created + other.created,
            clamped: self.clamped + other.clamped,
            max_interaction_diameter: self.max_interaction_diameter.max(other.max_interaction_diameter),
            volume: self.volume + other.volume,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticleGenerator {
    domain: Aabb,
    container: bool,
    density: f64,
    /// Per-axis lattice stretch `(S/I, 1, L/I)` of the typical form.
    spacing_scaling: DVec3,
}

impl ParticleGenerator {
    pub fn new(domain: Aabb, container: bool, density: f64, scale_spacing_with_form: bool, shapes: &ShapeSource) -> Self {
        let spacing_scaling = if scale_spacing_with_form {
            Self::form_scaling(shapes.normal_form())
        } else {
            DVec3::ONE
        };
        Self {
            domain,
            container,
            density,
            spacing_scaling,
        }
    }

    /// Sorted so the middle factor is exactly one; degenerate forms fall
    /// back to isotropic spacing.
    fn form_scaling(normal_form: DVec3) -> DVec3 {
        let sorted = sorted_ascending(normal_form);
        if !(sorted.y > 0.0) {
            return DVec3::ONE;
        }
        let scaling = sorted_ascending(sorted / sorted.y);
        if scaling.is_finite() && scaling.min_element() > 0.0 {
            scaling
        } else {
            DVec3::ONE
        }
    }

    pub fn spacing_scaling(&self) -> DVec3 {
        self.spacing_scaling
    }

    /// Candidate positions between `z_min` and `z_max`, in domain
    /// coordinates.
    pub fn lattice(&self, z_min: f64, z_max: f64, spacing: f64) -> Vec<DVec3> {
        let inv = DVec3::ONE / self.spacing_scaling;
        let region = Aabb::new(
            DVec3::new(self.domain.min.x * inv.x, self.domain.min.y * inv.y, z_min * inv.z),
            DVec3::new(self.domain.max.x * inv.x, self.domain.max.y * inv.y, z_max * inv.z),
        )
        .extended(DVec3::new(-0.5 * spacing, -0.5 * spacing, 0.0));
        let reference = DVec3::new(0.0, 0.0, 0.5 * (z_min + z_max) * inv.z);
        hcp_lattice(&region, reference, spacing)
            .into_iter()
            .map(|p| p * self.spacing_scaling)
            .collect()
    }

    fn outside_container(&self, p: DVec3, spacing: f64) -> bool {
        if !self.container {
            return false;
        }
        let center = self.domain.center();
        let radius = 0.5 * self.domain.size().x;
        let horizontal = DVec3::new(p.x - center.x, p.y - center.y, 0.0);
        horizontal.length() > radius - 0.5 * spacing
    }

    /// Creates this rank's share of the lattice.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        state: &mut RankGenerator,
        domain: &mut RankDomain,
        forest: &BlockForest,
        lattice: &[DVec3],
        spacing: f64,
        initial_velocity: f64,
        max_interaction_radius: f64,
    ) -> GenerationReport {
        let mut report = GenerationReport::default();
        let v0 = initial_velocity;
        for &position in lattice {
            let diameter = state.diameters.draw();
            if !forest.is_point_in_rank(domain.rank, position) || self.outside_container(position, spacing) {
                continue;
            }

            let drawn = state.shapes.draw(diameter, max_interaction_radius);
            let uid = domain.particles.next_uid();
            let mut p = Particle::new(
                uid,
                domain.rank,
                position,
                drawn.shape,
                drawn.interaction_radius,
                self.density,
            );

            let rng = &mut state.velocity_rng;
            p.linear_velocity = DVec3::new(
                VELOCITY_JITTER * rng.uniform(-v0, v0),
                VELOCITY_JITTER * rng.uniform(-v0, v0),
                -v0,
            );
            let spin = DVec3::new(rng.uniform(-v0, v0), rng.uniform(-v0, v0), rng.uniform(-v0, v0));
            p.angular_velocity = VELOCITY_JITTER * spin / diameter;

            report.created += 1;
            report.clamped += usize::from(drawn.clamped);
            report.max_interaction_diameter = report.max_interaction_diameter.max(2.0 * p.interaction_radius);
            report.volume += p.volume();
            domain.particles.insert(p);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use settle_core::distribution::{FormSource, ScaleMode};
    use settle_net::Cluster;

    fn periodic_forest(ranks: usize) -> BlockForest {
        BlockForest::new(
            Aabb::new(DVec3::new(-5.0, -5.0, 0.0), DVec3::new(5.0, 5.0, 20.0)),
            [2, 2, 1],
            [true, true, false],
            ranks,
        )
    }

    #[test]
    fn lattice_points_keep_spacing() {
        let region = Aabb::new(DVec3::ZERO, DVec3::splat(5.0));
        let points = hcp_lattice(&region, DVec3::ZERO, 1.0);
        assert!(!points.is_empty());
        for (i, a) in points.iter().enumerate() {
            assert!(region.contains(*a));
            for b in &points[i + 1..] {
                assert!(a.distance(*b) > 1.0 - 1e-9);
            }
        }
        // Nearest neighbours sit exactly one spacing apart.
        let nearest = points[1..].iter().map(|b| points[0].distance(*b)).fold(f64::INFINITY, f64::min);
        assert_relative_eq!(nearest, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_form_falls_back_to_isotropic() {
        assert_eq!(ParticleGenerator::form_scaling(DVec3::new(0.0, 0.0, 1.0)), DVec3::ONE);
        let s = ParticleGenerator::form_scaling(DVec3::new(0.4, 0.2, 0.8));
        assert_relative_eq!(s.y, 1.0);
        assert_relative_eq!(s.x, 0.5);
        assert_relative_eq!(s.z, 2.0);
    }

    #[test]
    fn elongated_forms_stretch_the_lattice() {
        let shapes = ShapeSource::Ellipsoid(FormSource::constant(DVec3::new(0.2, 0.4, 0.8), ScaleMode::SphereEquivalent));
        let domain = Aabb::new(DVec3::new(-5.0, -5.0, 0.0), DVec3::new(5.0, 5.0, 20.0));
        let generator = ParticleGenerator::new(domain, false, 1.0, true, &shapes);
        assert_relative_eq!(generator.spacing_scaling().z, 2.0, epsilon = 1e-12);
        for p in generator.lattice(2.0, 18.0, 1.0) {
            assert!(p.is_finite());
            assert!(p.z >= 2.0 - 1e-9 && p.z <= 18.0 + 1e-9);
        }
    }

    #[test]
    fn ranks_split_the_lattice_without_overlap() {
        let domain = Aabb::new(DVec3::new(-5.0, -5.0, 0.0), DVec3::new(5.0, 5.0, 20.0));
        let generator = ParticleGenerator::new(domain, false, 1.0, false, &ShapeSource::Sphere);
        let lattice = generator.lattice(10.0, 19.0, 1.1);

        let mut cluster = Cluster::new(periodic_forest(4), false);
        let forest = cluster.forest().clone();
        let mut total = 0;
        for domain in cluster.ranks_mut() {
            let mut state = RankGenerator::new(domain.rank, DiameterSource::uniform(1.0), ShapeSource::Sphere);
            total += generator.create(&mut state, domain, &forest, &lattice, 1.1, 1.0, 2.5).created;
        }
        assert_eq!(total, lattice.len());
        assert_eq!(cluster.num_local_particles(), lattice.len());
    }

    #[test]
    fn initial_velocity_points_down_with_small_jitter() {
        let domain = Aabb::new(DVec3::new(-5.0, -5.0, 0.0), DVec3::new(5.0, 5.0, 20.0));
        let generator = ParticleGenerator::new(domain, false, 1.0, false, &ShapeSource::Sphere);
        let lattice = generator.lattice(10.0, 12.0, 1.1);
        let mut cluster = Cluster::new(periodic_forest(1), false);
        let forest = cluster.forest().clone();
        let mut state = RankGenerator::new(0, DiameterSource::uniform(1.0), ShapeSource::Sphere);
        generator.create(&mut state, &mut cluster.ranks_mut()[0], &forest, &lattice, 1.1, 2.0, 2.5);
        for p in cluster.ranks()[0].particles.iter() {
            assert_eq!(p.linear_velocity.z, -2.0);
            assert!(p.linear_velocity.x.abs() <= 0.2);
            assert!(p.angular_velocity.abs().max_element() <= 0.2);
        }
    }

    #[test]
    fn container_rejects_points_near_the_wall() {
        let domain = Aabb::new(DVec3::new(-5.0, -5.0, 0.0), DVec3::new(5.0, 5.0, 20.0));
        let generator = ParticleGenerator::new(domain, true, 1.0, false, &ShapeSource::Sphere);
        let lattice = generator.lattice(10.0, 12.0, 1.0);
        let forest = BlockForest::new(domain, [1, 1, 1], [false; 3], 1);
        let mut cluster = Cluster::new(forest.clone(), false);
        let mut state = RankGenerator::new(0, DiameterSource::uniform(1.0), ShapeSource::Sphere);
        let report = generator.create(&mut state, &mut cluster.ranks_mut()[0], &forest, &lattice, 1.0, 0.0, f64::INFINITY);
        assert!(report.created > 0 && report.created < lattice.len());
        for p in cluster.ranks()[0].particles.iter() {
            assert!(DVec3::new(p.position.x, p.position.y, 0.0).length() <= 4.5 + 1e-9);
        }
    }

    #[test]
    fn oversized_particles_are_clamped() {
        let domain = Aabb::new(DVec3::new(-5.0, -5.0, 0.0), DVec3::new(5.0, 5.0, 20.0));
        let generator = ParticleGenerator::new(domain, false, 1.0, false, &ShapeSource::Sphere);
        let lattice = generator.lattice(10.0, 12.0, 4.0);
        let mut cluster = Cluster::new(periodic_forest(1), false);
        let forest = cluster.forest().clone();
        let mut state = RankGenerator::new(0, DiameterSource::uniform(6.0), ShapeSource::Sphere);
        let report = generator.create(&mut state, &mut cluster.ranks_mut()[0], &forest, &lattice, 4.0, 0.0, 2.5);
        assert_eq!(report.clamped, report.created);
        assert!(report.max_interaction_diameter <= 5.0 + 1e-12);
        assert!(cluster.ranks()[0].particles.iter().all(|p| p.interaction_radius <= 2.5 + 1e-12));
    }
}
