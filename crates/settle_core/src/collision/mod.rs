//! Contact detection and broad phases
//!
//! Narrow phase functions take two replicas and report the signed distance,
//! the normal (pointing from the second towards the first) and a contact
//! point. Nothing here fails: unsupported or separated pairs are `None`.

mod analytic;
mod general;
mod hash_grids;
mod linked_cells;

pub use analytic::{sphere_cylinder, sphere_half_space, sphere_sphere};
pub use general::{finite_cylinder, finite_finite, finite_half_space};
pub use hash_grids::HashGrids;
pub use linked_cells::LinkedCells;

use crate::data::{Particle, Shape};
use crate::math::DVec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    pub distance: f64,
    pub normal: DVec3,
    pub position: DVec3,
}

impl ContactPoint {
    fn flipped(self) -> Self {
        Self {
            normal: -self.normal,
            ..self
        }
    }
}

/// Whether the closed-form sphere tests cover this shape pair.
pub fn is_analytic_pair(a: &Shape, b: &Shape) -> bool {
    match (a, b) {
        (Shape::Sphere { .. }, Shape::Sphere { .. }) => true,
        (Shape::Sphere { .. }, other) | (other, Shape::Sphere { .. }) => other.is_infinite(),
        _ => false,
    }
}

/// Exact test for spheres against spheres and walls.
pub fn detect_analytic(p1: &Particle, p2: &Particle) -> Option<ContactPoint> {
    match (p1.shape.as_ref(), p2.shape.as_ref()) {
        (Shape::Sphere { radius: r1 }, Shape::Sphere { radius: r2 }) => {
            sphere_sphere(p1.position, *r1, p2.position, *r2)
        }
        (Shape::Sphere { radius }, _) => sphere_wall(p1.position, *radius, p2),
        (_, Shape::Sphere { radius }) => {
            sphere_wall(p2.position, *radius, p1).map(ContactPoint::flipped)
        }
        _ => None,
    }
}

/// Support-function based test for any finite shape.
pub fn detect_general(p1: &Particle, p2: &Particle) -> Option<ContactPoint> {
    match (p1.is_infinite(), p2.is_infinite()) {
        (false, false) => finite_finite(p1, p2),
        (false, true) => finite_wall(p1, p2),
        (true, false) => finite_wall(p2, p1).map(ContactPoint::flipped),
        (true, true) => None,
    }
}

/// Coarse test replacing every finite particle by its interaction sphere.
pub fn detect_bounding_sphere(p1: &Particle, p2: &Particle) -> Option<ContactPoint> {
    match (p1.is_infinite(), p2.is_infinite()) {
        (false, false) => sphere_sphere(
            p1.position,
            p1.interaction_radius,
            p2.position,
            p2.interaction_radius,
        ),
        (false, true) => sphere_wall(p1.position, p1.interaction_radius, p2),
        (true, false) => {
            sphere_wall(p2.position, p2.interaction_radius, p1).map(ContactPoint::flipped)
        }
        (true, true) => None,
    }
}

fn sphere_wall(center: DVec3, radius: f64, wall: &Particle) -> Option<ContactPoint> {
    match wall.shape.as_ref() {
        Shape::HalfSpace { normal } => sphere_half_space(center, radius, wall.position, *normal),
        Shape::CylindricalBoundary { radius: r, axis } => {
            sphere_cylinder(center, radius, wall.position, *axis, *r)
        }
        _ => None,
    }
}

fn finite_wall(p: &Particle, wall: &Particle) -> Option<ContactPoint> {
    match wall.shape.as_ref() {
        Shape::HalfSpace { normal } => finite_half_space(p, wall.position, *normal),
        Shape::CylindricalBoundary { radius, axis } => {
            finite_cylinder(p, wall.position, *axis, *radius)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ParticleUid;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn particle(shape: Shape, position: DVec3) -> Particle {
        let r = shape.bounding_radius().min(1e6);
        Particle::new(ParticleUid(0), 0, position, Arc::new(shape), r, 1.0)
    }

    #[test]
    fn analytic_pairs() {
        let s = Shape::Sphere { radius: 1.0 };
        let e = Shape::Ellipsoid { semi_axes: DVec3::ONE };
        let w = Shape::HalfSpace { normal: DVec3::Z };
        assert!(is_analytic_pair(&s, &s));
        assert!(is_analytic_pair(&w, &s));
        assert!(!is_analytic_pair(&s, &e));
        assert!(!is_analytic_pair(&w, &w));
    }

    #[test]
    fn wall_first_flips_normal() {
        let sphere = particle(Shape::Sphere { radius: 0.5 }, DVec3::new(0.0, 0.0, 0.4));
        let floor = particle(Shape::HalfSpace { normal: DVec3::Z }, DVec3::ZERO);
        let a = detect_analytic(&sphere, &floor).unwrap();
        let b = detect_analytic(&floor, &sphere).unwrap();
        assert_relative_eq!(a.normal.z, 1.0);
        assert_relative_eq!(b.normal.z, -1.0);
        assert_relative_eq!(a.distance, b.distance);
    }

    #[test]
    fn general_matches_analytic_for_spheres() {
        let a = particle(Shape::Sphere { radius: 0.5 }, DVec3::ZERO);
        let b = particle(Shape::Sphere { radius: 0.5 }, DVec3::new(0.9, 0.0, 0.0));
        let exact = detect_analytic(&a, &b).unwrap();
        let general = detect_general(&a, &b).unwrap();
        assert_relative_eq!(exact.distance, general.distance, epsilon = 1e-12);
        assert_relative_eq!(exact.position.x, general.position.x, epsilon = 1e-12);
    }

    #[test]
    fn bounding_sphere_uses_interaction_radius() {
        let mut a = particle(Shape::Sphere { radius: 0.1 }, DVec3::ZERO);
        let mut b = particle(Shape::Sphere { radius: 0.1 }, DVec3::new(0.5, 0.0, 0.0));
        a.interaction_radius = 0.3;
        b.interaction_radius = 0.3;
        assert!(detect_analytic(&a, &b).is_none());
        assert!(detect_bounding_sphere(&a, &b).is_some());
    }
}
