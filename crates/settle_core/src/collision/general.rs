//! Support-function tests for non-spherical finite particles.
//!
//! The signed distance of two convex bodies is the largest gap between their
//! supports over all directions: a positive gap is a separating axis, and
//! for overlapping bodies the largest gap is minus the penetration depth.
//! It is found by projected gradient ascent over the unit sphere, the
//! gradient being the vector between the two support points. Against a
//! cylinder the furthest radial point is found the same way.

use super::ContactPoint;
use crate::data::Particle;
use crate::math::DVec3;

const MAX_ITERATIONS: usize = 500;
/// Relative to the length scale of the pair.
const TOLERANCE: f64 = 1e-12;

/// Furthest surface point of `p` in world direction `dir`.
fn support_world(p: &Particle, dir: DVec3) -> DVec3 {
    let body_dir = p.rotation.inverse() * dir;
    let (_, body_point) = p.shape.support(body_dir);
    p.position + p.rotation * body_point
}

/// Gap between two bodies along `normal` (pointing from the second towards
/// the first) with the support points realizing it.
#[derive(Debug, Clone, Copy)]
struct Separation {
    normal: DVec3,
    gap: f64,
    w1: DVec3,
    w2: DVec3,
}

impl Separation {
    fn along(p1: &Particle, p2: &Particle, normal: DVec3) -> Self {
        let w1 = support_world(p1, -normal);
        let w2 = support_world(p2, normal);
        Self {
            normal,
            gap: normal.dot(w1 - w2),
            w1,
            w2,
        }
    }

    /// Climbs to the nearest local maximum of the gap, stopping early once
    /// a separating axis shows up.
    fn ascend(self, p1: &Particle, p2: &Particle, scale: f64) -> Self {
        let mut best = self;
        let mut step = 1.0 / scale;
        for _ in 0..MAX_ITERATIONS {
            if best.gap > 0.0 {
                break;
            }
            let gradient = best.w1 - best.w2;
            let tangent = gradient - best.normal * gradient.dot(best.normal);
            if tangent.length() <= TOLERANCE * scale {
                break;
            }
            loop {
                let candidate = Self::along(p1, p2, (best.normal + tangent * step).normalize());
                if candidate.gap > best.gap {
                    best = candidate;
                    step *= 2.0;
                    break;
                }
                step *= 0.5;
                if step * scale < TOLERANCE {
                    return best;
                }
            }
        }
        best
    }
}

/// Principal axes of both bodies and the centre line, oriented from `p2`
/// towards `p1`.
fn seed_directions(p1: &Particle, p2: &Particle) -> Vec<DVec3> {
    let delta = p1.position - p2.position;
    let mut seeds = Vec::with_capacity(7);
    seeds.extend(delta.try_normalize());
    for rotation in [p1.rotation, p2.rotation] {
        for axis in [DVec3::X, DVec3::Y, DVec3::Z] {
            let n = rotation * axis;
            seeds.push(if n.dot(delta) < 0.0 { -n } else { n });
        }
    }
    seeds
}

pub fn finite_finite(p1: &Particle, p2: &Particle) -> Option<ContactPoint> {
    let delta = p1.position - p2.position;
    let scale = p1.shape.bounding_radius() + p2.shape.bounding_radius() + delta.length();
    let starts: Vec<Separation> = seed_directions(p1, p2)
        .into_iter()
        .map(|n| Separation::along(p1, p2, n))
        .collect();
    if starts.iter().any(|s| s.gap >= 0.0) {
        return None;
    }
    let best = starts
        .into_iter()
        .map(|s| s.ascend(p1, p2, scale))
        .reduce(|best, s| if s.gap > best.gap { s } else { best })?;
    if best.gap >= 0.0 {
        return None;
    }
    Some(ContactPoint {
        distance: best.gap,
        normal: best.normal,
        position: 0.5 * (best.w1 + best.w2),
    })
}

pub fn finite_half_space(p: &Particle, point: DVec3, normal: DVec3) -> Option<ContactPoint> {
    let s = support_world(p, -normal);
    let distance = normal.dot(s - point);
    if distance >= 0.0 {
        return None;
    }
    Some(ContactPoint {
        distance,
        normal,
        position: s - normal * (0.5 * distance),
    })
}

/// Furthest reach of `p` from the axis, starting in direction `outward`.
/// Each step moves to the radial direction of the current support point,
/// which never decreases the reach.
fn radial_reach(p: &Particle, axis_point: DVec3, axis: DVec3, outward: DVec3) -> (f64, DVec3, DVec3) {
    let mut outward = outward;
    let mut s = support_world(p, outward);
    for _ in 0..MAX_ITERATIONS {
        let rel = s - axis_point;
        let Some(next) = (rel - axis * axis.dot(rel)).try_normalize() else {
            break;
        };
        let converged = (next - outward).length() <= TOLERANCE;
        outward = next;
        s = support_world(p, outward);
        if converged {
            break;
        }
    }
    (outward.dot(s - axis_point), outward, s)
}

pub fn finite_cylinder(
    p: &Particle,
    axis_point: DVec3,
    axis: DVec3,
    radius: f64,
) -> Option<ContactPoint> {
    let rel = p.position - axis_point;
    let radial = rel - axis * axis.dot(rel);
    let centre_dir = radial.try_normalize().unwrap_or_else(|| axis.any_orthonormal_vector());
    let mut seeds = vec![centre_dir];
    for body_axis in [DVec3::X, DVec3::Y, DVec3::Z] {
        let n = p.rotation * body_axis;
        if let Some(n) = (n - axis * axis.dot(n)).try_normalize() {
            seeds.push(if n.dot(centre_dir) < 0.0 { -n } else { n });
        }
    }
    let (reach, outward, s) = seeds
        .into_iter()
        .map(|dir| radial_reach(p, axis_point, axis, dir))
        .reduce(|best, r| if r.0 > best.0 { r } else { best })?;
    let distance = radius - reach;
    if distance >= 0.0 {
        return None;
    }
    Some(ContactPoint {
        distance,
        normal: -outward,
        position: s + outward * (0.5 * distance),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ParticleUid, Shape};
    use crate::math::DQuat;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, FRAC_PI_6};
    use std::sync::Arc;

    fn body(position: DVec3, shape: Shape) -> Particle {
        let radius = shape.bounding_radius();
        Particle::new(ParticleUid(1), 0, position, Arc::new(shape), radius, 1.0)
    }

    fn ellipsoid(position: DVec3, semi_axes: DVec3) -> Particle {
        body(position, Shape::Ellipsoid { semi_axes })
    }

    fn needle(position: DVec3) -> Particle {
        ellipsoid(position, DVec3::new(1.0, 0.3, 0.3))
    }

    #[test]
    fn lying_ellipsoid_on_floor() {
        let p = ellipsoid(DVec3::new(0.0, 0.0, 0.45), DVec3::new(2.0, 1.0, 0.5));
        let c = finite_half_space(&p, DVec3::ZERO, DVec3::Z).unwrap();
        assert_relative_eq!(c.distance, -0.05, epsilon = 1e-12);
        assert_relative_eq!(c.position.z, -0.025, epsilon = 1e-12);
    }

    #[test]
    fn rotated_ellipsoid_uses_world_extent() {
        let mut p = ellipsoid(DVec3::new(0.0, 0.0, 0.45), DVec3::new(2.0, 1.0, 0.5));
        p.rotation = DQuat::from_rotation_y(FRAC_PI_2);
        assert!(finite_half_space(&p, DVec3::ZERO, DVec3::Z).is_some());
        p.position.z = 2.1;
        assert!(finite_half_space(&p, DVec3::ZERO, DVec3::Z).is_none());
    }

    #[test]
    fn tilted_ellipsoid_on_floor() {
        let mut p = needle(DVec3::new(0.3, -0.2, 0.7));
        p.rotation = DQuat::from_rotation_y(FRAC_PI_4);
        let c = finite_half_space(&p, DVec3::ZERO, DVec3::Z).unwrap();
        assert_relative_eq!(c.distance, 0.7 - (0.5f64 + 0.5 * 0.09).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(c.normal.z, 1.0);
    }

    #[test]
    fn ellipsoids_tip_to_tip() {
        let a = needle(DVec3::ZERO);
        let b = needle(DVec3::new(1.9, 0.0, 0.0));
        let c = finite_finite(&b, &a).unwrap();
        assert_relative_eq!(c.distance, -0.1, epsilon = 1e-12);
        assert_relative_eq!(c.normal.x, 1.0, epsilon = 1e-12);
        let side = needle(DVec3::new(0.0, 0.65, 0.0));
        assert!(finite_finite(&side, &a).is_none());
    }

    #[test]
    fn diagonal_neighbours_with_a_gap_do_not_touch() {
        // Bounding spheres and the supports along the centre line overlap,
        // but y is a separating axis with a gap of 0.05.
        let a = needle(DVec3::ZERO);
        let b = needle(DVec3::new(0.9, 0.65, 0.0));
        assert!(finite_finite(&a, &b).is_none());
        assert!(finite_finite(&b, &a).is_none());

        let rotation = DQuat::from_rotation_z(FRAC_PI_6);
        let mut a = needle(DVec3::new(0.2, 0.1, 1.0));
        let mut b = needle(a.position + rotation * DVec3::new(0.9, 0.65, 0.0));
        a.rotation = rotation;
        b.rotation = rotation;
        assert!(finite_finite(&a, &b).is_none());
        assert!(finite_finite(&b, &a).is_none());
    }

    #[test]
    fn diagonal_neighbours_overlapping_sideways() {
        let a = needle(DVec3::ZERO);
        let b = needle(DVec3::new(0.9, 0.45, 0.0));
        let ab = finite_finite(&a, &b).unwrap();
        let ba = finite_finite(&b, &a).unwrap();
        // Shifting b up by 0.6 sqrt(1 - 0.45^2) - 0.45 clears it, so the
        // depth is at most that.
        let lift = 0.6 * (1.0f64 - 0.45 * 0.45).sqrt() - 0.45;
        assert!(ab.distance < 0.0 && ab.distance >= -lift - 1e-9, "{}", ab.distance);
        assert_relative_eq!(ab.distance, ba.distance, epsilon = 1e-9);
        assert_relative_eq!(ab.normal.length(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(ab.normal.dot(ba.normal), -1.0, epsilon = 1e-6);
        assert!(ab.normal.y < 0.0);
    }

    #[test]
    fn crossed_ellipsoids_meet_tip_to_side() {
        let a = needle(DVec3::ZERO);
        let mut b = needle(DVec3::new(0.0, 1.25, 0.0));
        b.rotation = DQuat::from_rotation_z(FRAC_PI_2);
        let c = finite_finite(&a, &b).unwrap();
        assert_relative_eq!(c.distance, -0.05, epsilon = 1e-9);
        assert_relative_eq!(c.normal.y, -1.0, epsilon = 1e-9);
        assert_relative_eq!(c.position.y, 0.275, epsilon = 1e-9);
        b.position.y = 1.35;
        assert!(finite_finite(&a, &b).is_none());
    }

    #[test]
    fn sphere_off_the_ellipsoid_axes() {
        let e = needle(DVec3::ZERO);
        // (0.6, 0.24) lies on the ellipse x^2 + y^2 / 0.09 = 1.
        let surface = DVec3::new(0.6, 0.24, 0.0);
        let outward = DVec3::new(1.2, 2.0 * 0.24 / 0.09, 0.0).normalize();

        let apart = body(surface + outward * 0.35, Shape::Sphere { radius: 0.3 });
        assert!(finite_finite(&apart, &e).is_none());
        assert!(finite_finite(&e, &apart).is_none());

        let sphere = body(surface + outward * 0.25, Shape::Sphere { radius: 0.3 });
        let c = finite_finite(&sphere, &e).unwrap();
        assert_relative_eq!(c.distance, -0.05, epsilon = 1e-9);
        assert_relative_eq!(c.normal.x, outward.x, epsilon = 1e-6);
        assert_relative_eq!(c.normal.y, outward.y, epsilon = 1e-6);
        let expected = surface - outward * 0.025;
        assert_relative_eq!(c.position.x, expected.x, epsilon = 1e-6);
        assert_relative_eq!(c.position.y, expected.y, epsilon = 1e-6);
    }

    #[test]
    fn ellipsoid_against_container() {
        let p = ellipsoid(DVec3::new(3.1, 0.0, 1.0), DVec3::new(1.0, 0.5, 0.5));
        let c = finite_cylinder(&p, DVec3::ZERO, DVec3::Z, 4.0).unwrap();
        assert_relative_eq!(c.distance, -0.1, epsilon = 1e-12);
        assert_relative_eq!(c.normal.x, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn tangential_ellipsoid_reaches_past_its_radial_extent() {
        // Long axis along y: the furthest point from the axis is off the
        // radial line through the centre, at x = 2.5 + 0.3 u with
        // u = 1.5 / 1.82.
        let mut p = needle(DVec3::new(2.5, 0.0, 1.0));
        p.rotation = DQuat::from_rotation_z(FRAC_PI_2);
        let reach = (7.25f64 + 2.25 / 3.64).sqrt();
        let c = finite_cylinder(&p, DVec3::ZERO, DVec3::Z, 2.8).unwrap();
        assert_relative_eq!(c.distance, 2.8 - reach, epsilon = 1e-7);
        assert_relative_eq!(c.normal.z, 0.0, epsilon = 1e-12);
        assert_relative_eq!(c.normal.length(), 1.0, epsilon = 1e-12);
        assert!(finite_cylinder(&p, DVec3::ZERO, DVec3::Z, reach + 1e-6).is_none());
    }
}
