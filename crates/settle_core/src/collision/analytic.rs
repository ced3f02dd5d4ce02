use super::ContactPoint;
use crate::math::DVec3;

pub fn sphere_sphere(x1: DVec3, r1: f64, x2: DVec3, r2: f64) -> Option<ContactPoint> {
    let delta = x1 - x2;
    let len = delta.length();
    let distance = len - r1 - r2;
    if distance >= 0.0 {
        return None;
    }
    let normal = if len > 0.0 { delta / len } else { DVec3::Z };
    Some(ContactPoint {
        distance,
        normal,
        position: x2 + normal * (r2 + 0.5 * distance),
    })
}

/// Sphere against the solid below a plane through `point`.
pub fn sphere_half_space(
    center: DVec3,
    radius: f64,
    point: DVec3,
    normal: DVec3,
) -> Option<ContactPoint> {
    let distance = normal.dot(center - point) - radius;
    if distance >= 0.0 {
        return None;
    }
    Some(ContactPoint {
        distance,
        normal,
        position: center - normal * (radius + 0.5 * distance),
    })
}

/// Sphere inside a cylindrical wall whose axis passes through `axis_point`.
pub fn sphere_cylinder(
    center: DVec3,
    radius: f64,
    axis_point: DVec3,
    axis: DVec3,
    cylinder_radius: f64,
) -> Option<ContactPoint> {
    let rel = center - axis_point;
    let radial = rel - axis * axis.dot(rel);
    let radial_len = radial.length();
    let distance = cylinder_radius - radial_len - radius;
    if distance >= 0.0 {
        return None;
    }
    let outward = if radial_len > 0.0 {
        radial / radial_len
    } else {
        axis.any_orthonormal_vector()
    };
    Some(ContactPoint {
        distance,
        normal: -outward,
        position: center + outward * (radius + 0.5 * distance),
    })
}
