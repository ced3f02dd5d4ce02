use crate::math::{DMat3, DVec3};
use std::f64::consts::PI;

/// Geometry of a particle.
///
/// Finite shapes are given in the particle's body frame. Infinite shapes
/// (confining walls) are stored in world coordinates together with the
/// particle position, which serves as a point on the surface or axis.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Sphere { radius: f64 },
    Ellipsoid { semi_axes: DVec3 },
    /// Solid below the plane; `normal` points out of the solid.
    HalfSpace { normal: DVec3 },
    /// Solid outside a cylinder of `radius` around `axis`.
    CylindricalBoundary { radius: f64, axis: DVec3 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassProperties {
    pub inv_mass: f64,
    pub inv_inertia: DMat3,
}

impl MassProperties {
    pub const FIXED: Self = Self {
        inv_mass: 0.0,
        inv_inertia: DMat3::ZERO,
    };
}

impl Shape {
    pub fn name(&self) -> &'static str {
        match self {
            Shape::Sphere { .. } => "Sphere",
            Shape::Ellipsoid { .. } => "Ellipsoid",
            Shape::HalfSpace { .. } => "HalfSpace",
            Shape::CylindricalBoundary { .. } => "CylindricalBoundary",
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(
            self,
            Shape::HalfSpace { .. } | Shape::CylindricalBoundary { .. }
        )
    }

    /// Volume of finite shapes; zero for walls.
    pub fn volume(&self) -> f64 {
        match self {
            Shape::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Shape::Ellipsoid { semi_axes } => {
                4.0 / 3.0 * PI * semi_axes.x * semi_axes.y * semi_axes.z
            }
            _ => 0.0,
        }
    }

    /// Body-frame semi-axes; walls report infinity.
    pub fn semi_axes(&self) -> DVec3 {
        match self {
            Shape::Sphere { radius } => DVec3::splat(*radius),
            Shape::Ellipsoid { semi_axes } => *semi_axes,
            _ => DVec3::splat(f64::INFINITY),
        }
    }

    pub fn bounding_radius(&self) -> f64 {
        self.semi_axes().max_element()
    }

    pub fn mass_properties(&self, density: f64) -> MassProperties {
        if self.is_infinite() || density <= 0.0 {
            return MassProperties::FIXED;
        }
        let mass = density * self.volume();
        let inertia = match self {
            Shape::Sphere { radius } => DVec3::splat(0.4 * mass * radius * radius),
            Shape::Ellipsoid { semi_axes: a } => DVec3::new(
                a.y * a.y + a.z * a.z,
                a.x * a.x + a.z * a.z,
                a.x * a.x + a.y * a.y,
            ) * (mass / 5.0),
            _ => DVec3::ZERO,
        };
        MassProperties {
            inv_mass: 1.0 / mass,
            inv_inertia: DMat3::from_diagonal(inertia.recip()),
        }
    }

    /// Extent along the unit body-frame direction `dir` and the surface
    /// point reaching it. Only meaningful for finite shapes.
    pub fn support(&self, dir: DVec3) -> (f64, DVec3) {
        match self {
            Shape::Sphere { radius } => (*radius, dir * *radius),
            Shape::Ellipsoid { semi_axes } => {
                let a2 = *semi_axes * *semi_axes;
                let h = (dir * dir).dot(a2).sqrt();
                if h <= 0.0 {
                    return (0.0, DVec3::ZERO);
                }
                (h, a2 * dir / h)
            }
            _ => (f64::INFINITY, DVec3::ZERO),
        }
    }
}
