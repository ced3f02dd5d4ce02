use crate::data::Shape;
use crate::math::{sorted_ascending, DVec3, DeterministicRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::debug;

const MIN_FORM_RATIO: f64 = 0.1;
const NORMAL_VOLUME_SAMPLES: usize = 1000;

/// How a particle's "size" is measured from its semi-axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScaleMode {
    /// Diameter of the sphere with equal volume.
    SphereEquivalent,
    /// Smallest square mesh the particle passes: `2 sqrt((S^2 + I^2) / 2)`.
    SieveLike,
}

impl ScaleMode {
    /// Size of a shape given ascending semi-axes `(S, I, L)`.
    pub fn size_of(&self, semi_axes: DVec3) -> f64 {
        let a = sorted_ascending(semi_axes);
        match self {
            ScaleMode::SphereEquivalent => 2.0 * (a.x * a.y * a.z).cbrt(),
            ScaleMode::SieveLike => 2.0 * ((a.x * a.x + a.y * a.y) / 2.0).sqrt(),
        }
    }

    fn normalize(&self, semi_axes: DVec3) -> DVec3 {
        let sorted = sorted_ascending(semi_axes);
        let size = self.size_of(sorted);
        if size > 0.0 {
            sorted / size
        } else {
            DVec3::splat(0.5)
        }
    }
}

/// Source of normalized ellipsoid forms: ascending semi-axes whose size
/// (per scale mode) is one.
#[derive(Debug, Clone)]
pub enum FormSource {
    Const {
        semi_axes: DVec3,
    },
    Distribution {
        elongation: (f64, f64),
        flatness: (f64, f64),
        mode: ScaleMode,
        rng: DeterministicRng,
    },
}

fn form_axes(elongation: f64, flatness: f64) -> DVec3 {
    DVec3::new(flatness * elongation, elongation, 1.0)
}

fn clamp_ratio(v: f64) -> f64 {
    v.clamp(MIN_FORM_RATIO, 1.0)
}

impl FormSource {
    pub fn constant(semi_axes: DVec3, mode: ScaleMode) -> Self {
        FormSource::Const {
            semi_axes: mode.normalize(semi_axes),
        }
    }

    /// Elongation `I/L` and flatness `S/I` drawn from normal distributions
    /// given as `(mean, std)`.
    pub fn distribution(elongation: (f64, f64), flatness: (f64, f64), mode: ScaleMode, seed: u64) -> Self {
        FormSource::Distribution {
            elongation,
            flatness,
            mode,
            rng: DeterministicRng::new(seed),
        }
    }

    pub fn draw(&mut self) -> DVec3 {
        match self {
            FormSource::Const { semi_axes } => *semi_axes,
            FormSource::Distribution {
                elongation,
                flatness,
                mode,
                rng,
            } => {
                let e = clamp_ratio(rng.gaussian(elongation.0, elongation.1));
                let f = clamp_ratio(rng.gaussian(flatness.0, flatness.1));
                mode.normalize(form_axes(e, f))
            }
        }
    }

    /// Largest interaction diameter per unit size.
    pub fn max_scaling_factor(&self) -> f64 {
        match self {
            FormSource::Const { semi_axes } => 2.0 * semi_axes.max_element(),
            FormSource::Distribution {
                elongation,
                flatness,
                mode,
                ..
            } => {
                let e = clamp_ratio(elongation.0 - 3.0 * elongation.1.abs());
                let f = clamp_ratio(flatness.0 - 3.0 * flatness.1.abs());
                2.0 * mode.normalize(form_axes(e, f)).max_element()
            }
        }
    }

    pub fn normal_volume(&self) -> f64 {
        let volume = |a: DVec3| 4.0 / 3.0 * PI * a.x * a.y * a.z;
        match self {
            FormSource::Const { semi_axes } => volume(*semi_axes),
            FormSource::Distribution { .. } => {
                let mut probe = self.clone();
                if let FormSource::Distribution { rng, .. } = &mut probe {
                    *rng = DeterministicRng::new(0);
                }
                (0..NORMAL_VOLUME_SAMPLES).map(|_| volume(probe.draw())).sum::<f64>()
                    / NORMAL_VOLUME_SAMPLES as f64
            }
        }
    }

    pub fn normal_form(&self) -> DVec3 {
        match self {
            FormSource::Const { semi_axes } => *semi_axes,
            FormSource::Distribution {
                elongation,
                flatness,
                mode,
                ..
            } => mode.normalize(form_axes(clamp_ratio(elongation.0), clamp_ratio(flatness.0))),
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, FormSource::Const { .. })
    }
}

/// A shape drawn for one particle.
#[derive(Debug, Clone)]
pub struct ShapeDraw {
    pub shape: Arc<Shape>,
    pub interaction_radius: f64,
    /// The shape was shrunk to respect the maximum interaction radius.
    pub clamped: bool,
}

#[derive(Debug, Clone)]
pub enum ShapeSource {
    Sphere,
    Ellipsoid(FormSource),
}

impl ShapeSource {
    pub fn draw(&mut self, size: f64, max_interaction_radius: f64) -> ShapeDraw {
        let semi_axes = match self {
            ShapeSource::Sphere => DVec3::splat(0.5 * size),
            ShapeSource::Ellipsoid(form) => form.draw() * size,
        };
        let radius = semi_axes.max_element();
        let (semi_axes, clamped) = if radius > max_interaction_radius && radius > 0.0 {
            debug!(radius, max_interaction_radius, "Shrinking shape to the maximum interaction radius");
            (semi_axes * (max_interaction_radius / radius), true)
        } else {
            (semi_axes, false)
        };
        let shape = match self {
            ShapeSource::Sphere => Shape::Sphere { radius: semi_axes.x },
            ShapeSource::Ellipsoid(_) => Shape::Ellipsoid { semi_axes },
        };
        ShapeDraw {
            interaction_radius: shape.bounding_radius(),
            shape: Arc::new(shape),
            clamped,
        }
    }

    pub fn max_diameter_scaling_factor(&self) -> f64 {
        match self {
            ShapeSource::Sphere => 1.0,
            ShapeSource::Ellipsoid(form) => form.max_scaling_factor(),
        }
    }

    /// Volume of a particle of size one.
    pub fn normal_volume(&self) -> f64 {
        match self {
            ShapeSource::Sphere => PI / 6.0,
            ShapeSource::Ellipsoid(form) => form.normal_volume(),
        }
    }

    pub fn generates_single_shape(&self) -> bool {
        match self {
            ShapeSource::Sphere => true,
            ShapeSource::Ellipsoid(form) => form.is_single(),
        }
    }

    /// Ascending semi-axes of the typical particle of size one.
    pub fn normal_form(&self) -> DVec3 {
        match self {
            ShapeSource::Sphere => DVec3::splat(0.5),
            ShapeSource::Ellipsoid(form) => form.normal_form(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sphere_equivalent_size_of_sphere_is_diameter() {
        assert_relative_eq!(ScaleMode::SphereEquivalent.size_of(DVec3::splat(0.5)), 1.0, epsilon = 1e-12);
        assert_relative_eq!(ScaleMode::SieveLike.size_of(DVec3::splat(0.5)), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_form_is_normalized_and_sorted() {
        let form = FormSource::constant(DVec3::new(3.0, 1.0, 2.0), ScaleMode::SieveLike);
        let a = form.normal_form();
        assert!(a.x <= a.y && a.y <= a.z);
        assert_relative_eq!(ScaleMode::SieveLike.size_of(a), 1.0, epsilon = 1e-12);
        assert_relative_eq!(form.max_scaling_factor(), 2.0 * a.z, epsilon = 1e-12);
    }

    #[test]
    fn distribution_forms_respect_bounds() {
        let mut form = FormSource::distribution((0.7, 0.1), (0.6, 0.1), ScaleMode::SphereEquivalent, 4);
        assert!(form.max_scaling_factor() > 2.0 * form.normal_form().z);
        for _ in 0..200 {
            let a = form.draw();
            assert_relative_eq!(ScaleMode::SphereEquivalent.size_of(a), 1.0, epsilon = 1e-9);
            assert!(a.y / a.z >= MIN_FORM_RATIO - 1e-12);
            assert!(a.x <= a.y && a.y <= a.z);
        }
    }

    #[test]
    fn sphere_volume_is_sphere_equivalent() {
        let mut source = ShapeSource::Ellipsoid(FormSource::constant(DVec3::new(1.0, 2.0, 3.0), ScaleMode::SphereEquivalent));
        assert_relative_eq!(source.normal_volume(), PI / 6.0, epsilon = 1e-12);
        let draw = source.draw(2.0, 10.0);
        assert_relative_eq!(draw.shape.volume(), PI / 6.0 * 8.0, epsilon = 1e-9);
        assert!(!draw.clamped);
    }

    #[test]
    fn oversized_shapes_are_clamped() {
        let mut source = ShapeSource::Sphere;
        let draw = source.draw(3.0, 1.0);
        assert!(draw.clamped);
        assert_relative_eq!(draw.interaction_radius, 1.0);
        assert_eq!(*draw.shape, Shape::Sphere { radius: 1.0 });
    }

    #[test]
    fn only_distributions_produce_multiple_shapes() {
        assert!(ShapeSource::Sphere.generates_single_shape());
        let d = ShapeSource::Ellipsoid(FormSource::distribution((0.7, 0.1), (0.6, 0.1), ScaleMode::SieveLike, 0));
        assert!(!d.generates_single_shape());
    }
}
