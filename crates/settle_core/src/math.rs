//! Deterministic math utilities
//!
//! Re-exports glam with the double precision helpers the simulation needs

pub use glam::*;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Axis-aligned box in simulation coordinates.
///
/// Containment is half-open (`min <= p < max`) so neighbouring boxes never
/// both claim a point on their shared face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec3 {
        0.5 * (self.min + self.max)
    }

    pub fn volume(&self) -> f64 {
        let s = self.size();
        s.x * s.y * s.z
    }

    pub fn is_empty(&self) -> bool {
        self.max.cmple(self.min).any()
    }

    pub fn contains(&self, p: DVec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max).all()
    }

    /// Grows the box by `d` on every side (shrinks for negative components).
    pub fn extended(&self, d: DVec3) -> Self {
        Self::new(self.min - d, self.max + d)
    }

    pub fn scaled(&self, factor: DVec3) -> Self {
        Self::new(self.min * factor, self.max * factor)
    }

    pub fn sq_distance(&self, p: DVec3) -> f64 {
        let closest = p.clamp(self.min, self.max);
        (p - closest).length_squared()
    }

    pub fn intersects_sphere(&self, center: DVec3, radius: f64) -> bool {
        self.sq_distance(center) <= radius * radius
    }

    pub fn merged(&self, other: &Aabb) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }
}

/// Seeded random number generator.
///
/// Every sampling site owns its own instance so that a given seed always
/// reproduces the same sequence regardless of what else draws numbers.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniform sample in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform sample in `[lo, hi)`; degenerate ranges return `lo`.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        self.rng.gen_range(lo..hi)
    }

    /// Normal sample via Box-Muller.
    pub fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1: f64 = self.rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let u2: f64 = self.rng.gen();
        let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        mean + std_dev * z0
    }

    pub fn index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.rng.gen_range(0..len)
    }
}

pub fn sphere_volume(diameter: f64) -> f64 {
    PI / 6.0 * diameter.powi(3)
}

pub fn diameter_of_volume(volume: f64) -> f64 {
    (6.0 * volume / PI).cbrt()
}

/// Components of `v` sorted ascending.
pub fn sorted_ascending(v: DVec3) -> DVec3 {
    let mut c = v.to_array();
    c.sort_by(f64::total_cmp);
    DVec3::from_array(c)
}

/// Matrix `[r]x` with `skew(r) * v == r.cross(v)`.
pub fn skew(r: DVec3) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(0.0, r.z, -r.y),
        DVec3::new(-r.z, 0.0, r.x),
        DVec3::new(r.y, -r.x, 0.0),
    )
}

/// Advances an orientation by the angular velocity `w` over `dt`.
pub fn integrate_rotation(q: DQuat, w: DVec3, dt: f64) -> DQuat {
    let speed = w.length();
    if speed * dt <= f64::EPSILON {
        return q;
    }
    (DQuat::from_axis_angle(w / speed, speed * dt) * q).normalize()
}

/// Orthonormal completion `(n, t, s)` of a unit normal.
pub fn contact_basis(normal: DVec3) -> DMat3 {
    let n = normal.normalize_or(DVec3::Z);
    let (t, s) = n.any_orthonormal_pair();
    DMat3::from_cols(n, t, s)
}
