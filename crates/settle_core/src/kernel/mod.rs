//! Per-particle and per-contact kernels
//!
//! Kernels operate on single particles or single contacts and know nothing
//! about ranks; the cluster layer decides which replicas they run on.

pub mod dem;
pub mod hcsits;

pub use dem::{LinearSpringDashpot, SemiImplicitEuler};
pub use hcsits::{
    HcsitsRelaxationStep, InitContactsForHcsits, InitParticlesForHcsits,
    IntegrateParticlesForHcsits, RelaxationModel,
};

use crate::data::Particle;

/// `1 / (1/m1 + 1/m2)`; infinite when both particles are fixed.
pub fn effective_mass(p1: &Particle, p2: &Particle) -> f64 {
    let inv = p1.inv_mass + p2.inv_mass;
    if inv > 0.0 {
        1.0 / inv
    } else {
        f64::INFINITY
    }
}

/// Tangential to normal stiffness ratio for a Poisson ratio `nu`.
pub fn stiffness_ratio(poissons_ratio: f64) -> f64 {
    2.0 * (1.0 - poissons_ratio) / (2.0 - poissons_ratio)
}

/// Caps a particle's speed at `max_velocity`, keeping its direction.
pub fn limit_velocity(p: &mut Particle, max_velocity: f64) {
    let speed = p.linear_velocity.length();
    if speed > max_velocity && speed > 0.0 {
        p.linear_velocity *= max_velocity / speed;
    }
}

/// Scales linear and angular velocity by `factor`.
pub fn damp_velocity(p: &mut Particle, factor: f64) {
    p.linear_velocity *= factor;
    p.angular_velocity *= factor;
}
