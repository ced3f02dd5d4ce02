//! Soft-contact kernels: linear spring-dashpot forces and explicit
//! integration.

use crate::data::{Contact, ContactHistory, Particle};
use crate::math::{integrate_rotation, DVec3};
use std::f64::consts::PI;

/// Linear spring-dashpot contact law with Coulomb friction.
///
/// Coefficients are derived per contact from the coefficient of
/// restitution, the collision time and the pair's effective mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSpringDashpot {
    pub stiffness_n: f64,
    pub damping_n: f64,
    pub stiffness_t: f64,
    pub damping_t: f64,
    pub friction_static: f64,
    pub friction_dynamic: f64,
}

impl LinearSpringDashpot {
    pub fn new(friction_static: f64, friction_dynamic: f64) -> Self {
        Self {
            stiffness_n: 0.0,
            damping_n: 0.0,
            stiffness_t: 0.0,
            damping_t: 0.0,
            friction_static,
            friction_dynamic,
        }
    }

    /// `kappa` is the tangential to normal stiffness ratio.
    pub fn set_stiffness_and_damping(
        &mut self,
        restitution: f64,
        collision_time: f64,
        kappa: f64,
        effective_mass: f64,
    ) {
        let ln_e = restitution.ln();
        self.stiffness_n = effective_mass * (PI * PI + ln_e * ln_e) / (collision_time * collision_time);
        self.damping_n = -2.0 * effective_mass * ln_e / collision_time;
        self.stiffness_t = kappa * self.stiffness_n;
        self.damping_t = kappa.sqrt() * self.damping_n;
    }

    /// Adds the contact force to both particles and records the updated
    /// tangential spring on the particle with the smaller uid.
    pub fn apply(&self, contact: &Contact, p1: &mut Particle, p2: &mut Particle, dt: f64) {
        if contact.distance >= 0.0 {
            return;
        }
        let n = contact.normal;
        let at = contact.position;
        let rel = p1.velocity_at(at) - p2.velocity_at(at);
        let vn = n.dot(rel);
        let vt = rel - n * vn;

        let normal_force = (self.stiffness_n * -contact.distance - self.damping_n * vn).max(0.0);

        let sign = if p1.uid < p2.uid { 1.0 } else { -1.0 };
        let stored = if sign > 0.0 {
            p1.old_contact_history.get(&p2.uid)
        } else {
            p2.old_contact_history.get(&p1.uid)
        };
        let previous = stored.map(|h| h.tangential_spring * sign).unwrap_or(DVec3::ZERO);

        // Rotate the old spring into the current tangent plane.
        let projected = previous - n * n.dot(previous);
        let mut spring = projected.normalize_or_zero() * previous.length() + vt * dt;

        let mut tangential = -self.stiffness_t * spring - self.damping_t * vt;
        let trial = tangential.length();
        if trial > self.friction_static * normal_force && trial > 0.0 {
            tangential *= self.friction_dynamic * normal_force / trial;
            if self.stiffness_t > 0.0 {
                spring = -(tangential + self.damping_t * vt) / self.stiffness_t;
            }
        }

        let force = n * normal_force + tangential;
        p1.add_force_at(force, at);
        p2.add_force_at(-force, at);

        let history = ContactHistory {
            tangential_spring: spring * sign,
        };
        if sign > 0.0 {
            p1.new_contact_history.insert(p2.uid, history);
        } else {
            p2.new_contact_history.insert(p1.uid, history);
        }
    }
}

/// Explicit velocity update followed by a position update with the new
/// velocity. Runs on owned, movable particles only.
#[derive(Debug, Clone, Copy)]
pub struct SemiImplicitEuler {
    pub dt: f64,
}

impl SemiImplicitEuler {
    pub fn new(dt: f64) -> Self {
        Self { dt }
    }

    pub fn apply(&self, p: &mut Particle) {
        if !p.is_local() || p.flags.fixed {
            p.clear_forces();
            return;
        }
        let w = p.angular_velocity;
        let gyroscopic = w.cross(p.inertia_world() * w);
        let alpha = p.inv_inertia_world() * (p.torque - gyroscopic);

        p.linear_velocity += p.force * p.inv_mass * self.dt;
        p.angular_velocity += alpha * self.dt;
        p.position += p.linear_velocity * self.dt;
        p.rotation = integrate_rotation(p.rotation, p.angular_velocity, self.dt);
        p.clear_forces();
    }
}
