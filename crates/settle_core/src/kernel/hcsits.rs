//! Hard-contact semi-implicit timestepping (HCSITS).
//!
//! Each step: initialize contacts and particles, then iterate the
//! relaxation over all contacts. Impulses accumulate as velocity
//! corrections `dv`/`dw` on the replicas, which the cluster folds into the
//! owners' velocities between sweeps. Finally positions are integrated.

use crate::data::{Contact, Particle};
use crate::math::{contact_basis, integrate_rotation, skew, DMat2, DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};

/// Contact models for the relaxation sweep. Names match the config strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelaxationModel {
    InelasticFrictionlessContact,
    ApproximateInelasticCoulombContactByDecoupling,
    ApproximateInelasticCoulombContactByOrthogonalProjections,
    InelasticCoulombContactByDecoupling,
    InelasticCoulombContactByOrthogonalProjections,
    InelasticGeneralizedMaximumDissipationContact,
    InelasticProjectedGaussSeidel,
}

impl RelaxationModel {
    /// Only the projected Gauss-Seidel model honours a restitution target.
    pub fn uses_restitution(&self) -> bool {
        matches!(self, RelaxationModel::InelasticProjectedGaussSeidel)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InitContactsForHcsits {
    pub friction: f64,
    /// Error reduction parameter for penetration correction.
    pub erp: f64,
}

impl InitContactsForHcsits {
    pub fn apply(&self, c: &mut Contact, p1: &Particle, p2: &Particle) {
        c.r1 = c.position - p1.position;
        c.r2 = c.position - p2.position;
        c.basis = contact_basis(c.normal);
        c.mu = self.friction;
        c.erp = self.erp;

        let s1 = skew(c.r1);
        let s2 = skew(c.r2);
        let k_world = DMat3::from_diagonal(DVec3::splat(p1.inv_mass + p2.inv_mass))
            - s1 * p1.inv_inertia_world() * s1
            - s2 * p2.inv_inertia_world() * s2;
        c.delassus = c.basis.transpose() * k_world * c.basis;
        c.delassus_inv = if c.delassus.determinant().abs() > f64::EPSILON * c.delassus.x_axis.x.abs().max(1.0) {
            c.delassus.inverse()
        } else {
            DMat3::ZERO
        };
        c.approach_velocity = c.normal.dot(p1.velocity_at(c.position) - p2.velocity_at(c.position));
        c.impulse = DVec3::ZERO;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InitParticlesForHcsits {
    pub global_acceleration: DVec3,
}

impl InitParticlesForHcsits {
    /// Turns external forces into velocity corrections on owned particles.
    pub fn apply(&self, p: &mut Particle, dt: f64) {
        if p.is_local() && !p.flags.fixed {
            let w = p.angular_velocity;
            let gyroscopic = w.cross(p.inertia_world() * w);
            p.dv = (p.force * p.inv_mass + self.global_acceleration) * dt;
            p.dw = p.inv_inertia_world() * (p.torque - gyroscopic) * dt;
        } else {
            p.dv = DVec3::ZERO;
            p.dw = DVec3::ZERO;
        }
        p.clear_forces();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HcsitsRelaxationStep {
    pub model: RelaxationModel,
    pub restitution: f64,
}

fn clamp_to_disc(v: DVec2, radius: f64) -> DVec2 {
    if radius <= 0.0 {
        return DVec2::ZERO;
    }
    let len = v.length();
    if len > radius {
        v * (radius / len)
    } else {
        v
    }
}

/// Rows/columns of a contact-frame matrix split into normal and tangential parts.
struct Blocks {
    nn: f64,
    /// Effect of a normal impulse on the tangential velocity.
    tn: DVec2,
    /// Effect of a tangential impulse on the normal velocity.
    nt: DVec2,
    tt: DMat2,
}

impl Blocks {
    fn of(k: &DMat3) -> Self {
        Self {
            nn: k.x_axis.x,
            tn: DVec2::new(k.x_axis.y, k.x_axis.z),
            nt: DVec2::new(k.y_axis.x, k.z_axis.x),
            tt: DMat2::from_cols(
                DVec2::new(k.y_axis.y, k.y_axis.z),
                DVec2::new(k.z_axis.y, k.z_axis.z),
            ),
        }
    }

    fn tt_inv(&self) -> DMat2 {
        if self.tt.determinant().abs() > f64::EPSILON {
            self.tt.inverse()
        } else {
            DMat2::ZERO
        }
    }
}

impl HcsitsRelaxationStep {
    pub fn new(model: RelaxationModel, restitution: f64) -> Self {
        Self { model, restitution }
    }

    /// Relaxes one contact and adds the impulse change to both replicas'
    /// velocity corrections.
    pub fn apply(&self, c: &mut Contact, p1: &mut Particle, p2: &mut Particle, dt: f64) {
        let u1 = p1.linear_velocity + p1.dv + (p1.angular_velocity + p1.dw).cross(c.r1);
        let u2 = p2.linear_velocity + p2.dv + (p2.angular_velocity + p2.dw).cross(c.r2);
        let gdot = c.basis.transpose() * (u1 - u2);
        let gap = if c.distance < 0.0 {
            c.erp * c.distance / dt
        } else {
            c.distance / dt
        };

        let old = c.impulse;
        let new = self.solve(c, gdot, gap, old);

        let delta = c.basis * (new - old);
        c.impulse = new;
        p1.dv += delta * p1.inv_mass;
        p1.dw += p1.inv_inertia_world() * c.r1.cross(delta);
        p2.dv -= delta * p2.inv_mass;
        p2.dw -= p2.inv_inertia_world() * c.r2.cross(delta);
    }

    fn solve(&self, c: &Contact, gdot: DVec3, gap: f64, old: DVec3) -> DVec3 {
        let k = Blocks::of(&c.delassus);
        if k.nn <= 0.0 {
            return DVec3::ZERO;
        }
        let gn = gdot.x + gap;
        let gt = DVec2::new(gdot.y, gdot.z);
        let old_t = DVec2::new(old.y, old.z);
        let decoupled_normal = (old.x - gn / k.nn).max(0.0);
        // Tangential velocity once the new normal impulse is in place.
        let gt_after_normal = |pn: f64| gt + k.tn * (pn - old.x);

        use RelaxationModel::*;
        match self.model {
            InelasticFrictionlessContact => DVec3::new(decoupled_normal, 0.0, 0.0),

            ApproximateInelasticCoulombContactByDecoupling => {
                let pn = decoupled_normal;
                let pt = old_t - k.tt_inv() * gt_after_normal(pn);
                let pt = clamp_to_disc(pt, c.mu * pn);
                DVec3::new(pn, pt.x, pt.y)
            }

            ApproximateInelasticCoulombContactByOrthogonalProjections => {
                let p = old - c.delassus_inv * DVec3::new(gn, gdot.y, gdot.z);
                let pn = p.x.max(0.0);
                let pt = clamp_to_disc(DVec2::new(p.y, p.z), c.mu * pn);
                DVec3::new(pn, pt.x, pt.y)
            }

            InelasticCoulombContactByDecoupling => {
                let pn = decoupled_normal;
                let gt_n = gt_after_normal(pn);
                let stick = old_t - k.tt_inv() * gt_n;
                let pt = if stick.length() <= c.mu * pn {
                    stick
                } else {
                    let free = gt_n - k.tt * old_t;
                    match free.try_normalize() {
                        Some(dir) => -dir * (c.mu * pn),
                        None => clamp_to_disc(stick, c.mu * pn),
                    }
                };
                DVec3::new(pn, pt.x, pt.y)
            }

            InelasticCoulombContactByOrthogonalProjections => {
                let full = old - c.delassus_inv * DVec3::new(gn, gdot.y, gdot.z);
                if full.x <= 0.0 {
                    return DVec3::ZERO;
                }
                let full_t = DVec2::new(full.y, full.z);
                if full_t.length() <= c.mu * full.x {
                    return full;
                }
                // Sliding: alternate between the slip direction and the
                // normal impulse it implies.
                let mut pn = full.x;
                let mut pt = clamp_to_disc(full_t, c.mu * pn);
                for _ in 0..4 {
                    let free = gt + k.tn * (pn - old.x) - k.tt * old_t;
                    if let Some(dir) = free.try_normalize() {
                        pt = -dir * (c.mu * pn);
                    }
                    pn = (old.x - (gn + k.nt.dot(pt - old_t)) / k.nn).max(0.0);
                    pt = clamp_to_disc(pt, c.mu * pn);
                }
                DVec3::new(pn, pt.x, pt.y)
            }

            InelasticGeneralizedMaximumDissipationContact => {
                let pn = decoupled_normal;
                let gt_n = gt_after_normal(pn);
                let trace = k.tt.x_axis.x + k.tt.y_axis.y;
                if trace <= 0.0 {
                    return DVec3::new(pn, 0.0, 0.0);
                }
                // Projected gradient descent of the dissipated energy over
                // the friction disc.
                let step = 1.0 / trace;
                let mut pt = clamp_to_disc(old_t, c.mu * pn);
                for _ in 0..8 {
                    let grad = gt_n + k.tt * (pt - old_t);
                    pt = clamp_to_disc(pt - grad * step, c.mu * pn);
                }
                DVec3::new(pn, pt.x, pt.y)
            }

            InelasticProjectedGaussSeidel => {
                let target = if c.approach_velocity < 0.0 {
                    -self.restitution * c.approach_velocity
                } else {
                    0.0
                };
                let pn = (old.x - (gn - target) / k.nn).max(0.0);
                let gt_n = gt_after_normal(pn);
                let mut pt = old_t;
                if k.tt.x_axis.x > 0.0 {
                    pt.x -= gt_n.x / k.tt.x_axis.x;
                }
                let gs = gt_n.y + k.tt.x_axis.y * (pt.x - old_t.x);
                if k.tt.y_axis.y > 0.0 {
                    pt.y -= gs / k.tt.y_axis.y;
                }
                let pt = clamp_to_disc(pt, c.mu * pn);
                DVec3::new(pn, pt.x, pt.y)
            }
        }
    }
}

/// Folds the accumulated correction into the velocity of an owned particle.
pub fn apply_velocity_correction(p: &mut Particle, relaxation_param: f64) {
    p.linear_velocity += relaxation_param * p.dv;
    p.angular_velocity += relaxation_param * p.dw;
    p.dv = DVec3::ZERO;
    p.dw = DVec3::ZERO;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrateParticlesForHcsits;

impl IntegrateParticlesForHcsits {
    pub fn apply(&self, p: &mut Particle, dt: f64) {
        if !p.is_local() || p.flags.fixed {
            return;
        }
        p.position += p.linear_velocity * dt;
        p.rotation = integrate_rotation(p.rotation, p.angular_velocity, dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::detect_analytic;
    use crate::data::{ParticleUid, Shape};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    const DT: f64 = 1e-3;

    fn sphere(uid: u64, x: f64, vx: f64) -> Particle {
        let mut p = Particle::new(
            ParticleUid(uid),
            0,
            DVec3::new(x, 0.0, 0.0),
            Arc::new(Shape::Sphere { radius: 0.5 }),
            0.5,
            1000.0,
        );
        p.linear_velocity = DVec3::new(vx, 0.0, 0.0);
        p
    }

    fn head_on() -> (Contact, Particle, Particle) {
        let a = sphere(1, 0.0, 1.0);
        let b = sphere(2, 0.999, -1.0);
        let cp = detect_analytic(&b, &a).unwrap();
        let c = Contact::new(1, 0, cp.distance, cp.normal, cp.position);
        (c, b, a)
    }

    fn relax(model: RelaxationModel, friction: f64) -> (Contact, Particle, Particle) {
        let (mut c, mut p1, mut p2) = head_on();
        InitContactsForHcsits { friction, erp: 0.8 }.apply(&mut c, &p1, &p2);
        let step = HcsitsRelaxationStep::new(model, 0.0);
        for _ in 0..10 {
            step.apply(&mut c, &mut p1, &mut p2, DT);
        }
        (c, p1, p2)
    }

    fn normal_velocity(c: &Contact, p1: &Particle, p2: &Particle) -> f64 {
        c.normal.dot((p1.linear_velocity + p1.dv) - (p2.linear_velocity + p2.dv))
    }

    #[test]
    fn frictionless_head_on_stops_approach() {
        let (c, p1, p2) = relax(RelaxationModel::InelasticFrictionlessContact, 0.0);
        assert!(normal_velocity(&c, &p1, &p2) >= -1e-9);
        assert!(c.impulse.x > 0.0);
        assert_relative_eq!(c.impulse.y, 0.0);
    }

    #[test]
    fn every_model_removes_approach_velocity() {
        use RelaxationModel::*;
        for model in [
            InelasticFrictionlessContact,
            ApproximateInelasticCoulombContactByDecoupling,
            ApproximateInelasticCoulombContactByOrthogonalProjections,
            InelasticCoulombContactByDecoupling,
            InelasticCoulombContactByOrthogonalProjections,
            InelasticGeneralizedMaximumDissipationContact,
            InelasticProjectedGaussSeidel,
        ] {
            let (c, p1, p2) = relax(model, 0.5);
            assert!(normal_velocity(&c, &p1, &p2) >= -1e-9, "{model:?}");
            let tangential = DVec2::new(c.impulse.y, c.impulse.z).length();
            assert!(tangential <= 0.5 * c.impulse.x + 1e-12, "{model:?}");
        }
    }

    #[test]
    fn impulses_are_equal_and_opposite() {
        let (_, p1, p2) = relax(RelaxationModel::InelasticFrictionlessContact, 0.0);
        assert_relative_eq!(p1.dv.x, -p2.dv.x, epsilon = 1e-12);
    }

    #[test]
    fn separating_contact_gets_no_impulse() {
        let (mut c, mut p1, mut p2) = head_on();
        p1.linear_velocity.x = 5.0;
        p2.linear_velocity.x = -5.0;
        InitContactsForHcsits { friction: 0.0, erp: 0.0 }.apply(&mut c, &p1, &p2);
        HcsitsRelaxationStep::new(RelaxationModel::InelasticFrictionlessContact, 0.0)
            .apply(&mut c, &mut p1, &mut p2, DT);
        assert_eq!(c.impulse, DVec3::ZERO);
    }

    #[test]
    fn init_particles_applies_gravity_to_owned_only() {
        let gravity = DVec3::new(0.0, 0.0, -9.81);
        let init = InitParticlesForHcsits { global_acceleration: gravity };
        let mut local = sphere(1, 0.0, 0.0);
        let mut ghost = sphere(2, 0.0, 0.0);
        ghost.flags.ghost = true;
        init.apply(&mut local, DT);
        init.apply(&mut ghost, DT);
        assert_relative_eq!(local.dv.z, -9.81e-3, epsilon = 1e-12);
        assert_eq!(ghost.dv, DVec3::ZERO);
    }

    #[test]
    fn correction_is_scaled_and_reset() {
        let mut p = sphere(1, 0.0, 0.0);
        p.dv = DVec3::new(2.0, 0.0, 0.0);
        apply_velocity_correction(&mut p, 0.5);
        assert_relative_eq!(p.linear_velocity.x, 1.0);
        assert_eq!(p.dv, DVec3::ZERO);
    }

    #[test]
    fn restitution_model_parses_from_config_name() {
        let m: RelaxationModel = serde_json::from_str("\"InelasticProjectedGaussSeidel\"").unwrap();
        assert!(m.uses_restitution());
    }
}
