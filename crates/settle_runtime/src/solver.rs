//! Solver dispatch
//!
//! One of two per-step pipelines chosen at startup. Both only mutate the
//! authoritative state on the owning rank: contributions collected on
//! ghosts are reduced to the owner, and whatever replicas need afterwards
//! is broadcast or refreshed by the next synchronization.

use crate::resolve::Physics;
use settle_core::kernel::{
    effective_mass, HcsitsRelaxationStep, InitContactsForHcsits, InitParticlesForHcsits,
    IntegrateParticlesForHcsits, LinearSpringDashpot, SemiImplicitEuler,
};
use settle_core::math::DVec3;
use settle_metrics::{time_scope, TimingTree};
use settle_net::notifications::{
    broadcast_property, reduce_and_swap_contact_history, reduce_property, ForceTorqueNotification,
    VelocityCorrectionNotification, VelocityUpdateNotification,
};
use settle_net::Cluster;
use settle_services::settings::SolverKind;
use settle_services::Settings;

/// Hard-contact solver: relaxation sweeps over the contacts with a
/// velocity reduce/broadcast after each sweep.
#[derive(Debug, Clone, Copy)]
pub struct HcsitsSolver {
    pub init_contacts: InitContactsForHcsits,
    pub init_particles: InitParticlesForHcsits,
    pub relaxation: HcsitsRelaxationStep,
    pub relaxation_parameter: f64,
    pub iterations: usize,
    gravity: f64,
}

impl HcsitsSolver {
    pub fn step(&self, cluster: &mut Cluster, dt: f64, timing: &mut TimingTree) {
        let init_contacts = self.init_contacts;
        time_scope!(timing, "Init contacts", {
            cluster.for_each_rank(|domain| {
                let particles = domain.particles.as_slice();
                for c in domain.contacts.iter_mut() {
                    init_contacts.apply(c, &particles[c.id1], &particles[c.id2]);
                }
            });
        });

        let init_particles = self.init_particles;
        time_scope!(timing, "Init particles", {
            cluster.for_each_rank(|domain| {
                for p in domain.particles.iter_mut() {
                    init_particles.apply(p, dt);
                }
            });
        });

        // External forces enter unscaled.
        time_scope!(timing, "Velocity update", {
            reduce_property::<VelocityCorrectionNotification>(cluster);
            broadcast_property::<VelocityUpdateNotification>(cluster, &1.0);
        });

        let relaxation = self.relaxation;
        for _ in 0..self.iterations {
            time_scope!(timing, "Relaxation step", {
                cluster.for_each_rank(|domain| {
                    for c in domain.contacts.iter_mut() {
                        let (p1, p2) = domain.particles.pair_mut(c.id1, c.id2);
                        relaxation.apply(c, p1, p2, dt);
                    }
                });
            });
            time_scope!(timing, "Velocity update", {
                reduce_property::<VelocityCorrectionNotification>(cluster);
                broadcast_property::<VelocityUpdateNotification>(cluster, &self.relaxation_parameter);
            });
        }

        time_scope!(timing, "Integration", {
            cluster.for_each_rank(|domain| {
                for p in domain.particles.iter_mut() {
                    IntegrateParticlesForHcsits.apply(p, dt);
                }
            });
        });
    }
}

/// Soft-contact solver with per-contact spring-dashpot coefficients.
#[derive(Debug, Clone, Copy)]
pub struct DemSolver {
    pub collision: LinearSpringDashpot,
    pub restitution: f64,
    pub collision_time: f64,
    pub kappa: f64,
    gravity: f64,
}

impl DemSolver {
    pub fn step(&self, cluster: &mut Cluster, dt: f64, timing: &mut TimingTree) {
        let solver = *self;
        time_scope!(timing, "Collision", {
            cluster.for_each_rank(|domain| {
                let mut law = solver.collision;
                for c in domain.contacts.iter() {
                    let (p1, p2) = domain.particles.pair_mut(c.id1, c.id2);
                    law.set_stiffness_and_damping(
                        solver.restitution,
                        solver.collision_time,
                        solver.kappa,
                        effective_mass(p1, p2),
                    );
                    law.apply(c, p1, p2, dt);
                }
            });
        });

        time_scope!(timing, "Apply gravity", {
            let gravity = DVec3::new(0.0, 0.0, -self.gravity);
            cluster.for_each_rank(|domain| {
                for p in domain.particles.locals_mut().filter(|p| !p.flags.fixed) {
                    p.force += gravity * p.mass();
                }
            });
        });

        time_scope!(timing, "Reduce", {
            reduce_and_swap_contact_history(cluster);
            reduce_property::<ForceTorqueNotification>(cluster);
        });

        let euler = SemiImplicitEuler::new(dt);
        time_scope!(timing, "Integration", {
            cluster.for_each_rank(|domain| {
                for p in domain.particles.iter_mut() {
                    euler.apply(p);
                }
            });
        });
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SolverDispatcher {
    Hcsits(HcsitsSolver),
    Dem(DemSolver),
}

impl SolverDispatcher {
    pub fn from_settings(settings: &Settings, physics: &Physics) -> Self {
        let s = &settings.solver;
        match settings.packing.solver {
            SolverKind::Hcsits => Self::Hcsits(HcsitsSolver {
                init_contacts: InitContactsForHcsits {
                    friction: s.friction_coefficient_dynamic,
                    erp: s.hcsits.error_reduction_parameter,
                },
                init_particles: InitParticlesForHcsits {
                    global_acceleration: DVec3::new(0.0, 0.0, -physics.reduced_gravity),
                },
                relaxation: HcsitsRelaxationStep::new(s.hcsits.relaxation_model, s.coefficient_of_restitution),
                relaxation_parameter: s.hcsits.relaxation_parameter,
                iterations: s.hcsits.number_of_iterations,
                gravity: physics.reduced_gravity,
            }),
            SolverKind::Dem => Self::Dem(DemSolver {
                collision: LinearSpringDashpot::new(s.friction_coefficient_static, s.friction_coefficient_dynamic),
                restitution: s.coefficient_of_restitution,
                collision_time: s.dem.collision_time,
                kappa: physics.kappa,
                gravity: physics.reduced_gravity,
            }),
        }
    }

    /// Timer name of the solver scope.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hcsits(_) => "HCSITS",
            Self::Dem(_) => "DEM",
        }
    }

    /// Applies the horizontal shaking acceleration for this step. DEM
    /// turns it into a force on owned particles; HCSITS folds it into the
    /// global acceleration, which falls back to gravity alone once shaking
    /// stops.
    pub fn apply_shaking(&mut self, cluster: &mut Cluster, acceleration: Option<f64>) {
        match self {
            Self::Hcsits(hcsits) => {
                hcsits.init_particles.global_acceleration =
                    DVec3::new(acceleration.unwrap_or(0.0), 0.0, -hcsits.gravity);
            }
            Self::Dem(_) => {
                if let Some(a) = acceleration {
                    let push = DVec3::new(a, 0.0, 0.0);
                    cluster.for_each_rank(|domain| {
                        for p in domain.particles.locals_mut().filter(|p| !p.flags.fixed) {
                            p.force += push * p.mass();
                        }
                    });
                }
            }
        }
    }

    pub fn step(&self, cluster: &mut Cluster, dt: f64, timing: &mut TimingTree) {
        match self {
            Self::Hcsits(hcsits) => hcsits.step(cluster, dt, timing),
            Self::Dem(dem) => dem.step(cluster, dt, timing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::ContactPipeline;
    use approx::assert_relative_eq;
    use settle_core::data::{Particle, Shape};
    use settle_core::kernel::RelaxationModel;
    use settle_core::math::Aabb;
    use settle_net::BlockForest;
    use std::sync::Arc;

    fn cluster() -> Cluster {
        let forest = BlockForest::new(
            Aabb::new(DVec3::new(-5.0, -5.0, 0.0), DVec3::new(5.0, 5.0, 10.0)),
            [1, 1, 1],
            [false; 3],
            1,
        );
        Cluster::new(forest, false)
    }

    fn add(cluster: &mut Cluster, position: DVec3) {
        let domain = &mut cluster.ranks_mut()[0];
        let uid = domain.particles.next_uid();
        domain.particles.insert(Particle::new(
            uid,
            0,
            position,
            Arc::new(Shape::Sphere { radius: 0.5 }),
            0.5,
            1.0,
        ));
    }

    fn settings(solver: SolverKind) -> Settings {
        let mut s = Settings::default();
        s.packing.solver = solver;
        s.solver.hcsits.relaxation_model = RelaxationModel::InelasticFrictionlessContact;
        s.solver.hcsits.number_of_iterations = 1;
        s.solver.hcsits.relaxation_parameter = 1.0;
        s
    }

    fn dispatcher(s: &Settings) -> SolverDispatcher {
        SolverDispatcher::from_settings(s, &Physics::from_settings(s))
    }

    fn detect(c: &mut Cluster) {
        let mut pipeline = ContactPipeline::new(c, false, 1.0);
        pipeline.rebuild(c);
        pipeline.detect(c);
    }

    #[test]
    fn free_fall_follows_reduced_gravity() {
        for kind in [SolverKind::Hcsits, SolverKind::Dem] {
            let s = settings(kind);
            let mut c = cluster();
            add(&mut c, DVec3::new(0.0, 0.0, 5.0));
            let solver = dispatcher(&s);
            let mut timing = TimingTree::new();
            solver.step(&mut c, 0.01, &mut timing);
            let g = Physics::from_settings(&s).reduced_gravity;
            let p = &c.ranks()[0].particles.as_slice()[0];
            assert_relative_eq!(p.linear_velocity.z, -g * 0.01, epsilon = 1e-12);
            assert_relative_eq!(p.position.z, 5.0 - g * 0.01 * 0.01, epsilon = 1e-12);
            assert!(p.force.length() == 0.0, "{}", solver.name());
        }
    }

    #[test]
    fn resting_contact_does_not_approach_after_one_sweep() {
        let s = settings(SolverKind::Hcsits);
        let mut c = cluster();
        add(&mut c, DVec3::new(0.0, 0.0, 5.0));
        add(&mut c, DVec3::new(0.0, 0.0, 5.999));
        detect(&mut c);
        assert_eq!(c.num_contacts(), 1);

        let solver = dispatcher(&s);
        solver.step(&mut c, 0.01, &mut TimingTree::new());
        let contact = c.ranks()[0].contacts.as_slice()[0].clone();
        let particles = c.ranks()[0].particles.as_slice();
        let relative = particles[contact.id1].linear_velocity - particles[contact.id2].linear_velocity;
        assert!(contact.normal.dot(relative) >= -1e-9);
    }

    #[test]
    fn dem_pushes_overlapping_spheres_apart() {
        let s = settings(SolverKind::Dem);
        let mut c = cluster();
        add(&mut c, DVec3::new(0.0, 0.0, 5.0));
        add(&mut c, DVec3::new(0.9, 0.0, 5.0));
        detect(&mut c);
        dispatcher(&s).step(&mut c, 1e-4, &mut TimingTree::new());
        let particles = c.ranks()[0].particles.as_slice();
        assert!(particles[0].linear_velocity.x < 0.0);
        assert!(particles[1].linear_velocity.x > 0.0);
    }

    #[test]
    fn shaking_accelerates_horizontally() {
        for kind in [SolverKind::Hcsits, SolverKind::Dem] {
            let s = settings(kind);
            let mut c = cluster();
            add(&mut c, DVec3::new(0.0, 0.0, 5.0));
            let mut solver = dispatcher(&s);
            solver.apply_shaking(&mut c, Some(2.0));
            solver.step(&mut c, 0.01, &mut TimingTree::new());
            let v = c.ranks()[0].particles.as_slice()[0].linear_velocity;
            assert_relative_eq!(v.x, 0.02, epsilon = 1e-12);
        }
    }

    #[test]
    fn hcsits_shaking_stops_with_the_shaking_phase() {
        let s = settings(SolverKind::Hcsits);
        let mut c = cluster();
        let mut solver = dispatcher(&s);
        solver.apply_shaking(&mut c, Some(2.0));
        solver.apply_shaking(&mut c, None);
        let SolverDispatcher::Hcsits(h) = solver else {
            unreachable!()
        };
        assert_eq!(h.init_particles.global_acceleration.x, 0.0);
        assert!(h.init_particles.global_acceleration.z < 0.0);
    }

    #[test]
    fn timing_tree_records_solver_phases() {
        let s = settings(SolverKind::Dem);
        let mut c = cluster();
        add(&mut c, DVec3::new(0.0, 0.0, 5.0));
        let mut timing = TimingTree::new();
        timing.start("DEM");
        dispatcher(&s).step(&mut c, 0.01, &mut timing);
        timing.stop("DEM");
        let names: Vec<String> = timing.flatten().into_iter().map(|(name, _, _)| name).collect();
        assert!(names.iter().any(|n| n.ends_with("Collision")));
        assert!(names.iter().any(|n| n.ends_with("Integration")));
    }
}
