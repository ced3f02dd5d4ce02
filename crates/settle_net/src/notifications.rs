//! Reduce and broadcast of per-particle properties
//!
//! A reduce sends each ghost's contribution to the owner, which folds it
//! into the authoritative value. A broadcast lets the owner finalize a
//! value and pushes it to every replica in its registry. Within a phase a
//! reduce always precedes the matching broadcast.

use crate::cluster::Cluster;
use crate::Rank;
use settle_core::data::{ContactHistory, Particle, ParticleUid};
use settle_core::kernel::hcsits::apply_velocity_correction;
use settle_core::math::{DVec3, IVec3};
use std::collections::HashMap;

pub trait ReduceProperty: Send + Sized {
    /// Takes the ghost's contribution, leaving the neutral value behind.
    fn extract(ghost: &mut Particle) -> Self;
    fn combine(self, owner: &mut Particle);
}

pub trait BroadcastProperty: Send + Clone + Sized {
    type Params: Sync;
    /// Finalizes the owner's value and returns what replicas receive.
    fn prepare(owner: &mut Particle, params: &Self::Params) -> Self;
    fn apply(&self, replica: &mut Particle);
}

#[derive(Debug, Clone, Copy)]
pub struct NumContactNotification(pub u32);

impl ReduceProperty for NumContactNotification {
    fn extract(ghost: &mut Particle) -> Self {
        Self(std::mem::take(&mut ghost.num_contacts))
    }

    fn combine(self, owner: &mut Particle) {
        owner.num_contacts += self.0;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForceTorqueNotification {
    pub force: DVec3,
    pub torque: DVec3,
}

impl ReduceProperty for ForceTorqueNotification {
    fn extract(ghost: &mut Particle) -> Self {
        let n = Self {
            force: ghost.force,
            torque: ghost.torque,
        };
        ghost.clear_forces();
        n
    }

    fn combine(self, owner: &mut Particle) {
        owner.force += self.force;
        owner.torque += self.torque;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VelocityCorrectionNotification {
    pub dv: DVec3,
    pub dw: DVec3,
}

impl ReduceProperty for VelocityCorrectionNotification {
    fn extract(ghost: &mut Particle) -> Self {
        Self {
            dv: std::mem::take(&mut ghost.dv),
            dw: std::mem::take(&mut ghost.dw),
        }
    }

    fn combine(self, owner: &mut Particle) {
        owner.dv += self.dv;
        owner.dw += self.dw;
    }
}

/// Folds the reduced correction into the owner's velocity, scaled by the
/// relaxation parameter, and ships the result.
#[derive(Debug, Clone, Copy)]
pub struct VelocityUpdateNotification {
    pub linear_velocity: DVec3,
    pub angular_velocity: DVec3,
}

impl BroadcastProperty for VelocityUpdateNotification {
    type Params = f64;

    fn prepare(owner: &mut Particle, relaxation_param: &f64) -> Self {
        apply_velocity_correction(owner, *relaxation_param);
        Self {
            linear_velocity: owner.linear_velocity,
            angular_velocity: owner.angular_velocity,
        }
    }

    fn apply(&self, replica: &mut Particle) {
        replica.linear_velocity = self.linear_velocity;
        replica.angular_velocity = self.angular_velocity;
        replica.dv = DVec3::ZERO;
        replica.dw = DVec3::ZERO;
    }
}

/// Ships the owner's velocities unchanged.
#[derive(Debug, Clone, Copy)]
pub struct ParticleVelocityNotification {
    pub linear_velocity: DVec3,
    pub angular_velocity: DVec3,
}

impl BroadcastProperty for ParticleVelocityNotification {
    type Params = ();

    fn prepare(owner: &mut Particle, _: &()) -> Self {
        Self {
            linear_velocity: owner.linear_velocity,
            angular_velocity: owner.angular_velocity,
        }
    }

    fn apply(&self, replica: &mut Particle) {
        replica.linear_velocity = self.linear_velocity;
        replica.angular_velocity = self.angular_velocity;
    }
}

pub fn reduce_property<N: ReduceProperty>(cluster: &mut Cluster) {
    let outboxes: Vec<Vec<(Rank, (ParticleUid, N))>> = cluster.map_ranks(|domain| {
        domain
            .particles
            .iter_mut()
            .filter(|p| p.is_ghost())
            .map(|p| (p.owner, (p.uid, N::extract(p))))
            .collect()
    });
    let inboxes = cluster.exchange(outboxes);
    cluster.map_ranks_with(inboxes, |domain, inbox| {
        for (uid, value) in inbox {
            let Some(idx) = domain.particles.find(uid, IVec3::ZERO) else {
                continue;
            };
            if let Some(owner) = domain.particles.get_mut(idx).filter(|p| p.is_local()) {
                value.combine(owner);
            }
        }
    });
}

pub fn broadcast_property<N: BroadcastProperty>(cluster: &mut Cluster, params: &N::Params) {
    let outboxes: Vec<Vec<(Rank, (ParticleUid, IVec3, N))>> = cluster.map_ranks(|domain| {
        let mut out = Vec::new();
        for p in domain.particles.locals_mut() {
            let value = N::prepare(p, params);
            for &(rank, image) in &p.ghost_owners {
                out.push((rank, (p.uid, image, value.clone())));
            }
        }
        out
    });
    let inboxes = cluster.exchange(outboxes);
    cluster.map_ranks_with(inboxes, |domain, inbox| {
        for (uid, image, value) in inbox {
            if let Some(replica) = domain.particles.find(uid, image).and_then(|i| domain.particles.get_mut(i)) {
                value.apply(replica);
            }
        }
    });
}

/// Merges the tangential springs written on ghosts into their owners and
/// makes this step's springs the history for the next one.
pub fn reduce_and_swap_contact_history(cluster: &mut Cluster) {
    type Springs = HashMap<ParticleUid, ContactHistory>;
    let outboxes: Vec<Vec<(Rank, (ParticleUid, Springs))>> = cluster.map_ranks(|domain| {
        domain
            .particles
            .iter_mut()
            .filter(|p| p.is_ghost() && !p.new_contact_history.is_empty())
            .map(|p| (p.owner, (p.uid, std::mem::take(&mut p.new_contact_history))))
            .collect()
    });
    let inboxes = cluster.exchange(outboxes);
    cluster.map_ranks_with(inboxes, |domain, inbox| {
        for (uid, springs) in inbox {
            if let Some(owner) = domain.particles.find(uid, IVec3::ZERO).and_then(|i| domain.particles.get_mut(i)) {
                owner.new_contact_history.extend(springs);
            }
        }
        for p in domain.particles.iter_mut() {
            if p.is_ghost() {
                p.new_contact_history.clear();
            } else {
                p.old_contact_history = std::mem::take(&mut p.new_contact_history);
            }
        }
    });
}
