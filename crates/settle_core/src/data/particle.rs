use super::shape::Shape;
use crate::math::{DMat3, DQuat, DVec3, IVec3};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Index of a rank within the cluster.
pub type Rank = usize;

/// Globally unique particle identifier.
///
/// Locally created particles carry the creating rank in the upper bits so
/// ranks can allocate without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleUid(pub u64);

impl ParticleUid {
    const RANK_SHIFT: u32 = 40;
    const GLOBAL_BASE: u64 = u64::MAX - (1 << 20);

    pub fn from_parts(rank: Rank, counter: u64) -> Self {
        Self(((rank as u64) << Self::RANK_SHIFT) | counter)
    }

    /// Identifier for global (replicated on every rank) particles.
    pub fn global(counter: u64) -> Self {
        Self(Self::GLOBAL_BASE + counter)
    }
}

impl fmt::Display for ParticleUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticleFlags {
    pub ghost: bool,
    pub infinite: bool,
    /// Present on every rank; never migrated or ghosted.
    pub global: bool,
    /// Excluded from integration.
    pub fixed: bool,
}

/// Tangential spring state of one contact, seen from the particle with
/// the smaller uid.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContactHistory {
    pub tangential_spring: DVec3,
}

#[derive(Debug, Clone)]
pub struct Particle {
    pub uid: ParticleUid,
    pub owner: Rank,
    /// Periodic image this replica represents; zero for the owned particle.
    pub image: IVec3,
    pub flags: ParticleFlags,

    pub position: DVec3,
    pub rotation: DQuat,
    pub linear_velocity: DVec3,
    pub angular_velocity: DVec3,

    pub shape: Arc<Shape>,
    pub interaction_radius: f64,
    pub inv_mass: f64,
    pub inv_inertia_body: DMat3,

    pub force: DVec3,
    pub torque: DVec3,
    /// HCSITS velocity corrections accumulated this step.
    pub dv: DVec3,
    pub dw: DVec3,
    pub num_contacts: u32,

    pub old_contact_history: HashMap<ParticleUid, ContactHistory>,
    pub new_contact_history: HashMap<ParticleUid, ContactHistory>,

    /// Owner-side registry of `(rank, image)` replicas.
    pub ghost_owners: Vec<(Rank, IVec3)>,
}

impl Particle {
    pub fn new(
        uid: ParticleUid,
        owner: Rank,
        position: DVec3,
        shape: Arc<Shape>,
        interaction_radius: f64,
        density: f64,
    ) -> Self {
        let mass = shape.mass_properties(density);
        let infinite = shape.is_infinite();
        Self {
            uid,
            owner,
            image: IVec3::ZERO,
            flags: ParticleFlags {
                infinite,
                fixed: infinite,
                ..Default::default()
            },
            position,
            rotation: DQuat::IDENTITY,
            linear_velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
            shape,
            interaction_radius,
            inv_mass: mass.inv_mass,
            inv_inertia_body: mass.inv_inertia,
            force: DVec3::ZERO,
            torque: DVec3::ZERO,
            dv: DVec3::ZERO,
            dw: DVec3::ZERO,
            num_contacts: 0,
            old_contact_history: HashMap::new(),
            new_contact_history: HashMap::new(),
            ghost_owners: Vec::new(),
        }
    }

    /// A wall replicated on every rank.
    pub fn global_wall(uid: ParticleUid, position: DVec3, shape: Arc<Shape>) -> Self {
        let mut p = Self::new(uid, 0, position, shape, f64::INFINITY, 0.0);
        p.flags.global = true;
        p
    }

    pub fn is_ghost(&self) -> bool {
        self.flags.ghost
    }

    pub fn is_local(&self) -> bool {
        !self.flags.ghost && !self.flags.global
    }

    pub fn is_infinite(&self) -> bool {
        self.flags.infinite
    }

    pub fn volume(&self) -> f64 {
        self.shape.volume()
    }

    pub fn mass(&self) -> f64 {
        if self.inv_mass > 0.0 {
            1.0 / self.inv_mass
        } else {
            f64::INFINITY
        }
    }

    pub fn inv_inertia_world(&self) -> DMat3 {
        let r = DMat3::from_quat(self.rotation);
        r * self.inv_inertia_body * r.transpose()
    }

    pub fn inertia_world(&self) -> DMat3 {
        if self.inv_mass <= 0.0 || self.inv_inertia_body.determinant().abs() <= f64::MIN_POSITIVE {
            return DMat3::ZERO;
        }
        let r = DMat3::from_quat(self.rotation);
        r * self.inv_inertia_body.inverse() * r.transpose()
    }

    pub fn velocity_at(&self, point: DVec3) -> DVec3 {
        self.linear_velocity + self.angular_velocity.cross(point - self.position)
    }

    pub fn add_force_at(&mut self, force: DVec3, point: DVec3) {
        self.force += force;
        self.torque += (point - self.position).cross(force);
    }

    pub fn clear_forces(&mut self) {
        self.force = DVec3::ZERO;
        self.torque = DVec3::ZERO;
    }
}
