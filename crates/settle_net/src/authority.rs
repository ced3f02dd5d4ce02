//! Contact authority
//!
//! Decides which rank resolves a contact so that every physical contact is
//! handled exactly once cluster-wide.

use crate::block::BlockForest;
use crate::Rank;
use settle_core::data::Particle;
use settle_core::math::DVec3;

pub struct ContactFilter<'a> {
    forest: &'a BlockForest,
    rank: Rank,
}

impl<'a> ContactFilter<'a> {
    pub fn new(forest: &'a BlockForest, rank: Rank) -> Self {
        Self { forest, rank }
    }

    /// Contacts with a wall belong to the owner of the finite particle.
    /// Otherwise the rank whose blocks contain the contact point (without
    /// periodic mapping) is responsible. Two replicas of the same particle
    /// never form a contact.
    pub fn owns(&self, p1: &Particle, p2: &Particle, contact_point: DVec3) -> bool {
        if p1.uid == p2.uid {
            return false;
        }
        match (p1.is_infinite(), p2.is_infinite()) {
            (true, true) => false,
            (true, false) => p2.is_local(),
            (false, true) => p1.is_local(),
            (false, false) => self.forest.is_point_in_rank(self.rank, contact_point),
        }
    }
}
