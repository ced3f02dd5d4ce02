use super::particle::{Particle, ParticleUid, Rank};
use crate::math::IVec3;
use std::collections::HashMap;

/// Per-rank particle container.
///
/// Replicas are keyed by `(uid, image)`: the same uid can be present more
/// than once on a rank when it is seen through different periodic images.
#[derive(Debug, Clone, Default)]
pub struct ParticleStorage {
    rank: Rank,
    next_counter: u64,
    particles: Vec<Particle>,
    lookup: HashMap<(ParticleUid, IVec3), usize>,
}

impl ParticleStorage {
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            ..Default::default()
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn next_uid(&mut self) -> ParticleUid {
        let uid = ParticleUid::from_parts(self.rank, self.next_counter);
        self.next_counter += 1;
        uid
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Inserts a replica, replacing any existing one with the same key.
    pub fn insert(&mut self, particle: Particle) -> usize {
        let key = (particle.uid, particle.image);
        if let Some(&idx) = self.lookup.get(&key) {
            self.particles[idx] = particle;
            return idx;
        }
        let idx = self.particles.len();
        self.particles.push(particle);
        self.lookup.insert(key, idx);
        idx
    }

    pub fn find(&self, uid: ParticleUid, image: IVec3) -> Option<usize> {
        self.lookup.get(&(uid, image)).copied()
    }

    pub fn get(&self, idx: usize) -> Option<&Particle> {
        self.particles.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Particle> {
        self.particles.get_mut(idx)
    }

    pub fn as_slice(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable access to the particles. Keys must not be changed through
    /// this slice; use [`ParticleStorage::reindex`] afterwards if they are.
    pub fn as_mut_slice(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        self.particles.iter_mut()
    }

    pub fn locals(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter().filter(|p| p.is_local())
    }

    pub fn locals_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        self.particles.iter_mut().filter(|p| p.is_local())
    }

    /// Two distinct particles at once.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> (&mut Particle, &mut Particle) {
        assert_ne!(a, b, "pair_mut needs two distinct indices");
        if a < b {
            let (lo, hi) = self.particles.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.particles.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }

    pub fn remove(&mut self, idx: usize) -> Particle {
        let removed = self.particles.swap_remove(idx);
        self.lookup.remove(&(removed.uid, removed.image));
        if let Some(moved) = self.particles.get(idx) {
            self.lookup.insert((moved.uid, moved.image), idx);
        }
        removed
    }

    pub fn retain(&mut self, keep: impl FnMut(&Particle) -> bool) {
        self.particles.retain(keep);
        self.reindex();
    }

    pub fn remove_ghosts(&mut self) {
        self.retain(|p| !p.is_ghost());
    }

    /// Reorders particles by a key, e.g. their linked-cell index.
    pub fn sort_by_key<K: Ord>(&mut self, mut key: impl FnMut(&Particle) -> K) {
        self.particles.sort_by_cached_key(|p| key(p));
        self.reindex();
    }

    pub fn reindex(&mut self) {
        self.lookup.clear();
        for (idx, p) in self.particles.iter().enumerate() {
            self.lookup.insert((p.uid, p.image), idx);
        }
    }
}
