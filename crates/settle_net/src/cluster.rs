//! In-process cluster of ranks
//!
//! Each rank owns its particle and contact storage. Per-rank phases run
//! sequentially or on the rayon pool; cross-rank data only moves through
//! [`Cluster::exchange`], the in-process stand-in for point-to-point
//! messages, and the collectives built on it.

use crate::block::BlockForest;
use crate::Rank;
use rayon::prelude::*;
use settle_core::data::{ContactStorage, Particle, ParticleStorage, ParticleUid, Shape};
use settle_core::math::DVec3;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RankDomain {
    pub rank: Rank,
    pub particles: ParticleStorage,
    pub contacts: ContactStorage,
}

impl RankDomain {
    fn new(rank: Rank) -> Self {
        Self {
            rank,
            particles: ParticleStorage::new(rank),
            contacts: ContactStorage::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cluster {
    forest: BlockForest,
    ranks: Vec<RankDomain>,
    parallel: bool,
    next_global: u64,
}

impl Cluster {
    pub fn new(forest: BlockForest, parallel: bool) -> Self {
        let ranks = (0..forest.num_ranks()).map(RankDomain::new).collect();
        Self {
            forest,
            ranks,
            parallel,
            next_global: 0,
        }
    }

    pub fn forest(&self) -> &BlockForest {
        &self.forest
    }

    pub fn num_ranks(&self) -> usize {
        self.ranks.len()
    }

    pub fn ranks(&self) -> &[RankDomain] {
        &self.ranks
    }

    pub fn ranks_mut(&mut self) -> &mut [RankDomain] {
        &mut self.ranks
    }

    /// Runs `f` on every rank; a phase, not a collective.
    pub fn for_each_rank<F>(&mut self, f: F)
    where
        F: Fn(&mut RankDomain) + Sync + Send,
    {
        if self.parallel {
            self.ranks.par_iter_mut().for_each(f);
        } else {
            self.ranks.iter_mut().for_each(f);
        }
    }

    /// Runs `f` on every rank and collects the results in rank order.
    pub fn map_ranks<T, F>(&mut self, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&mut RankDomain) -> T + Sync + Send,
    {
        if self.parallel {
            self.ranks.par_iter_mut().map(f).collect()
        } else {
            self.ranks.iter_mut().map(f).collect()
        }
    }

    /// Like [`Cluster::map_ranks`] with one input per rank, typically an inbox.
    pub fn map_ranks_with<I, T, F>(&mut self, inputs: Vec<I>, f: F) -> Vec<T>
    where
        I: Send,
        T: Send,
        F: Fn(&mut RankDomain, I) -> T + Sync + Send,
    {
        if self.parallel {
            self.ranks
                .par_iter_mut()
                .zip(inputs.into_par_iter())
                .map(|(domain, input)| f(domain, input))
                .collect()
        } else {
            self.ranks
                .iter_mut()
                .zip(inputs)
                .map(|(domain, input)| f(domain, input))
                .collect()
        }
    }

    /// Delivers `(destination, message)` pairs from each rank's outbox.
    /// Inboxes keep sender order, so delivery is deterministic.
    pub fn exchange<M: Send>(&self, outboxes: Vec<Vec<(Rank, M)>>) -> Vec<Vec<M>> {
        let mut inboxes: Vec<Vec<M>> = (0..self.ranks.len()).map(|_| Vec::new()).collect();
        for outbox in outboxes {
            for (dest, msg) in outbox {
                if let Some(inbox) = inboxes.get_mut(dest) {
                    inbox.push(msg);
                }
            }
        }
        inboxes
    }

    /// Combines one value per rank; every rank would see the same result.
    pub fn all_reduce<T, F, C>(&mut self, local: F, combine: C) -> Option<T>
    where
        T: Send,
        F: Fn(&mut RankDomain) -> T + Sync + Send,
        C: Fn(T, T) -> T,
    {
        self.map_ranks(local).into_iter().reduce(combine)
    }

    pub fn all_reduce_sum<F>(&mut self, local: F) -> f64
    where
        F: Fn(&mut RankDomain) -> f64 + Sync + Send,
    {
        self.all_reduce(local, |a, b| a + b).unwrap_or(0.0)
    }

    pub fn all_reduce_max<F>(&mut self, local: F) -> f64
    where
        F: Fn(&mut RankDomain) -> f64 + Sync + Send,
    {
        self.all_reduce(local, f64::max).unwrap_or(f64::NEG_INFINITY)
    }

    /// Root's value as received by each rank.
    pub fn broadcast_object<T: Clone>(&self, root_value: &T) -> Vec<T> {
        vec![root_value.clone(); self.ranks.len()]
    }

    /// Adds a wall present on every rank; it is never migrated or ghosted.
    pub fn add_global(&mut self, position: DVec3, shape: Arc<Shape>) -> ParticleUid {
        let uid = ParticleUid::global(self.next_global);
        self.next_global += 1;
        for domain in &mut self.ranks {
            let mut wall = Particle::global_wall(uid, position, shape.clone());
            wall.owner = domain.rank;
            domain.particles.insert(wall);
        }
        uid
    }

    pub fn num_local_particles(&self) -> usize {
        self.ranks.iter().map(|r| r.particles.locals().count()).sum()
    }

    pub fn num_contacts(&self) -> usize {
        self.ranks.iter().map(|r| r.contacts.len()).sum()
    }
}
