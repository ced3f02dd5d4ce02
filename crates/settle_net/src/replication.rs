//! Particle re-association and ghost replication
//!
//! One synchronization pass migrates owned particles that left their
//! rank's blocks, then refreshes ghost replicas. The ghost refresh comes in
//! two flavours selected once per run:
//!
//! - next-neighbour: ghosts are rebuilt from scratch from the owners; one
//!   pass suffices when particles are smaller than half a block.
//! - ghost-owners: every replica (owned or ghost) tells the owner which
//!   `(rank, image)` pairs need a copy, reaching one block layer further
//!   per pass. The owner keeps that registry and ghosts nobody asked for
//!   are dropped.

use crate::block::BlockForest;
use crate::cluster::Cluster;
use crate::{BlockId, Rank};
use settle_core::data::{Particle, ParticleUid};
use settle_core::math::IVec3;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    NextNeighbor,
    GhostOwners { passes: usize },
}

impl SyncStrategy {
    /// Next-neighbour sync is enough when every block is more than twice
    /// as large as the biggest particle.
    pub fn select(smallest_block_extent: f64, max_diameter: f64) -> Self {
        if 2.0 * smallest_block_extent > max_diameter {
            SyncStrategy::NextNeighbor
        } else {
            let passes = if smallest_block_extent > 0.0 {
                (max_diameter / smallest_block_extent).ceil().max(1.0) as usize
            } else {
                1
            };
            SyncStrategy::GhostOwners { passes }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncStrategy::NextNeighbor => "next neighbor sync",
            SyncStrategy::GhostOwners { .. } => "ghost owner sync",
        }
    }

    /// Passes needed after particles appear or are re-associated.
    pub fn passes_after_creation(&self) -> usize {
        match self {
            SyncStrategy::NextNeighbor => 1,
            SyncStrategy::GhostOwners { passes } => *passes,
        }
    }

    /// One regular per-step pass.
    pub fn synchronize(&self, cluster: &mut Cluster) {
        migrate(cluster);
        update_ghosts(cluster, matches!(self, SyncStrategy::NextNeighbor));
    }

    pub fn synchronize_after_creation(&self, cluster: &mut Cluster) {
        for _ in 0..self.passes_after_creation() {
            self.synchronize(cluster);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OwnerNotice {
    owner: Rank,
    shift: IVec3,
}

/// Moves owned particles to the rank of the block they are in, wrapping
/// them back into the domain along periodic directions. Returns the number
/// of particles that changed rank.
pub fn migrate(cluster: &mut Cluster) -> usize {
    let forest = cluster.forest().clone();
    let results: Vec<(Vec<(Rank, Particle)>, Vec<(ParticleUid, OwnerNotice)>)> = cluster.map_ranks(|domain| {
        let mut leaving = Vec::new();
        let mut notices = Vec::new();
        let mut i = 0;
        while i < domain.particles.len() {
            let p = &domain.particles.as_slice()[i];
            if !p.is_local() {
                i += 1;
                continue;
            }
            let (mapped, shift) = forest.map_into_domain(p.position);
            let owner = forest.owner_of(mapped);
            if owner == domain.rank && shift == IVec3::ZERO {
                i += 1;
                continue;
            }
            notices.push((p.uid, OwnerNotice { owner, shift }));
            if owner == domain.rank {
                domain.particles.as_mut_slice()[i].position = mapped;
                i += 1;
            } else {
                let mut moved = domain.particles.remove(i);
                moved.position = mapped;
                moved.owner = owner;
                moved.ghost_owners.clear();
                leaving.push((owner, moved));
            }
        }
        (leaving, notices)
    });

    let mut outboxes = Vec::with_capacity(results.len());
    let mut notices: HashMap<ParticleUid, OwnerNotice> = HashMap::new();
    for (leaving, rank_notices) in results {
        outboxes.push(leaving);
        notices.extend(rank_notices);
    }
    let migrated: usize = outboxes.iter().map(Vec::len).sum();
    if notices.is_empty() {
        return 0;
    }

    // Every rank learns about new owners and periodic wraps before the
    // arrivals are inserted, so a ghost that turns into the arriving
    // particle is replaced by it.
    let inboxes = cluster.exchange(outboxes);
    let notices = &notices;
    cluster.map_ranks_with(inboxes, |domain, arrivals| {
        let mut rekeyed = false;
        for p in domain.particles.iter_mut().filter(|p| p.is_ghost()) {
            if let Some(notice) = notices.get(&p.uid) {
                p.owner = notice.owner;
                if notice.shift != IVec3::ZERO {
                    p.image += notice.shift;
                    rekeyed = true;
                }
            }
        }
        if rekeyed {
            domain.particles.reindex();
        }
        for p in arrivals {
            domain.particles.insert(p);
        }
    });
    debug!(migrated, "re-associated particles");
    migrated
}

/// Blocks of `rank` touched by the replica's interaction sphere.
fn touched_blocks(forest: &BlockForest, rank: Rank, p: &Particle) -> Vec<BlockId> {
    forest
        .blocks_of_rank(rank)
        .into_iter()
        .filter(|&b| forest.block_aabb(b).intersects_sphere(p.position, p.interaction_radius))
        .collect()
}

type GhostRequest = (ParticleUid, Rank, IVec3);

fn ghost_requests(forest: &BlockForest, rank: Rank, p: &Particle) -> Vec<(Rank, GhostRequest)> {
    let mut out = Vec::new();
    let mut blocks = touched_blocks(forest, rank, p);
    if p.is_local() {
        let home = forest.block_containing(p.position);
        if !blocks.contains(&home) {
            blocks.push(home);
        }
    } else if !blocks.is_empty() {
        out.push((p.owner, (p.uid, rank, p.image)));
    }
    for block in blocks {
        for (neighbor, wrap) in forest.neighborhood(block) {
            let shifted = p.position - forest.image_offset(wrap);
            if !forest.block_aabb(neighbor).intersects_sphere(shifted, p.interaction_radius) {
                continue;
            }
            let target = (forest.rank_of(neighbor), p.image - wrap);
            if target == (p.owner, IVec3::ZERO) {
                continue;
            }
            out.push((p.owner, (p.uid, target.0, target.1)));
        }
    }
    out
}

fn ghost_copy(forest: &BlockForest, owner: &Particle, image: IVec3) -> Particle {
    let mut copy = owner.clone();
    copy.flags.ghost = true;
    copy.image = image;
    copy.position += forest.image_offset(image);
    copy.ghost_owners.clear();
    copy.new_contact_history.clear();
    copy
}

/// Refreshes ghosts. With `rebuild` all ghosts are dropped first and only
/// owners ask for copies.
pub fn update_ghosts(cluster: &mut Cluster, rebuild: bool) {
    let forest = cluster.forest().clone();
    let forest = &forest;

    let requests = cluster.map_ranks(|domain| {
        let rank = domain.rank;
        domain
            .particles
            .iter()
            .filter(|p| !p.flags.global && (p.is_local() || !rebuild))
            .flat_map(|p| ghost_requests(forest, rank, p))
            .collect::<Vec<_>>()
    });
    let inboxes = cluster.exchange(requests);

    let copies = cluster.map_ranks_with(inboxes, |domain, inbox| {
        let mut registry: HashMap<ParticleUid, Vec<(Rank, IVec3)>> = HashMap::new();
        for (uid, rank, image) in inbox {
            registry.entry(uid).or_default().push((rank, image));
        }
        let mut out = Vec::new();
        for p in domain.particles.locals_mut() {
            let mut targets = registry.remove(&p.uid).unwrap_or_default();
            targets.sort_by_key(|(r, i)| (*r, i.x, i.y, i.z));
            targets.dedup();
            p.ghost_owners = targets;
            for &(rank, image) in &p.ghost_owners {
                out.push((rank, ghost_copy(forest, p, image)));
            }
        }
        out
    });
    let inboxes = cluster.exchange(copies);

    cluster.map_ranks_with(inboxes, |domain, arrivals| {
        if rebuild {
            domain.particles.remove_ghosts();
        }
        let refreshed: HashSet<(ParticleUid, IVec3)> = arrivals.iter().map(|p| (p.uid, p.image)).collect();
        for p in arrivals {
            domain.particles.insert(p);
        }
        if !rebuild {
            domain
                .particles
                .retain(|p| !p.is_ghost() || refreshed.contains(&(p.uid, p.image)));
        }
    });
}
