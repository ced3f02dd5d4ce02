//! Cross-rank invariants: ghost replicas mirror their owners and every
//! contact is resolved by exactly one rank, for any rank count.

use approx::assert_abs_diff_eq;
use settle_core::data::{Particle, ParticleUid, Shape};
use settle_core::math::{Aabb, DVec3, IVec3};
use settle_net::{BlockForest, Cluster, SyncStrategy};
use settle_runtime::contacts::ContactPipeline;
use std::collections::BTreeSet;
use std::sync::Arc;

type ReplicaKey = (u64, [i32; 3]);

/// 4 x 4 x 4 box, periodic in x and y, split into 2 x 2 x 1 blocks.
fn periodic_cluster(ranks: usize) -> Cluster {
    let forest = BlockForest::new(
        Aabb::new(DVec3::new(-2.0, -2.0, 0.0), DVec3::new(2.0, 2.0, 4.0)),
        [2, 2, 1],
        [true, true, false],
        ranks,
    );
    Cluster::new(forest, false)
}

fn add_sphere(cluster: &mut Cluster, position: DVec3, radius: f64) -> ParticleUid {
    let owner = cluster.forest().owner_of(position);
    let storage = &mut cluster.ranks_mut()[owner].particles;
    let uid = storage.next_uid();
    storage.insert(Particle::new(uid, owner, position, Arc::new(Shape::Sphere { radius }), radius, 1.0));
    uid
}

/// 8 x 8 x 4 lattice with spacing 0.5 and radius 0.3: every axis neighbour
/// touches, including across the periodic faces, and no contact point lies
/// on a block face.
fn lattice(cluster: &mut Cluster) {
    for i in 0..8 {
        for j in 0..8 {
            for k in 0..4 {
                let position = DVec3::new(-1.6 + 0.5 * i as f64, -1.6 + 0.5 * j as f64, 0.5 + 0.5 * k as f64);
                add_sphere(cluster, position, 0.3);
            }
        }
    }
}

fn key(p: &Particle) -> ReplicaKey {
    (p.uid.0, p.image.to_array())
}

/// All contacts of all ranks as unordered replica pairs.
fn contact_keys(cluster: &Cluster) -> Vec<(ReplicaKey, ReplicaKey)> {
    let mut out = Vec::new();
    for domain in cluster.ranks() {
        let particles = domain.particles.as_slice();
        for c in domain.contacts.iter() {
            let (a, b) = (key(&particles[c.id1]), key(&particles[c.id2]));
            out.push(if a < b { (a, b) } else { (b, a) });
        }
    }
    out.sort();
    out
}

/// Contacts reduced to the unordered pair of physical particles.
fn particle_pairs(cluster: &Cluster) -> Vec<(u64, u64)> {
    let mut pairs: Vec<(u64, u64)> = contact_keys(cluster)
        .into_iter()
        .map(|((a, _), (b, _))| (a.min(b), a.max(b)))
        .collect();
    pairs.sort();
    pairs
}

fn detect(cluster: &mut Cluster, use_hash_grids: bool, max_diameter: f64) -> ContactPipeline {
    let mut pipeline = ContactPipeline::new(cluster, use_hash_grids, max_diameter);
    pipeline.rebuild(cluster);
    pipeline.detect(cluster);
    pipeline
}

fn assert_ghosts_mirror_owners(cluster: &Cluster) -> usize {
    let forest = cluster.forest();
    let mut ghosts = 0;
    let mut locals = BTreeSet::new();
    for domain in cluster.ranks() {
        for p in domain.particles.iter() {
            if p.is_local() {
                assert_eq!(p.owner, domain.rank);
                assert_eq!(p.image, IVec3::ZERO);
                assert!(locals.insert(p.uid.0), "particle {} owned twice", p.uid.0);
                continue;
            }
            ghosts += 1;
            let owners = &cluster.ranks()[p.owner].particles;
            let idx = owners
                .find(p.uid, IVec3::ZERO)
                .unwrap_or_else(|| panic!("ghost {} has no owner on rank {}", p.uid.0, p.owner));
            let owner = &owners.as_slice()[idx];
            assert!(owner.is_local());
            let expected = owner.position + forest.image_offset(p.image);
            assert_abs_diff_eq!(p.position.x, expected.x, epsilon = 1e-12);
            assert_abs_diff_eq!(p.position.y, expected.y, epsilon = 1e-12);
            assert_abs_diff_eq!(p.position.z, expected.z, epsilon = 1e-12);
            assert_eq!(p.linear_velocity, owner.linear_velocity);
        }
    }
    ghosts
}

#[test]
fn contact_across_periodic_face_is_resolved_once() {
    for ranks in [1, 2, 4] {
        for use_hash_grids in [false, true] {
            let mut cluster = periodic_cluster(ranks);
            let a = add_sphere(&mut cluster, DVec3::new(-2.0, 0.8, 2.0), 1.0);
            let b = add_sphere(&mut cluster, DVec3::new(1.1, 0.8, 2.0), 1.0);
            let sync = SyncStrategy::select(cluster.forest().smallest_block_extent(), 2.0);
            assert_eq!(sync, SyncStrategy::NextNeighbor);
            sync.synchronize_after_creation(&mut cluster);

            detect(&mut cluster, use_hash_grids, 2.0);
            assert_eq!(cluster.num_contacts(), 1, "{ranks} ranks, hash grids: {use_hash_grids}");
            let pairs = particle_pairs(&cluster);
            assert_eq!(pairs, vec![(a.0.min(b.0), a.0.max(b.0))]);
            for domain in cluster.ranks() {
                for c in domain.contacts.iter() {
                    assert_abs_diff_eq!(c.distance, -1.1, epsilon = 1e-9);
                    assert_abs_diff_eq!(c.normal.x.abs(), 1.0, epsilon = 1e-12);
                }
            }
        }
    }
}

#[test]
fn particle_never_touches_its_own_image() {
    let mut cluster = periodic_cluster(1);
    add_sphere(&mut cluster, DVec3::new(-2.0, 0.0, 2.0), 1.0);
    SyncStrategy::NextNeighbor.synchronize_after_creation(&mut cluster);
    assert!(cluster.ranks()[0].particles.len() > 1);
    detect(&mut cluster, false, 2.0);
    assert_eq!(cluster.num_contacts(), 0);
}

#[test]
fn lattice_contacts_are_unique_for_any_rank_count() {
    let expected = 8 * 8 * 4 + 8 * 8 * 4 + 8 * 8 * 3;
    let mut reference = None;
    for ranks in [1, 2, 4] {
        let mut cluster = periodic_cluster(ranks);
        lattice(&mut cluster);
        SyncStrategy::NextNeighbor.synchronize_after_creation(&mut cluster);
        detect(&mut cluster, false, 0.6);

        let pairs = particle_pairs(&cluster);
        assert_eq!(pairs.len(), expected, "{ranks} ranks");
        let unique: BTreeSet<_> = pairs.iter().copied().collect();
        assert_eq!(unique.len(), pairs.len(), "{ranks} ranks resolved a contact twice");
        for domain in cluster.ranks() {
            for c in domain.contacts.iter() {
                assert_ne!(c.id1, c.id2);
                assert!(c.id1 < domain.particles.len() && c.id2 < domain.particles.len());
            }
        }

        // Uids are assigned per rank, so compare the geometry instead.
        let mut depths: Vec<i64> = cluster
            .ranks()
            .iter()
            .flat_map(|d| d.contacts.iter().map(|c| (c.distance * 1e9).round() as i64))
            .collect();
        depths.sort();
        match &reference {
            None => reference = Some(depths),
            Some(r) => assert_eq!(r, &depths),
        }
    }
}

#[test]
fn repeated_detection_yields_the_same_contacts() {
    for use_hash_grids in [false, true] {
        let mut cluster = periodic_cluster(2);
        lattice(&mut cluster);
        SyncStrategy::NextNeighbor.synchronize_after_creation(&mut cluster);

        let pipeline = detect(&mut cluster, use_hash_grids, 0.6);
        let first = contact_keys(&cluster);
        let mut pipeline = pipeline;
        pipeline.rebuild(&mut cluster);
        pipeline.detect(&mut cluster);
        assert_eq!(first, contact_keys(&cluster));
        assert!(!first.is_empty());
    }
}

#[test]
fn broad_phases_agree() {
    let mut cluster = periodic_cluster(4);
    lattice(&mut cluster);
    SyncStrategy::NextNeighbor.synchronize_after_creation(&mut cluster);
    detect(&mut cluster, false, 0.6);
    let cells = contact_keys(&cluster);
    detect(&mut cluster, true, 0.6);
    assert_eq!(cells, contact_keys(&cluster));
}

#[test]
fn ghosts_mirror_owners_after_every_sync() {
    let strategies = [SyncStrategy::NextNeighbor, SyncStrategy::GhostOwners { passes: 2 }];
    for sync in strategies {
        for ranks in [1, 2, 4] {
            let mut cluster = periodic_cluster(ranks);
            lattice(&mut cluster);
            sync.synchronize_after_creation(&mut cluster);
            assert!(assert_ghosts_mirror_owners(&cluster) > 0);

            // Drift diagonally so particles cross block and periodic faces.
            for _ in 0..5 {
                cluster.for_each_rank(|domain| {
                    for p in domain.particles.locals_mut() {
                        p.linear_velocity = DVec3::new(0.5, -0.3, 0.0);
                        p.position += p.linear_velocity * 0.4;
                    }
                });
                sync.synchronize(&mut cluster);
                assert_ghosts_mirror_owners(&cluster);
            }
            assert_eq!(cluster.num_local_particles(), 8 * 8 * 4);

            let domain = cluster.forest().domain();
            for d in cluster.ranks() {
                for p in d.particles.locals() {
                    assert!(p.position.x >= domain.min.x && p.position.x < domain.max.x);
                    assert!(p.position.y >= domain.min.y && p.position.y < domain.max.y);
                }
            }
        }
    }
}

#[test]
fn face_particle_gets_a_periodic_image() {
    let mut cluster = periodic_cluster(2);
    let uid = add_sphere(&mut cluster, DVec3::new(-1.9, 1.0, 2.0), 0.3);
    SyncStrategy::NextNeighbor.synchronize_after_creation(&mut cluster);
    let images: Vec<IVec3> = cluster
        .ranks()
        .iter()
        .flat_map(|d| d.particles.iter().filter(|p| p.uid == uid).map(|p| p.image))
        .collect();
    assert!(images.contains(&IVec3::ZERO));
    assert!(images.contains(&IVec3::new(1, 0, 0)));
    assert_ghosts_mirror_owners(&cluster);
}
