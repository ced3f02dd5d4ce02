//! End-to-end runs of the packing controller on small domains.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use settle_core::math::IVec3;
use settle_net::SyncStrategy;
use settle_runtime::{Phase, Simulation};
use settle_services::settings::{DomainSetup, SolverKind};
use settle_services::{RunStore, Settings};
use std::path::PathBuf;

/// 4 x 4 x 8 cylinder, unit spheres, DEM, one rank, quiet.
fn small_container() -> Settings {
    let mut s = Settings::default();
    let p = &mut s.packing;
    p.domain_setup = DomainSetup::Container;
    p.domain_width = 4.0;
    p.domain_height = 8.0;
    p.solver = SolverKind::Dem;
    p.initial_velocity = 0.0;
    p.initial_generation_height_ratio_start = 0.05;
    p.initial_generation_height_ratio_end = 0.4;
    p.generation_height_ratio_start = 0.6;
    p.generation_height_ratio_end = 0.9;
    p.num_blocks_per_direction = [1, 1, 1];
    p.num_ranks = 1;
    p.info_spacing = 0.0;
    p.logging_spacing = 0.0;
    p.particle_sorting_spacing = 50;
    s
}

/// Mass and particle count of the initial fill.
fn initial_batch(settings: &Settings) -> (f64, u64) {
    let sim = Simulation::new(settings.clone()).unwrap();
    let info = *sim.last_info();
    (info.mass(settings.packing.particle_density), info.num_particles)
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("settle_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Checks that every ghost carries the state of its owner, shifted by its
/// periodic image, and returns the number of ghosts.
fn assert_replicas_match_owners(sim: &Simulation) -> usize {
    let cluster = sim.cluster();
    let mut ghosts = 0;
    for domain in cluster.ranks() {
        for ghost in domain.particles.iter().filter(|p| p.is_ghost()) {
            ghosts += 1;
            let owners = &cluster.ranks()[ghost.owner].particles;
            let idx = owners
                .find(ghost.uid, IVec3::ZERO)
                .unwrap_or_else(|| panic!("ghost {:?} lost its owner", ghost.uid));
            let owner = &owners.as_slice()[idx];
            let expected = owner.position + cluster.forest().image_offset(ghost.image);
            assert_abs_diff_eq!(ghost.position.x, expected.x, epsilon = 1e-12);
            assert_abs_diff_eq!(ghost.position.y, expected.y, epsilon = 1e-12);
            assert_abs_diff_eq!(ghost.position.z, expected.z, epsilon = 1e-12);
            assert_eq!(ghost.linear_velocity, owner.linear_velocity);
            assert_eq!(ghost.angular_velocity, owner.angular_velocity);
            assert_eq!(ghost.rotation, owner.rotation);
        }
    }
    ghosts
}

#[test]
fn shipped_config_is_valid() {
    let settings = Settings::from_json(include_str!("../../../configs/packing.json")).unwrap();
    assert_eq!(settings.packing.solver, SolverKind::Hcsits);
    assert_eq!(settings.packing.num_ranks, 3);
}

#[test]
fn dem_container_generates_up_to_target_mass_and_stays_inside() {
    let mut settings = small_container();
    let (batch_mass, batch_count) = initial_batch(&settings);
    assert!(batch_count > 0);

    let target = 1.5 * batch_mass;
    settings.packing.total_particle_mass = target;
    settings.packing.max_timesteps = Some(300);
    let mut sim = Simulation::new(settings.clone()).unwrap();
    sim.run().unwrap();

    let height = settings.packing.domain_height;
    for domain in sim.cluster().ranks() {
        for p in domain.particles.locals() {
            assert!(p.position.z > 0.0 && p.position.z < height, "particle left the domain: {:?}", p.position);
            assert!(p.position.is_finite());
        }
    }
    assert_ne!(sim.lifecycle().phase(), Phase::Generating);
    assert_eq!(sim.counters().get("generation_events"), 2);

    let summary = sim.finalize().unwrap();
    assert_eq!(summary.particles.num_particles, 2 * batch_count);
    let mass = summary.particles.mass(settings.packing.particle_density);
    assert!(mass >= target && mass < target + batch_mass);
    assert_relative_eq!(
        summary.particles.particle_volume,
        2.0 * batch_count as f64 * std::f64::consts::PI / 6.0,
        epsilon = 1e-9
    );
    assert!(summary.particles.maximum_height < height);
}

#[test]
fn shaking_starts_once_after_generation_and_ends_after_its_duration() {
    let mut settings = small_container();
    let (batch_mass, _) = initial_batch(&settings);
    settings.packing.total_particle_mass = 0.5 * batch_mass;
    settings.packing.shaking = true;
    settings.shaking.amplitude = 0.05;
    settings.shaking.period = 0.1;
    settings.shaking.duration = 2.0;
    settings.shaking.active_from_beginning = false;

    let mut sim = Simulation::new(settings.clone()).unwrap();
    assert!(!sim.lifecycle().is_shaking_active());

    let dt = settings.solver.dt;
    let mut switched_on = Vec::new();
    let mut switched_off = Vec::new();
    let mut active = false;
    for _ in 0..420 {
        let time = sim.time().current_time();
        sim.step().unwrap();
        let now = sim.lifecycle().is_shaking_active();
        if now && !active {
            switched_on.push(time);
        }
        if !now && active {
            switched_off.push(time);
        }
        active = now;
    }

    assert_eq!(switched_on, vec![0.0]);
    assert_eq!(switched_off.len(), 1);
    let off = switched_off[0];
    assert!(off > 2.0 && off - dt <= 2.0 + 1e-9, "shaking ended at {off}");
    assert_eq!(sim.lifecycle().phase(), Phase::DampingAndChecking);
}

#[test]
fn periodic_generation_never_breaches_the_safety_radius() {
    for (diameter_factor, spacing) in [(1.5, 1.6), (3.0, 2.2)] {
        let mut settings = Settings::default();
        let p = &mut settings.packing;
        p.domain_setup = DomainSetup::Periodic;
        p.domain_width = 4.0;
        p.domain_height = 8.0;
        p.num_blocks_per_direction = [1, 1, 1];
        p.num_ranks = 1;
        p.generation_spacing = spacing;
        p.info_spacing = 0.0;
        p.logging_spacing = 0.0;
        let limit = 0.25 * p.domain_width;
        settings.distribution.uniform.diameter = diameter_factor * limit;

        let sim = Simulation::new(settings).unwrap();
        let mut count = 0;
        for domain in sim.cluster().ranks() {
            for particle in domain.particles.locals() {
                count += 1;
                assert!(particle.interaction_radius <= limit + 1e-12);
                assert!(particle.shape.bounding_radius() <= limit + 1e-12);
            }
        }
        assert!(count > 0);

        let clamps = sim.counters().get("interaction_radius_clamps");
        if 0.5 * diameter_factor * limit > limit {
            assert_eq!(clamps, count);
        } else {
            assert_eq!(clamps, 0);
        }
        assert!(sim.sizing().max_diameter() <= 2.0 * limit);
        assert_eq!(sim.sync_strategy(), SyncStrategy::NextNeighbor);
    }
}

#[test]
fn hcsits_run_keeps_contacts_shallow() {
    let mut settings = small_container();
    settings.packing.solver = SolverKind::Hcsits;
    settings.packing.total_particle_mass = 1.0;
    settings.packing.max_timesteps = Some(200);
    let mut sim = Simulation::new(settings).unwrap();
    sim.run().unwrap();
    let summary = sim.finalize().unwrap();
    assert!(summary.particles.maximum_height < 8.0);
    // Settled unit spheres overlap by a small fraction of their diameter.
    assert!(summary.contacts.maximum_penetration_depth < 0.2);
}

#[test]
fn finished_run_writes_profiles_and_store_record() {
    let dir = scratch_dir("outputs");
    let mut settings = small_container();
    settings.packing.total_particle_mass = 1.0;
    settings.packing.max_timesteps = Some(20);
    settings.packing.logging_spacing = 0.02;
    settings.evaluation.porosity_profile_folder = Some(dir.join("profiles"));
    settings.evaluation.final_folder = Some(dir.join("final"));
    settings.evaluation.store_file = Some(dir.join("runs.jsonl"));

    let mut sim = Simulation::new(settings).unwrap();
    sim.run().unwrap();
    let summary = sim.finalize().unwrap();
    assert_eq!(summary.timesteps, 20);
    assert!(!summary.terminated);

    let id = &summary.run_id;
    for name in ["logging.txt", "layers.txt", "contact_layers.txt", "particle_info.txt"] {
        let path = dir.join("profiles").join(format!("{id}_{name}"));
        assert!(path.exists(), "missing {}", path.display());
    }
    assert!(dir.join("final").join(format!("{id}_settings.json")).exists());
    assert!(dir.join("final").join(format!("{id}_20.json")).exists());

    let runs = RunStore::new(dir.join("runs.jsonl")).load_all().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(Some(runs[0].run_id), summary.stored_run);
    let record = &runs[0].record;
    assert_eq!(record.integers["timesteps"], 20);
    assert_eq!(record.integers["numParticles"], summary.particles.num_particles as i64);
    assert_eq!(record.strings["file_identifier"], *id);
    assert!(record.strings.contains_key("evaluation_flatness_bins"));
    assert!(record.strings.contains_key("evaluation_equancy_histogramData"));
    assert!(!record.reals.contains_key("maxAllowedInteractionRadius"));
    assert!(record.timing.iter().any(|t| t.path == "Simulation"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn split_runs_keep_replicas_in_step_and_finish_like_a_single_rank() {
    const MAX_STEPS: u64 = 4000;
    for solver in [SolverKind::Dem, SolverKind::Hcsits] {
        let mut settings = small_container();
        settings.packing.solver = solver;
        let (batch_mass, _) = initial_batch(&settings);
        settings.packing.total_particle_mass = 0.5 * batch_mass;
        settings.packing.max_timesteps = Some(MAX_STEPS);

        let mut single = Simulation::new(settings.clone()).unwrap();
        single.run().unwrap();

        settings.packing.num_blocks_per_direction = [2, 2, 1];
        settings.packing.num_ranks = 4;
        let mut split = Simulation::new(settings).unwrap();
        let mut max_ghosts = assert_replicas_match_owners(&split);
        while !split.is_terminated() && split.time().timestep() < MAX_STEPS {
            split.step().unwrap();
            max_ghosts = max_ghosts.max(assert_replicas_match_owners(&split));
        }

        assert!(max_ghosts > 0, "{solver:?}: no particle near a block face");
        assert_eq!(single.lifecycle().phase(), Phase::Terminated, "{solver:?}");
        assert_eq!(split.lifecycle().phase(), Phase::Terminated, "{solver:?}");
        assert_eq!(split.cluster().num_local_particles(), single.cluster().num_local_particles());
        assert_relative_eq!(
            split.last_info().particle_volume,
            single.last_info().particle_volume,
            epsilon = 1e-9
        );
        for domain in split.cluster().ranks() {
            for p in domain.particles.locals() {
                assert!(p.position.z > 0.0 && p.position.z < 8.0, "{solver:?}: {:?}", p.position);
            }
        }
    }
}
