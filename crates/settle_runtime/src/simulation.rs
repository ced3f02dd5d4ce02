//! Simulation controller
//!
//! Owns the cluster and every strategy object resolved from the settings
//! and advances the run one step at a time:
//!
//! 1. sort particles (linked cells only, every `particle_sorting_spacing` steps)
//! 2. write a snapshot when due
//! 3. rebuild contacts, count contacts per particle
//! 4. apply shaking, run the solver, limit velocities
//! 5. synchronize ranks
//! 6. evaluate the aggregate and let the lifecycle decide on generation,
//!    damping and termination
//! 7. log and write the logging file when due

use crate::contacts::{count_contacts, ContactPipeline};
use crate::error::SetupError;
use crate::evaluation::{
    particle_records, ContactInfo, ContactLayers, ParticleAggregateInfo, ParticleHistogram, PorosityProfile,
};
use crate::generator::{GenerationReport, ParticleGenerator, RankGenerator};
use crate::lifecycle::{Lifecycle, LifecycleParams};
use crate::resolve::{add_walls, block_forest, Resolved};
use crate::solver::SolverDispatcher;
use settle_core::kernel::{damp_velocity, limit_velocity};
use settle_core::time::SimulationTime;
use settle_metrics::{time_scope, Counter, StepTimer, TimingTree};
use settle_net::notifications::{broadcast_property, ParticleVelocityNotification};
use settle_net::{Cluster, SyncStrategy};
use settle_services::output::{write_particle_info, write_settings_copy, write_table};
use settle_services::store::TimingEntry;
use settle_services::{LoggingRow, LoggingWriter, RunRecord, RunStore, Settings, SnapshotWriter};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Maximum interaction diameter the broad phase and the sync strategy are
/// sized for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BroadPhaseSizing {
    max_diameter: f64,
    /// Twice the largest allowed interaction radius.
    limit: f64,
    widened: bool,
}

impl BroadPhaseSizing {
    /// Starts from the a-priori estimate and falls back to 1.1 times the
    /// sampled maximum when that is larger. Without any estimate (no
    /// a-priori range and nothing sampled) `fallback` is used.
    pub fn new(a_priori: Option<f64>, sampled_max: f64, limit: f64, fallback: f64) -> Self {
        let mut max_diameter = a_priori.unwrap_or(0.0);
        let mut widened = false;
        if max_diameter < sampled_max {
            info!(
                estimate = max_diameter,
                sampled = sampled_max,
                "Maximum interaction diameter from samples is larger than estimated maximum diameter, will use sampled one instead"
            );
            max_diameter = 1.1 * sampled_max;
            widened = a_priori.is_some();
        }
        if !(max_diameter > 0.0) {
            max_diameter = fallback;
        }
        let mut sizing = Self {
            max_diameter,
            limit,
            widened,
        };
        sizing.clamp();
        sizing
    }

    fn clamp(&mut self) {
        if self.max_diameter > self.limit {
            warn!(
                expected = self.max_diameter,
                allowed = self.limit,
                "Maximum expected particle interaction diameter is larger than maximum allowed interaction diameter, check that the generated size and form distributions match the expected ones"
            );
            self.max_diameter = self.limit;
        }
    }

    pub fn max_diameter(&self) -> f64 {
        self.max_diameter
    }

    /// Widens the estimate the first time newly created particles exceed
    /// it. Returns true if the broad phase has to be rebuilt.
    pub fn observe(&mut self, created_max: f64) -> bool {
        if self.widened || created_max <= self.max_diameter {
            return false;
        }
        info!(
            estimate = self.max_diameter,
            created = created_max,
            "Created particles exceed the expected interaction diameter, widening"
        );
        self.max_diameter = 1.1 * created_max;
        self.widened = true;
        self.clamp();
        true
    }
}

/// Vertical extent of the initial fill and of later generation events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationHeights {
    pub initial: (f64, f64),
    pub regular: (f64, f64),
}

impl GenerationHeights {
    pub fn from_settings(settings: &Settings) -> Self {
        let p = &settings.packing;
        let h = p.domain_height;
        let s = p.generation_spacing;
        let zone = |start: f64, end: f64| (s.max(start * h), (h - s).min(end * h));
        Self {
            initial: zone(p.initial_generation_height_ratio_start, p.initial_generation_height_ratio_end),
            regular: zone(p.generation_height_ratio_start, p.generation_height_ratio_end),
        }
    }
}

/// Output folders; every output is optional.
#[derive(Debug, Clone, Default)]
struct OutputPaths {
    profiles: Option<PathBuf>,
    vis: Option<PathBuf>,
    final_state: Option<PathBuf>,
    store: Option<PathBuf>,
}

impl OutputPaths {
    fn profile_file(&self, run_id: &str, suffix: &str) -> Option<PathBuf> {
        self.profiles.as_ref().map(|dir| dir.join(format!("{run_id}_{suffix}")))
    }
}

/// Final state of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub timesteps: u64,
    pub terminated: bool,
    pub particles: ParticleAggregateInfo,
    pub contacts: ContactInfo,
    pub porosity: f64,
    pub histogram: ParticleHistogram,
    /// Id assigned by the run store, if one is configured.
    pub stored_run: Option<u64>,
}

pub struct Simulation {
    settings: Settings,
    resolved: Resolved,
    cluster: Cluster,
    generator: ParticleGenerator,
    rank_generators: Vec<RankGenerator>,
    heights: GenerationHeights,
    sizing: BroadPhaseSizing,
    sync: SyncStrategy,
    contacts: ContactPipeline,
    solver: SolverDispatcher,
    lifecycle: Lifecycle,
    time: SimulationTime,
    info_spacing: u64,
    logging_spacing: u64,
    vis_spacing: u64,
    run_id: String,
    paths: OutputPaths,
    logging: Option<LoggingWriter>,
    snapshots: Option<SnapshotWriter>,
    last_info: ParticleAggregateInfo,
    timing: TimingTree,
    step_timer: StepTimer,
    counters: Counter,
}

impl Simulation {
    /// Resolves the settings, fills the domain initially and sizes the
    /// broad phase and synchronization from the created particles.
    pub fn new(settings: Settings) -> Result<Self, SetupError> {
        settings.validate()?;
        let resolved = Resolved::from_settings(&settings)?;
        let p = &settings.packing;

        let forest = block_forest(&settings, &resolved.domain);
        let mut cluster = Cluster::new(forest, p.parallel);
        add_walls(&mut cluster, &resolved.domain);

        let generator = ParticleGenerator::new(
            resolved.domain.aabb,
            resolved.domain.is_container(),
            p.particle_density,
            p.scale_generation_spacing_with_form,
            &resolved.shapes,
        );
        let mut rank_generators: Vec<RankGenerator> = (0..cluster.num_ranks())
            .map(|rank| RankGenerator::new(rank, resolved.diameters.source.clone(), resolved.shapes.clone()))
            .collect();
        let heights = GenerationHeights::from_settings(&settings);
        let mut counters = Counter::new();

        let (z_min, z_max) = heights.initial;
        let report = create_particles(
            &mut cluster,
            &generator,
            &mut rank_generators,
            z_min,
            z_max,
            &settings,
            resolved.domain.max_allowed_interaction_radius,
        );
        record_generation(&mut counters, &report);
        info!(
            created = report.created,
            max_interaction_diameter = report.max_interaction_diameter,
            "Initially created particles"
        );

        let sizing = BroadPhaseSizing::new(
            resolved.a_priori_max_diameter(),
            report.max_interaction_diameter,
            2.0 * resolved.domain.max_allowed_interaction_radius,
            p.generation_spacing,
        );
        let smallest_block = cluster.forest().smallest_block_extent();
        let sync = SyncStrategy::select(smallest_block, sizing.max_diameter());
        info!(
            max_diameter = sizing.max_diameter(),
            smallest_block,
            strategy = sync.name(),
            "Sync info"
        );
        sync.synchronize_after_creation(&mut cluster);

        let contacts = ContactPipeline::new(&cluster, p.use_hash_grids, sizing.max_diameter());
        if contacts.uses_linked_cells() {
            info!(
                cell_width = crate::contacts::CELL_WIDTH_FACTOR * sizing.max_diameter(),
                "Using linked cells"
            );
        } else {
            info!("Using hash grids");
        }
        let solver = SolverDispatcher::from_settings(&settings, &resolved.physics);
        let lifecycle = Lifecycle::new(LifecycleParams::from_settings(&settings));

        let time = SimulationTime::new(settings.solver.dt);
        let info_spacing = time.steps_in(p.info_spacing);
        let logging_spacing = time.steps_in(p.logging_spacing);
        let vis_spacing = time.steps_in(p.vis_spacing);

        // Created once and handed to every rank so all files of this run
        // share one name.
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
            .to_string();
        let run_id = cluster.broadcast_object(&stamp).into_iter().next().unwrap_or(stamp);

        let e = &settings.evaluation;
        let paths = OutputPaths {
            profiles: e.porosity_profile_folder.clone(),
            vis: e.vis_folder.clone(),
            final_state: e.final_folder.clone(),
            store: e.store_file.clone(),
        };
        let logging = match paths.profile_file(&run_id, "logging.txt") {
            Some(path) => {
                info!(path = %path.display(), "Writing logging file");
                Some(LoggingWriter::create(path)?)
            }
            None => None,
        };
        let snapshots = match (&paths.vis, vis_spacing) {
            (Some(dir), spacing) if spacing > 0 => Some(SnapshotWriter::new(dir.clone(), "particles")),
            _ => None,
        };

        if p.limit_velocity > 0.0 {
            info!(
                limit = p.limit_velocity,
                "Will apply limiting of translational particle velocity"
            );
        }
        info!(
            volume = resolved.domain.volume,
            "Starting simulation in domain"
        );
        info!(
            target_mass = p.total_particle_mass,
            "Will terminate generation when particle mass is above target"
        );
        info!(
            factor = p.velocity_damping_coefficient.powf(settings.solver.dt),
            "Once all particles are created, will apply velocity damping per time step"
        );

        let mut sim = Self {
            last_info: ParticleAggregateInfo::default(),
            settings,
            resolved,
            cluster,
            generator,
            rank_generators,
            heights,
            sizing,
            sync,
            contacts,
            solver,
            lifecycle,
            time,
            info_spacing,
            logging_spacing,
            vis_spacing,
            run_id,
            paths,
            logging,
            snapshots,
            timing: TimingTree::new(),
            step_timer: StepTimer::new(100),
            counters,
        };
        sim.last_info = ParticleAggregateInfo::evaluate(&mut sim.cluster);
        info!("{}", sim.last_info);
        info!("{}", sim.histogram());
        sim.timing.start("Simulation");
        Ok(sim)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolved(&self) -> &Resolved {
        &self.resolved
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn time(&self) -> &SimulationTime {
        &self.time
    }

    pub fn sync_strategy(&self) -> SyncStrategy {
        self.sync
    }

    pub fn sizing(&self) -> &BroadPhaseSizing {
        &self.sizing
    }

    pub fn solver(&self) -> &SolverDispatcher {
        &self.solver
    }

    pub fn counters(&self) -> &Counter {
        &self.counters
    }

    pub fn timing(&self) -> &TimingTree {
        &self.timing
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Aggregate evaluated at the end of the last step.
    pub fn last_info(&self) -> &ParticleAggregateInfo {
        &self.last_info
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle.is_terminated()
    }

    fn histogram(&mut self) -> ParticleHistogram {
        ParticleHistogram::evaluate(
            &mut self.cluster,
            &self.settings.evaluation.histogram_bins,
            self.settings.shape.scale_mode,
        )
    }

    /// Advances one step. Returns true once the lifecycle has terminated.
    pub fn step(&mut self) -> Result<bool, SetupError> {
        if self.lifecycle.is_terminated() {
            return Ok(true);
        }
        self.step_timer.begin();
        let phase = self.lifecycle.phase();
        let step = self.time.timestep();
        let time = self.time.current_time();
        let dt = self.time.dt();

        let sorting_spacing = self.settings.packing.particle_sorting_spacing;
        time_scope!(self.timing, "Sorting", {
            if sorting_spacing > 0 && step % sorting_spacing as u64 == 0 {
                self.contacts.sort_particles(&mut self.cluster);
            }
        });

        let snapshot = time_scope!(self.timing, "Output", {
            match &self.snapshots {
                Some(writer) if self.time.is_due(self.vis_spacing) => {
                    let records = particle_records(&self.cluster, self.settings.shape.scale_mode);
                    Some(writer.write(step, time, &records))
                }
                _ => None,
            }
        });
        snapshot.transpose()?;

        let broad_phase = self.contacts.broad_phase_name();
        time_scope!(self.timing, broad_phase, {
            self.contacts.rebuild(&mut self.cluster);
        });
        time_scope!(self.timing, "Contact detection", {
            self.contacts.detect(&mut self.cluster);
        });
        time_scope!(self.timing, "Contact eval", {
            count_contacts(&mut self.cluster);
        });

        time_scope!(self.timing, "Shaking", {
            let acceleration = self.lifecycle.shaking_acceleration(time);
            self.solver.apply_shaking(&mut self.cluster, acceleration);
        });

        let solver_name = self.solver.name();
        time_scope!(self.timing, solver_name, {
            self.solver.step(&mut self.cluster, dt, &mut self.timing);
        });

        let limit = self.settings.packing.limit_velocity;
        if limit > 0.0 {
            time_scope!(self.timing, "Velocity limiting", {
                self.cluster.for_each_rank(|domain| {
                    for p in domain.particles.locals_mut() {
                        limit_velocity(p, limit);
                    }
                });
            });
        }

        time_scope!(self.timing, "Sync", {
            self.sync.synchronize(&mut self.cluster);
        });

        self.timing.start("Evaluate particles");
        let info = ParticleAggregateInfo::evaluate(&mut self.cluster);
        let actions = self.lifecycle.decide(time, dt, &info);
        if actions.generate {
            time_scope!(self.timing, "Generation", {
                self.generate();
            });
        }
        if let Some(factor) = actions.damping_factor {
            time_scope!(self.timing, "Damping", {
                self.cluster.for_each_rank(|domain| {
                    for p in domain.particles.locals_mut() {
                        damp_velocity(p, factor);
                    }
                });
                broadcast_property::<ParticleVelocityNotification>(&mut self.cluster, &());
            });
        }
        self.timing.stop("Evaluate particles");
        self.last_info = info;

        let info_due = self.time.is_due(self.info_spacing);
        let logging_due = self.logging.is_some() && self.time.is_due(self.logging_spacing);
        if info_due || logging_due {
            self.timing.start("Evaluate infos");
            let written = self.report(step, time, &info, info_due, logging_due);
            self.timing.stop("Evaluate infos");
            written?;
        }

        self.time.advance_step();
        self.step_timer.end(phase.name());
        Ok(actions.terminate)
    }

    /// One generation event in the regular generation zone.
    fn generate(&mut self) {
        let (z_min, z_max) = self.heights.regular;
        let report = create_particles(
            &mut self.cluster,
            &self.generator,
            &mut self.rank_generators,
            z_min,
            z_max,
            &self.settings,
            self.resolved.domain.max_allowed_interaction_radius,
        );
        record_generation(&mut self.counters, &report);
        if self.sizing.observe(report.max_interaction_diameter) {
            self.contacts.resize(&self.cluster, self.sizing.max_diameter());
        }
        self.sync.synchronize_after_creation(&mut self.cluster);
        info!("{}", self.histogram());
    }

    fn report(
        &mut self,
        step: u64,
        time: f64,
        info: &ParticleAggregateInfo,
        info_due: bool,
        logging_due: bool,
    ) -> Result<(), SetupError> {
        let contact_info = ContactInfo::evaluate(&mut self.cluster);
        let porosity = PorosityProfile::evaluate(
            &mut self.cluster,
            &self.resolved.domain,
            self.settings.evaluation.layer_height,
        )
        .estimate_total_porosity();

        if logging_due {
            if let Some(writer) = &mut self.logging {
                writer.write(&LoggingRow {
                    time,
                    num_particles: info.num_particles,
                    particle_volume: info.particle_volume,
                    maximum_height: info.maximum_height,
                    height_of_mass: info.height_of_mass,
                    maximum_velocity: info.maximum_velocity,
                    num_contacts: contact_info.num_contacts,
                    maximum_penetration_depth: contact_info.maximum_penetration_depth,
                    average_penetration_depth: contact_info.average_penetration_depth,
                    porosity,
                })?;
            }
        }

        if info_due {
            let mass = info.mass(self.settings.packing.particle_density);
            let average_diameter = info.average_diameter();
            let penetration_percent = if average_diameter > 0.0 {
                100.0 * contact_info.maximum_penetration_depth / average_diameter
            } else {
                0.0
            };
            info!(
                steps_per_second = self.step_timer.steps_per_second(),
                phase = %self.lifecycle.phase(),
                "t = {step} = {time:.4} s"
            );
            info!("{info} => {mass:.4} kg, current porosity = {porosity:.4}");
            info!("{contact_info} => {penetration_percent:.3}% of avg diameter {average_diameter:.4}");
        }
        Ok(())
    }

    /// Steps until the lifecycle terminates or `max_timesteps` is reached.
    pub fn run(&mut self) -> Result<(), SetupError> {
        let cap = self.settings.packing.max_timesteps;
        loop {
            if self.step()? {
                return Ok(());
            }
            if cap.is_some_and(|cap| self.time.timestep() >= cap) {
                warn!(
                    timesteps = self.time.timestep(),
                    "Reached maximum number of time steps before convergence"
                );
                return Ok(());
            }
        }
    }

    /// Final evaluation: histogram, profiles, particle info, run record
    /// and final snapshot.
    pub fn finalize(mut self) -> Result<RunSummary, SetupError> {
        self.timing.stop_all();
        let timesteps = self.time.timestep();
        let time = self.time.current_time();
        let run_id = self.run_id.clone();
        let scale_mode = self.settings.shape.scale_mode;

        let histogram = self.histogram();
        info!("{histogram}");

        let layer_height = self.settings.evaluation.layer_height;
        let profile = PorosityProfile::evaluate(&mut self.cluster, &self.resolved.domain, layer_height);
        let porosity = profile.estimate_total_porosity();
        info!(porosity, "Estimated total porosity based on layers");
        if let Some(path) = self.paths.profile_file(&run_id, "layers.txt") {
            info!(path = %path.display(), "Writing porosity profile file");
            write_table(&path, &PorosityProfile::HEADER, &profile.rows())?;
        }

        let contact_layers = ContactLayers::evaluate(&mut self.cluster, self.resolved.domain.height(), layer_height);
        if let Some(path) = self.paths.profile_file(&run_id, "contact_layers.txt") {
            info!(path = %path.display(), "Writing contact info profile file");
            write_table(&path, &ContactLayers::HEADER, &contact_layers.rows())?;
        }

        info!("Timing\n{}", self.timing);
        for (phase, steps, total) in self.step_timer.phases() {
            info!(phase, steps, seconds = total.as_secs_f64(), "Steps per phase");
        }
        for (name, value) in self.counters.iter() {
            info!(name, value, "Counter");
        }

        let records = particle_records(&self.cluster, scale_mode);
        if let Some(path) = self.paths.profile_file(&run_id, "particle_info.txt") {
            info!(path = %path.display(), "Writing particle info file");
            write_particle_info(&path, &records, 12)?;
        }

        let particles = ParticleAggregateInfo::evaluate(&mut self.cluster);
        let contacts = ContactInfo::evaluate(&mut self.cluster);

        let stored_run = match &self.paths.store {
            Some(path) => {
                let record = self.run_record(&particles, &contacts, porosity, &histogram)?;
                let store = RunStore::new(path.clone());
                info!(path = %store.path().display(), "Storing run and timing data");
                Some(store.append(&record)?)
            }
            None => None,
        };

        if let Some(dir) = &self.paths.final_state {
            info!(folder = %dir.display(), "Writing final particle state");
            SnapshotWriter::new(dir.clone(), run_id.clone()).write(timesteps, time, &records)?;
            write_settings_copy(&dir.join(format!("{run_id}_settings.json")), &self.settings)?;
        }

        let terminated = self.lifecycle.is_terminated();
        if terminated {
            info!("Simulation terminated successfully");
        }
        Ok(RunSummary {
            run_id,
            timesteps,
            terminated,
            particles,
            contacts,
            porosity,
            histogram,
            stored_run,
        })
    }

    fn run_record(
        &self,
        particles: &ParticleAggregateInfo,
        contacts: &ContactInfo,
        porosity: f64,
        histogram: &ParticleHistogram,
    ) -> Result<RunRecord, SetupError> {
        let mut record = RunRecord::new();
        record.add_config(&self.settings)?;

        record.set_integer("numParticles", particles.num_particles as i64);
        record.set_real("maxParticlePosition", particles.maximum_height);
        record.set_real("particleVolume", particles.particle_volume);
        record.set_real("estimatedPorosity", porosity);

        record.set_integer("numContacts", contacts.num_contacts as i64);
        record.set_real("maxPenetrationDepth", contacts.maximum_penetration_depth);
        record.set_real("avgPenetrationDepth", contacts.average_penetration_depth);

        record.set_real("simulationTime", self.timing.total("Simulation").as_secs_f64());
        record.set_integer("numProcesses", self.cluster.num_ranks() as i64);
        record.set_integer("timesteps", self.time.timestep() as i64);
        record.set_string("file_identifier", self.run_id.clone());
        record.set_real("generationSpacing", self.settings.packing.generation_spacing);
        record.set_vector("evaluation_histogramData", &histogram.mass_fractions);
        let numbers: Vec<f64> = histogram.numbers.iter().map(|&n| n as f64).collect();
        record.set_vector("evaluation_numberHistogramData", &numbers);
        record.set_integer("singleShape", i64::from(self.resolved.shapes.generates_single_shape()));
        // Infinite for containers, which JSON cannot hold.
        let max_radius = self.resolved.domain.max_allowed_interaction_radius;
        if max_radius.is_finite() {
            record.set_real("maxAllowedInteractionRadius", max_radius);
        }

        for shape in &histogram.shapes {
            record.set_vector(format!("evaluation_{}_bins", shape.name), &shape.edges);
            let counts: Vec<f64> = shape.counts.iter().map(|&c| c as f64).collect();
            record.set_vector(format!("evaluation_{}_histogramData", shape.name), &counts);
        }

        record.timing = self
            .timing
            .flatten()
            .into_iter()
            .map(|(path, total, count)| TimingEntry {
                path,
                seconds: total.as_secs_f64(),
                count,
            })
            .collect();
        Ok(record)
    }
}

/// Runs the generator on every rank over the same lattice.
fn create_particles(
    cluster: &mut Cluster,
    generator: &ParticleGenerator,
    rank_generators: &mut [RankGenerator],
    z_min: f64,
    z_max: f64,
    settings: &Settings,
    max_interaction_radius: f64,
) -> GenerationReport {
    let spacing = settings.packing.generation_spacing;
    let initial_velocity = settings.packing.initial_velocity;
    let lattice = generator.lattice(z_min, z_max, spacing);
    let forest = cluster.forest().clone();
    cluster
        .map_ranks_with(rank_generators.iter_mut().collect(), |domain, state| {
            generator.create(
                state,
                domain,
                &forest,
                &lattice,
                spacing,
                initial_velocity,
                max_interaction_radius,
            )
        })
        .into_iter()
        .fold(GenerationReport::default(), GenerationReport::combine)
}

fn record_generation(counters: &mut Counter, report: &GenerationReport) {
    counters.increment("generation_events", 1);
    counters.increment("particles_created", report.created as u64);
    if report.clamped > 0 {
        counters.increment("interaction_radius_clamps", report.clamped as u64);
        warn!(
            clamped = report.clamped,
            "Interaction radius of created particles clamped to the maximum allowed radius"
        );
    }
}
