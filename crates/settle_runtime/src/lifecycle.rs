//! Lifecycle state machine
//!
//! Decides once per step, from the current [`ParticleAggregateInfo`],
//! whether to generate particles, shake, damp or stop. Generation runs
//! until the target mass is reached; shaking (if configured) follows for a
//! fixed duration; damping then runs until the packing has converged.

use crate::evaluation::ParticleAggregateInfo;
use settle_services::Settings;
use std::f64::consts::PI;
use std::fmt;
use tracing::info;

const MIN_REFERENCE_HEIGHT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Generating,
    Shaking,
    DampingAndChecking,
    Terminated,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Generating => "generating",
            Phase::Shaking => "shaking",
            Phase::DampingAndChecking => "damping and checking",
            Phase::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShakingParams {
    pub amplitude: f64,
    pub period: f64,
    pub duration: f64,
    pub active_from_beginning: bool,
}

impl ShakingParams {
    /// Horizontal acceleration `t` seconds after shaking began.
    pub fn acceleration(&self, t: f64) -> f64 {
        let omega = 2.0 * PI / self.period;
        self.amplitude * (t * omega).sin() * omega * omega
    }
}

/// Thresholds and targets driving the phase transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleParams {
    pub target_mass: f64,
    pub particle_density: f64,
    /// Generate again once the highest particle is below this height.
    pub generation_trigger_height: f64,
    pub max_time_between_generation: f64,
    pub shaking: Option<ShakingParams>,
    pub damping_coefficient: f64,
    pub minimal_terminal_run_time: f64,
    pub termination_checking_spacing: f64,
    pub terminal_velocity: f64,
    pub terminal_relative_height_change: f64,
}

impl LifecycleParams {
    pub fn from_settings(settings: &Settings) -> Self {
        let p = &settings.packing;
        let h = p.domain_height;
        let generation_zone = (p.generation_height_ratio_end - p.generation_height_ratio_start) * h;
        let max_time_between_generation = if p.initial_velocity > 0.0 {
            generation_zone / p.initial_velocity
        } else {
            f64::INFINITY
        };
        let s = &settings.shaking;
        Self {
            target_mass: p.total_particle_mass,
            particle_density: p.particle_density,
            generation_trigger_height: p.generation_height_ratio_start * h - p.generation_spacing,
            max_time_between_generation,
            shaking: p.shaking.then_some(ShakingParams {
                amplitude: s.amplitude,
                period: s.period,
                duration: s.duration,
                active_from_beginning: s.active_from_beginning,
            }),
            damping_coefficient: p.velocity_damping_coefficient,
            minimal_terminal_run_time: p.minimal_terminal_run_time,
            termination_checking_spacing: p.termination_checking_spacing,
            terminal_velocity: p.terminal_velocity,
            terminal_relative_height_change: p.terminal_relative_height_change,
        }
    }
}

/// What the controller has to do in the current step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepActions {
    pub generate: bool,
    /// Factor applied to all velocities.
    pub damping_factor: Option<f64>,
    pub terminate: bool,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    params: LifecycleParams,
    phase: Phase,
    shaking_pending: bool,
    shaking_active: bool,
    time_begin_shaking: f64,
    time_end_shaking: f64,
    time_begin_damping: Option<f64>,
    time_last_generation: f64,
    time_last_termination_check: f64,
    old_height_of_mass: f64,
    old_maximum_height: f64,
}

impl Lifecycle {
    pub fn new(params: LifecycleParams) -> Self {
        info!(
            seconds = params.max_time_between_generation,
            "Maximum time between creation steps"
        );
        let from_beginning = params.shaking.is_some_and(|s| s.active_from_beginning);
        if from_beginning {
            info!("Will use shaking from beginning");
        }
        Self {
            params,
            phase: Phase::Generating,
            shaking_pending: params.shaking.is_some(),
            shaking_active: from_beginning,
            time_begin_shaking: if from_beginning { 0.0 } else { -1.0 },
            time_end_shaking: -1.0,
            time_begin_damping: None,
            time_last_generation: 0.0,
            time_last_termination_check: 0.0,
            old_height_of_mass: 1.0,
            old_maximum_height: 1.0,
        }
    }

    pub fn params(&self) -> &LifecycleParams {
        &self.params
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_shaking_active(&self) -> bool {
        self.shaking_active
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == Phase::Terminated
    }

    /// Horizontal shaking acceleration at `time`, if shaking is active.
    pub fn shaking_acceleration(&self, time: f64) -> Option<f64> {
        let shaking = self.params.shaking?;
        self.shaking_active
            .then(|| shaking.acceleration(time - self.time_begin_shaking))
    }

    pub fn decide(&mut self, time: f64, dt: f64, info: &ParticleAggregateInfo) -> StepActions {
        let mut actions = StepActions::default();
        if self.is_terminated() {
            actions.terminate = true;
            return actions;
        }

        if info.mass(self.params.particle_density) < self.params.target_mass {
            self.phase = Phase::Generating;
            if info.maximum_height < self.params.generation_trigger_height
                || time - self.time_last_generation > self.params.max_time_between_generation
            {
                actions.generate = true;
                self.time_last_generation = time;
            }
        } else if self.shaking_pending {
            self.phase = Phase::Shaking;
            self.update_shaking(time);
        } else {
            self.phase = Phase::DampingAndChecking;
            actions.damping_factor = Some(self.params.damping_coefficient.powf(dt));
            if self.check_termination(time, info) {
                self.phase = Phase::Terminated;
                actions.terminate = true;
            }
        }
        actions
    }

    fn update_shaking(&mut self, time: f64) {
        let Some(shaking) = self.params.shaking else {
            self.shaking_pending = false;
            return;
        };
        if self.time_end_shaking < 0.0 {
            if self.shaking_active {
                // Active since the start: the duration counts from the end of
                // generation.
                self.time_end_shaking = time + shaking.duration;
                info!(time, until = self.time_end_shaking, "Continue of shaking");
            } else {
                self.shaking_active = true;
                self.time_begin_shaking = time;
                self.time_end_shaking = time + shaking.duration;
                info!(time, duration = shaking.duration, "Beginning of shaking");
            }
        }
        if time > self.time_end_shaking {
            info!(time, "Ending of shaking");
            self.shaking_pending = false;
            self.shaking_active = false;
        }
    }

    fn check_termination(&mut self, time: f64, info: &ParticleAggregateInfo) -> bool {
        let begin = *self.time_begin_damping.get_or_insert_with(|| {
            info!(time, "Beginning of damping until convergence");
            time
        });
        if time - begin <= self.params.minimal_terminal_run_time
            || time - self.time_last_termination_check <= self.params.termination_checking_spacing
        {
            return false;
        }

        let mut converged = false;
        if info.maximum_velocity < self.params.terminal_velocity {
            info!(max_velocity = info.maximum_velocity, "Reached terminal max velocity - terminating");
            converged = true;
        }
        let threshold = self.params.terminal_relative_height_change;
        let rel_avg = relative_change(info.height_of_mass, self.old_height_of_mass);
        let rel_max = relative_change(info.maximum_height, self.old_maximum_height);
        // The max height guards against stopping while only a trickle of
        // mass arrives per generation event.
        if rel_max < 10.0 * threshold && rel_avg < threshold {
            info!(rel_avg, rel_max, "Reached converged maximum and mass-averaged height - terminating");
            converged = true;
        }
        self.old_height_of_mass = info.height_of_mass;
        self.old_maximum_height = info.maximum_height;
        self.time_last_termination_check = time;
        converged
    }
}

/// Change relative to `old`, with the reference kept away from zero so an
/// unchanged height of zero still counts as converged.
fn relative_change(new: f64, old: f64) -> f64 {
    (new - old).abs() / old.abs().max(MIN_REFERENCE_HEIGHT)
}
