//! Deterministic time system
//!
//! Fixed time step; simulated time is always `timestep * dt`.

/// Simulation time tracker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationTime {
    timestep: u64,
    dt: f64,
}

impl SimulationTime {
    pub fn new(dt: f64) -> Self {
        Self { timestep: 0, dt }
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn advance_step(&mut self) {
        self.timestep += 1;
    }

    pub fn current_time(&self) -> f64 {
        self.timestep as f64 * self.dt
    }

    /// Whole steps in `seconds`, rounded down.
    pub fn steps_in(&self, seconds: f64) -> u64 {
        if self.dt <= 0.0 || seconds <= 0.0 {
            return 0;
        }
        (seconds / self.dt + 1e-9).floor() as u64
    }

    /// True every `spacing` steps; a spacing of zero disables the event.
    pub fn is_due(&self, spacing: u64) -> bool {
        spacing > 0 && self.timestep % spacing == 0
    }
}
