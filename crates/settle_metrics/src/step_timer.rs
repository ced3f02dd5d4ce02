//! Wall-clock cost of simulation steps, booked per lifecycle phase

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct PhaseTotal {
    phase: &'static str,
    steps: u64,
    total: Duration,
}

/// Times whole steps. The most recent `window` steps give the current
/// rate; every step is also added to the total of the phase it ran in.
#[derive(Debug)]
pub struct StepTimer {
    started: Option<Instant>,
    window: VecDeque<Duration>,
    capacity: usize,
    phases: Vec<PhaseTotal>,
}

impl StepTimer {
    pub fn new(window: usize) -> Self {
        let capacity = window.max(1);
        Self {
            started: None,
            window: VecDeque::with_capacity(capacity),
            capacity,
            phases: Vec::new(),
        }
    }

    pub fn begin(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Books the step started by the last [`StepTimer::begin`] under
    /// `phase`. Does nothing without a matching `begin`.
    pub fn end(&mut self, phase: &'static str) {
        let Some(started) = self.started.take() else {
            return;
        };
        let elapsed = started.elapsed();
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(elapsed);
        match self.phases.iter_mut().find(|p| p.phase == phase) {
            Some(entry) => {
                entry.steps += 1;
                entry.total += elapsed;
            }
            None => self.phases.push(PhaseTotal {
                phase,
                steps: 1,
                total: elapsed,
            }),
        }
    }

    fn window_mean(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().map(Duration::as_secs_f64).sum::<f64>() / self.window.len() as f64
    }

    pub fn steps_per_second(&self) -> f64 {
        let mean = self.window_mean();
        if mean > 0.0 {
            1.0 / mean
        } else {
            0.0
        }
    }

    pub fn step_time_ms(&self) -> f64 {
        self.window_mean() * 1000.0
    }

    /// `(phase, steps, total)` in order of first appearance.
    pub fn phases(&self) -> Vec<(&'static str, u64, Duration)> {
        self.phases.iter().map(|p| (p.phase, p.steps, p.total)).collect()
    }
}

impl Default for StepTimer {
    fn default() -> Self {
        Self::new(100)
    }
}
