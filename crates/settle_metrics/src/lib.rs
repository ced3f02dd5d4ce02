//! Settle Metrics - timing utilities for the simulation loop
//!
//! Provides zero-cost abstractions for timing collection that completely
//! vanish in builds without the `metrics` feature.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable timing collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use settle_metrics::TimingTree;
//!
//! let mut tree = TimingTree::new();
//! tree.start("Simulation");
//! tree.start("Contact detection");
//! // ... do work ...
//! tree.stop("Contact detection");
//! tree.stop("Simulation");
//! println!("{tree}");
//! ```
//!
//! Without the `metrics` feature every type below is a stub whose methods
//! do nothing and report zero.

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod step_timer;
#[cfg(feature = "metrics")]
mod timing_tree;

#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use step_timer::StepTimer;
#[cfg(feature = "metrics")]
pub use timing_tree::TimingTree;

// ============================================================================
// Macros for conditional compilation
// ============================================================================

/// Time a block under `$name` in a timing tree
#[macro_export]
macro_rules! time_scope {
    ($tree:expr, $name:expr, $body:block) => {{
        $tree.start($name);
        let result = $body;
        $tree.stop($name);
        result
    }};
}

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct StepTimer;

#[cfg(not(feature = "metrics"))]
impl StepTimer {
    pub fn new(_capacity: usize) -> Self { Self }
    pub fn begin(&mut self) {}
    pub fn end(&mut self, _phase: &'static str) {}
    pub fn steps_per_second(&self) -> f64 { 0.0 }
    pub fn step_time_ms(&self) -> f64 { 0.0 }
    pub fn phases(&self) -> Vec<(&'static str, u64, std::time::Duration)> { Vec::new() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &'static str, _value: u64) {}
    pub fn get(&self, _name: &str) -> u64 { 0 }
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> { std::iter::empty() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct TimingTree;

#[cfg(not(feature = "metrics"))]
impl TimingTree {
    pub fn new() -> Self { Self }
    pub fn start(&mut self, _name: &str) {}
    pub fn stop(&mut self, _name: &str) -> bool { true }
    pub fn is_running(&self, _name: &str) -> bool { false }
    pub fn stop_all(&mut self) {}
    pub fn total(&self, _path: &str) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn flatten(&self) -> Vec<(String, std::time::Duration, u64)> { Vec::new() }
}

#[cfg(not(feature = "metrics"))]
impl std::fmt::Display for TimingTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(timing disabled)")
    }
}
