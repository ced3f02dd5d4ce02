//! Settle Core
//!
//! Contains the particle-level building blocks of the packing simulation:
//! - Particle and contact storage
//! - Shapes, contact detection and broad phases
//! - DEM and HCSITS kernels
//! - Diameter and shape sources
//! - Deterministic time and math

pub mod collision;
pub mod data;
pub mod distribution;
pub mod kernel;
pub mod math;
pub mod time;

pub use glam;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
