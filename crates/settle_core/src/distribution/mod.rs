//! Particle size and shape sources
//!
//! Diameter sources produce the sequence of particle sizes; shape sources
//! turn a size into a concrete shape. Both are closed enums resolved once
//! from the configuration.

mod diameter;
mod form;
mod sieve;

pub use diameter::{DiameterSource, DiscreteSieving, ContinuousSieving};
pub use form::{FormSource, ScaleMode, ShapeDraw, ShapeSource};
pub use sieve::{mean_diameters_from_sieve_sizes, percentile_from_sieve_distribution};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DistributionError {
    #[error("expected {expected} mass fractions, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("{what} must be positive, got {value}")]
    NonPositive { what: &'static str, value: f64 },

    #[error("{0} is empty")]
    Empty(&'static str),

    #[error("mass fractions must not all be zero")]
    NoMass,
}
