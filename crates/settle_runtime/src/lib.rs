//! Settle Runtime
//!
//! The packing run itself: resolves the configuration into strategy
//! objects, then drives generation, contact detection, the solver,
//! synchronization and evaluation step by step until the packing has
//! settled.

pub mod contacts;
pub mod error;
pub mod evaluation;
pub mod generator;
pub mod lifecycle;
pub mod resolve;
pub mod simulation;
pub mod solver;

pub use error::SetupError;
pub use lifecycle::{Lifecycle, Phase};
pub use simulation::{RunSummary, Simulation};
