//! Settle Runtime
//!
//! Runs one packing simulation from a JSON config file:
//!
//! ```text
//! settle [config.json]
//! ```

use anyhow::{Context, Result};
use settle_runtime::Simulation;
use settle_services::load_settings;

const DEFAULT_CONFIG: &str = "configs/packing.json";

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    tracing::info!("Settle v{}", settle_core::VERSION);
    tracing::info!(config = %path, "Loading settings");
    let settings = load_settings(&path).with_context(|| format!("loading settings from {path}"))?;

    let mut simulation = Simulation::new(settings).context("setting up the simulation")?;
    simulation.run()?;
    let summary = simulation.finalize()?;

    tracing::info!(
        run_id = %summary.run_id,
        timesteps = summary.timesteps,
        particles = summary.particles.num_particles,
        porosity = summary.porosity,
        "Run finished"
    );
    Ok(())
}
