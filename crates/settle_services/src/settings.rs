//! Settings management
//!
//! The packing run is configured from one JSON file. Every block falls back
//! to its defaults for omitted keys; unknown keys and unknown mode names are
//! rejected so typos fail the run at startup instead of silently using a
//! default.

use serde::{Deserialize, Serialize};
use settle_core::distribution::ScaleMode;
use settle_core::kernel::RelaxationModel;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fatal configuration problems, detected once before the run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainSetup {
    /// Closed cylinder with bottom and top planes.
    Container,
    /// Periodic in x and y, planes at bottom and top.
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    #[serde(rename = "HCSITS")]
    Hcsits,
    #[serde(rename = "DEM")]
    Dem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionKind {
    Uniform,
    LogNormal,
    DiameterMassFractions,
    SievingCurve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    Sphere,
    Ellipsoid,
    EllipsoidFormDistribution,
}

/// Complete run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub packing: PackingSettings,
    pub solver: SolverSettings,
    pub shaking: ShakingSettings,
    pub distribution: DistributionSettings,
    pub shape: ShapeSettings,
    pub evaluation: EvaluationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackingSettings {
    pub domain_setup: DomainSetup,
    pub domain_width: f64,
    pub domain_height: f64,
    pub particle_density: f64,
    pub ambient_density: f64,
    pub gravitational_acceleration: f64,
    pub particle_distribution: DistributionKind,
    pub particle_shape: ShapeKind,
    /// Cap on translational speed; zero or negative disables limiting.
    pub limit_velocity: f64,
    pub initial_velocity: f64,
    pub initial_generation_height_ratio_start: f64,
    pub initial_generation_height_ratio_end: f64,
    pub generation_spacing: f64,
    pub generation_height_ratio_start: f64,
    pub generation_height_ratio_end: f64,
    pub scale_generation_spacing_with_form: bool,
    pub total_particle_mass: f64,
    /// Output intervals in seconds; zero disables the output.
    pub vis_spacing: f64,
    pub info_spacing: f64,
    pub logging_spacing: f64,
    pub num_blocks_per_direction: [usize; 3],
    pub num_ranks: usize,
    pub terminal_velocity: f64,
    pub terminal_relative_height_change: f64,
    pub termination_checking_spacing: f64,
    pub minimal_terminal_run_time: f64,
    pub velocity_damping_coefficient: f64,
    pub use_hash_grids: bool,
    pub solver: SolverKind,
    /// Steps between particle sorting; zero or negative disables sorting.
    pub particle_sorting_spacing: i64,
    /// Run per-rank phases on the rayon pool.
    pub parallel: bool,
    pub shaking: bool,
    /// Hard stop after this many steps, whatever the lifecycle says.
    pub max_timesteps: Option<u64>,
}

impl Default for PackingSettings {
    fn default() -> Self {
        Self {
            domain_setup: DomainSetup::Periodic,
            domain_width: 10.0,
            domain_height: 20.0,
            particle_density: 2.65,
            ambient_density: 1.0,
            gravitational_acceleration: 9.81,
            particle_distribution: DistributionKind::Uniform,
            particle_shape: ShapeKind::Sphere,
            limit_velocity: -1.0,
            initial_velocity: 1.0,
            initial_generation_height_ratio_start: 0.05,
            initial_generation_height_ratio_end: 1.0,
            generation_spacing: 1.1,
            generation_height_ratio_start: 0.6,
            generation_height_ratio_end: 1.0,
            scale_generation_spacing_with_form: true,
            total_particle_mass: 150.0,
            vis_spacing: 0.0,
            info_spacing: 0.5,
            logging_spacing: 0.1,
            num_blocks_per_direction: [3, 3, 1],
            num_ranks: 1,
            terminal_velocity: 0.05,
            terminal_relative_height_change: 1e-4,
            termination_checking_spacing: 0.2,
            minimal_terminal_run_time: 1.0,
            velocity_damping_coefficient: 0.5,
            use_hash_grids: false,
            solver: SolverKind::Hcsits,
            particle_sorting_spacing: 1000,
            parallel: false,
            shaking: false,
            max_timesteps: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSettings {
    pub dt: f64,
    pub friction_coefficient_static: f64,
    pub friction_coefficient_dynamic: f64,
    pub coefficient_of_restitution: f64,
    pub hcsits: HcsitsSettings,
    pub dem: DemSettings,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            dt: 5e-3,
            friction_coefficient_static: 0.5,
            friction_coefficient_dynamic: 0.4,
            coefficient_of_restitution: 0.1,
            hcsits: HcsitsSettings::default(),
            dem: DemSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HcsitsSettings {
    pub error_reduction_parameter: f64,
    pub relaxation_parameter: f64,
    pub relaxation_model: RelaxationModel,
    pub number_of_iterations: usize,
}

impl Default for HcsitsSettings {
    fn default() -> Self {
        Self {
            error_reduction_parameter: 0.8,
            relaxation_parameter: 0.75,
            relaxation_model: RelaxationModel::InelasticCoulombContactByDecoupling,
            number_of_iterations: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemSettings {
    pub collision_time: f64,
    pub poissons_ratio: f64,
}

impl Default for DemSettings {
    fn default() -> Self {
        Self {
            collision_time: 0.05,
            poissons_ratio: 0.22,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShakingSettings {
    pub amplitude: f64,
    pub period: f64,
    pub duration: f64,
    pub active_from_beginning: bool,
}

impl Default for ShakingSettings {
    fn default() -> Self {
        Self {
            amplitude: 0.05,
            period: 0.1,
            duration: 2.0,
            active_from_beginning: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistributionSettings {
    /// Negative seeds are replaced by the wall-clock time.
    pub random_seed: i64,
    pub uniform: UniformSettings,
    pub log_normal: LogNormalSettings,
    pub diameter_mass_fractions: DiameterMassFractionsSettings,
    pub sieving_curve: SievingCurveSettings,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            random_seed: 41,
            uniform: UniformSettings { diameter: 1.0 },
            log_normal: LogNormalSettings {
                mu: 0.0,
                variance: 0.01,
            },
            diameter_mass_fractions: DiameterMassFractionsSettings {
                diameters: vec![0.8, 1.0, 1.2],
                mass_fractions: vec![0.25, 0.5, 0.25],
            },
            sieving_curve: SievingCurveSettings {
                sieve_sizes: vec![0.7, 0.9, 1.1, 1.3],
                mass_fractions: vec![0.25, 0.5, 0.25],
                use_discrete_form: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniformSettings {
    pub diameter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogNormalSettings {
    pub mu: f64,
    pub variance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiameterMassFractionsSettings {
    pub diameters: Vec<f64>,
    pub mass_fractions: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SievingCurveSettings {
    /// Sieve sizes bounding the classes; one more entry than `mass_fractions`.
    pub sieve_sizes: Vec<f64>,
    pub mass_fractions: Vec<f64>,
    pub use_discrete_form: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShapeSettings {
    pub scale_mode: ScaleMode,
    pub ellipsoid: EllipsoidSettings,
    pub ellipsoid_form_distribution: EllipsoidFormDistributionSettings,
}

impl Default for ShapeSettings {
    fn default() -> Self {
        Self {
            scale_mode: ScaleMode::SphereEquivalent,
            ellipsoid: EllipsoidSettings {
                semi_axes: [0.5, 0.4, 0.3],
            },
            ellipsoid_form_distribution: EllipsoidFormDistributionSettings {
                elongation_mean: 0.7,
                elongation_std_dev: 0.1,
                flatness_mean: 0.7,
                flatness_std_dev: 0.1,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EllipsoidSettings {
    pub semi_axes: [f64; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EllipsoidFormDistributionSettings {
    pub elongation_mean: f64,
    pub elongation_std_dev: f64,
    pub flatness_mean: f64,
    pub flatness_std_dev: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationSettings {
    /// Ascending size bin edges for the particle histogram.
    pub histogram_bins: Vec<f64>,
    pub layer_height: f64,
    /// Folder for the logging and profile files; disabled when unset.
    pub porosity_profile_folder: Option<PathBuf>,
    pub vis_folder: Option<PathBuf>,
    pub final_folder: Option<PathBuf>,
    pub store_file: Option<PathBuf>,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            histogram_bins: vec![0.5, 0.75, 1.0, 1.25, 1.5],
            layer_height: 0.5,
            porosity_profile_folder: None,
            vis_folder: None,
            final_folder: None,
            store_file: None,
        }
    }
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Checks value ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.packing;
        let s = &self.solver;

        if !(p.domain_width > 0.0) {
            return Err(invalid("packing.domain_width", "must be positive"));
        }
        if !(p.domain_height > 0.0) {
            return Err(invalid("packing.domain_height", "must be positive"));
        }
        if !(p.generation_spacing > 0.0 && p.generation_spacing < p.domain_width) {
            return Err(invalid(
                "packing.generation_spacing",
                format!("must lie in (0, domain width {})", p.domain_width),
            ));
        }
        if !(p.particle_density > 0.0) {
            return Err(invalid("packing.particle_density", "must be positive"));
        }
        if !(p.ambient_density >= 0.0) {
            return Err(invalid("packing.ambient_density", "must not be negative"));
        }
        if !(p.total_particle_mass > 0.0) {
            return Err(invalid("packing.total_particle_mass", "must be positive"));
        }
        for (field, start, end) in [
            (
                "packing.initial_generation_height_ratio_start",
                p.initial_generation_height_ratio_start,
                p.initial_generation_height_ratio_end,
            ),
            (
                "packing.generation_height_ratio_start",
                p.generation_height_ratio_start,
                p.generation_height_ratio_end,
            ),
        ] {
            if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) || start >= end {
                return Err(invalid(field, format!("ratios [{start}, {end}] must be ascending within [0, 1]")));
            }
        }
        if p.num_blocks_per_direction.iter().any(|&n| n == 0) {
            return Err(invalid("packing.num_blocks_per_direction", "needs at least one block per direction"));
        }
        let num_blocks: usize = p.num_blocks_per_direction.iter().product();
        if p.num_ranks == 0 || p.num_ranks > num_blocks {
            return Err(invalid(
                "packing.num_ranks",
                format!("must lie in [1, {num_blocks}] (number of blocks)"),
            ));
        }
        if !(p.velocity_damping_coefficient > 0.0 && p.velocity_damping_coefficient <= 1.0) {
            return Err(invalid("packing.velocity_damping_coefficient", "must lie in (0, 1]"));
        }
        if p.initial_velocity < 0.0 {
            return Err(invalid("packing.initial_velocity", "must not be negative"));
        }

        if !(s.dt > 0.0) {
            return Err(invalid("solver.dt", "must be positive"));
        }
        if !(s.coefficient_of_restitution > 0.0 && s.coefficient_of_restitution <= 1.0) {
            return Err(invalid("solver.coefficient_of_restitution", "must lie in (0, 1]"));
        }
        if s.friction_coefficient_static < 0.0 || s.friction_coefficient_dynamic < 0.0 {
            return Err(invalid("solver.friction_coefficient", "must not be negative"));
        }
        match p.solver {
            SolverKind::Hcsits => {
                if s.hcsits.number_of_iterations == 0 {
                    return Err(invalid("solver.hcsits.number_of_iterations", "must be at least 1"));
                }
                if !(s.hcsits.relaxation_parameter > 0.0) {
                    return Err(invalid("solver.hcsits.relaxation_parameter", "must be positive"));
                }
            }
            SolverKind::Dem => {
                if !(s.dem.collision_time > 0.0) {
                    return Err(invalid("solver.dem.collision_time", "must be positive"));
                }
                if !(s.dem.poissons_ratio >= 0.0 && s.dem.poissons_ratio < 0.5) {
                    return Err(invalid("solver.dem.poissons_ratio", "must lie in [0, 0.5)"));
                }
            }
        }

        if p.shaking && !(self.shaking.period > 0.0) {
            return Err(invalid("shaking.period", "must be positive"));
        }

        let d = &self.distribution;
        match p.particle_distribution {
            DistributionKind::Uniform => {
                if !(d.uniform.diameter > 0.0) {
                    return Err(invalid("distribution.uniform.diameter", "must be positive"));
                }
            }
            DistributionKind::LogNormal => {
                if !(d.log_normal.variance >= 0.0) {
                    return Err(invalid("distribution.log_normal.variance", "must not be negative"));
                }
            }
            DistributionKind::DiameterMassFractions => {
                let c = &d.diameter_mass_fractions;
                if c.diameters.is_empty() || c.diameters.len() != c.mass_fractions.len() {
                    return Err(invalid(
                        "distribution.diameter_mass_fractions",
                        format!(
                            "{} diameters but {} mass fractions",
                            c.diameters.len(),
                            c.mass_fractions.len()
                        ),
                    ));
                }
            }
            DistributionKind::SievingCurve => {
                let c = &d.sieving_curve;
                if c.sieve_sizes.len() < 2 || c.sieve_sizes.len() != c.mass_fractions.len() + 1 {
                    return Err(invalid(
                        "distribution.sieving_curve",
                        format!(
                            "{} sieve sizes need {} mass fractions, got {}",
                            c.sieve_sizes.len(),
                            c.sieve_sizes.len().saturating_sub(1),
                            c.mass_fractions.len()
                        ),
                    ));
                }
            }
        }

        if p.particle_shape == ShapeKind::Ellipsoid && self.shape.ellipsoid.semi_axes.iter().any(|&a| !(a > 0.0)) {
            return Err(invalid("shape.ellipsoid.semi_axes", "must be positive"));
        }

        let e = &self.evaluation;
        if e.histogram_bins.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("evaluation.histogram_bins", "must be strictly ascending"));
        }
        if !(e.layer_height > 0.0) {
            return Err(invalid("evaluation.layer_height", "must be positive"));
        }
        Ok(())
    }
}

/// Reads, parses and validates a config file.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Settings::from_json(&text)
}
