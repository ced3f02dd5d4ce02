//! Configuration resolution
//!
//! Turns the mode names of [`Settings`] into the domain geometry, the
//! diameter and shape sources and the a-priori size range. Everything here
//! runs once before the first step.

use settle_core::data::Shape;
use settle_core::distribution::{
    mean_diameters_from_sieve_sizes, percentile_from_sieve_distribution, ContinuousSieving, DiameterSource,
    DiscreteSieving, DistributionError, FormSource, ShapeSource,
};
use settle_core::kernel::stiffness_ratio;
use settle_core::math::{Aabb, DVec3};
use settle_net::{BlockForest, Cluster};
use settle_services::settings::{DistributionKind, DomainSetup, ShapeKind};
use settle_services::Settings;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Geometry of the settling domain.
#[derive(Debug, Clone, Copy)]
pub struct DomainSpec {
    pub aabb: Aabb,
    pub setup: DomainSetup,
    pub periodic: [bool; 3],
    /// Volume available to particles.
    pub volume: f64,
    /// Horizontal cross-section area.
    pub cross_section: f64,
    /// Largest interaction radius a particle may have; infinite for
    /// containers.
    pub max_allowed_interaction_radius: f64,
}

impl DomainSpec {
    pub fn from_settings(settings: &Settings) -> Self {
        let w = settings.packing.domain_width;
        let h = settings.packing.domain_height;
        let aabb = Aabb::new(DVec3::new(-0.5 * w, -0.5 * w, 0.0), DVec3::new(0.5 * w, 0.5 * w, h));
        match settings.packing.domain_setup {
            DomainSetup::Container => Self {
                aabb,
                setup: DomainSetup::Container,
                periodic: [false; 3],
                volume: PI * w * w * 0.25 * h,
                cross_section: PI * w * w * 0.25,
                max_allowed_interaction_radius: f64::INFINITY,
            },
            // Two large particles side by side would otherwise touch
            // through both periodic faces at once.
            DomainSetup::Periodic => Self {
                aabb,
                setup: DomainSetup::Periodic,
                periodic: [true, true, false],
                volume: aabb.volume(),
                cross_section: w * w,
                max_allowed_interaction_radius: 0.25 * w,
            },
        }
    }

    pub fn is_container(&self) -> bool {
        self.setup == DomainSetup::Container
    }

    pub fn height(&self) -> f64 {
        self.aabb.max.z
    }
}

/// Negative seeds are replaced by the wall-clock time.
pub fn resolve_seed(random_seed: i64) -> u64 {
    if random_seed >= 0 {
        random_seed as u64
    } else {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

pub fn shape_source(settings: &Settings, seed: u64) -> ShapeSource {
    let mode = settings.shape.scale_mode;
    match settings.packing.particle_shape {
        ShapeKind::Sphere => ShapeSource::Sphere,
        ShapeKind::Ellipsoid => {
            let axes = DVec3::from_array(settings.shape.ellipsoid.semi_axes);
            ShapeSource::Ellipsoid(FormSource::constant(axes, mode))
        }
        ShapeKind::EllipsoidFormDistribution => {
            let c = &settings.shape.ellipsoid_form_distribution;
            ShapeSource::Ellipsoid(FormSource::distribution(
                (c.elongation_mean, c.elongation_std_dev),
                (c.flatness_mean, c.flatness_std_dev),
                mode,
                seed,
            ))
        }
    }
}

/// A diameter source and, where determinable, the range of diameters it
/// can produce.
#[derive(Debug, Clone)]
pub struct DiameterSetup {
    pub source: DiameterSource,
    pub range: Option<(f64, f64)>,
}

fn range_of_nonzero_classes(bounds: impl Iterator<Item = (f64, f64, f64)>) -> Option<(f64, f64)> {
    bounds
        .filter(|&(_, _, fraction)| fraction > 0.0)
        .fold(None, |acc, (lo, hi, _)| match acc {
            None => Some((lo, hi)),
            Some((min, max)) => Some((f64::min(min, lo), f64::max(max, hi))),
        })
}

pub fn diameter_source(settings: &Settings, normal_volume: f64, seed: u64) -> Result<DiameterSetup, DistributionError> {
    let d = &settings.distribution;
    let total_mass = settings.packing.total_particle_mass;
    let density = settings.packing.particle_density;
    match settings.packing.particle_distribution {
        DistributionKind::Uniform => {
            info!("Using uniform distribution");
            let diameter = d.uniform.diameter;
            Ok(DiameterSetup {
                source: DiameterSource::uniform(diameter),
                range: Some((diameter, diameter)),
            })
        }
        DistributionKind::LogNormal => {
            let c = &d.log_normal;
            info!(mu = c.mu, variance = c.variance, "Using log-normal distribution");
            Ok(DiameterSetup {
                source: DiameterSource::log_normal(c.mu, c.variance, seed),
                range: None,
            })
        }
        DistributionKind::DiameterMassFractions => {
            let c = &d.diameter_mass_fractions;
            info!("Using diameter - mass fraction distribution");
            let sieving = DiscreteSieving::new(
                c.diameters.clone(),
                &c.mass_fractions,
                seed,
                normal_volume,
                total_mass,
                density,
            )?;
            let range = range_of_nonzero_classes(
                c.diameters.iter().zip(&c.mass_fractions).map(|(&d, &f)| (d, d, f)),
            );
            Ok(DiameterSetup {
                source: DiameterSource::Discrete(sieving),
                range,
            })
        }
        DistributionKind::SievingCurve => {
            let c = &d.sieving_curve;
            let diameters = mean_diameters_from_sieve_sizes(&c.sieve_sizes);
            let d16 = percentile_from_sieve_distribution(&diameters, &c.mass_fractions, 16.0);
            let d50 = percentile_from_sieve_distribution(&diameters, &c.mass_fractions, 50.0);
            let d84 = percentile_from_sieve_distribution(&diameters, &c.mass_fractions, 84.0);
            info!(d50, d16, d84, std_dev = (d84 / d16).sqrt(), "Curve properties");

            if c.use_discrete_form {
                info!("Using discrete sieving curve distribution");
                let range = range_of_nonzero_classes(
                    diameters.iter().zip(&c.mass_fractions).map(|(&d, &f)| (d, d, f)),
                );
                let sieving =
                    DiscreteSieving::new(diameters, &c.mass_fractions, seed, normal_volume, total_mass, density)?;
                Ok(DiameterSetup {
                    source: DiameterSource::Discrete(sieving),
                    range,
                })
            } else {
                info!("Using piece-wise constant / continuous sieving curve distribution");
                let range = range_of_nonzero_classes(c.sieve_sizes.windows(2).zip(&c.mass_fractions).map(
                    |(w, &f)| (w[0].min(w[1]), w[0].max(w[1]), f),
                ));
                let sieving = ContinuousSieving::new(
                    c.sieve_sizes.clone(),
                    &c.mass_fractions,
                    seed,
                    normal_volume,
                    total_mass,
                    density,
                )?;
                Ok(DiameterSetup {
                    source: DiameterSource::Continuous(sieving),
                    range,
                })
            }
        }
    }
}

/// Block partition of the domain over the configured ranks.
pub fn block_forest(settings: &Settings, domain: &DomainSpec) -> BlockForest {
    let blocks = settings.packing.num_blocks_per_direction;
    if domain.setup == DomainSetup::Periodic {
        info!(
            max_interaction_radius = domain.max_allowed_interaction_radius,
            "Periodic case: the maximum interaction radius is restricted to ensure valid periodic interaction"
        );
        if blocks[0] < 3 || blocks[1] < 3 {
            warn!("At least 3 blocks per periodic direction required for proper simulation");
        }
    }
    BlockForest::new(domain.aabb, blocks, domain.periodic, settings.packing.num_ranks)
}

/// Bottom and top planes, plus the cylinder wall of a container.
pub fn add_walls(cluster: &mut Cluster, domain: &DomainSpec) {
    cluster.add_global(DVec3::ZERO, Arc::new(Shape::HalfSpace { normal: DVec3::Z }));
    cluster.add_global(
        DVec3::new(0.0, 0.0, domain.height()),
        Arc::new(Shape::HalfSpace { normal: DVec3::NEG_Z }),
    );
    if domain.is_container() {
        cluster.add_global(
            DVec3::ZERO,
            Arc::new(Shape::CylindricalBoundary {
                radius: 0.5 * domain.aabb.size().x,
                axis: DVec3::Z,
            }),
        );
    }
}

/// Physical constants derived from the settings.
#[derive(Debug, Clone, Copy)]
pub struct Physics {
    /// Gravity reduced by buoyancy.
    pub reduced_gravity: f64,
    /// Tangential to normal stiffness ratio for DEM.
    pub kappa: f64,
}

impl Physics {
    pub fn from_settings(settings: &Settings) -> Self {
        let p = &settings.packing;
        Self {
            reduced_gravity: (p.particle_density - p.ambient_density) / p.particle_density
                * p.gravitational_acceleration,
            kappa: stiffness_ratio(settings.solver.dem.poissons_ratio),
        }
    }
}

/// Everything resolved from the settings before the cluster is built.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub domain: DomainSpec,
    pub seed: u64,
    pub shapes: ShapeSource,
    pub diameters: DiameterSetup,
    pub physics: Physics,
}

impl Resolved {
    pub fn from_settings(settings: &Settings) -> Result<Self, DistributionError> {
        let domain = DomainSpec::from_settings(settings);
        info!(domain = ?domain.aabb, "Creating domain");

        let seed = resolve_seed(settings.distribution.random_seed);
        let shapes = shape_source(settings, seed.wrapping_add(1));
        info!(
            max_diameter_scaling = shapes.max_diameter_scaling_factor(),
            normal_volume = shapes.normal_volume(),
            single_shape = shapes.generates_single_shape(),
            "Will create particles with"
        );

        info!(seed, "Random seed");
        let diameters = diameter_source(settings, shapes.normal_volume(), seed)?;
        match diameters.range {
            Some((min, max)) => info!(
                min,
                max,
                spacing = settings.packing.generation_spacing,
                "Generate with diameters in range"
            ),
            None => info!("Diameter range not determinable a priori, will use sampled diameters"),
        }

        Ok(Self {
            domain,
            seed,
            shapes,
            diameters,
            physics: Physics::from_settings(settings),
        })
    }

    /// Largest expected interaction diameter known before sampling.
    pub fn a_priori_max_diameter(&self) -> Option<f64> {
        self.diameters
            .range
            .map(|(_, max)| max * self.shapes.max_diameter_scaling_factor())
    }
}
