use super::sieve::number_fractions;
use super::DistributionError;
use crate::math::DeterministicRng;

/// Per-class particle counts expected for the target mass.
///
/// Draws come from the remaining counts first so the generated mixture
/// tracks the requested mass fractions closely; once the pool is used up,
/// classes are drawn by number fraction.
#[derive(Debug, Clone)]
struct ClassPool {
    number_fractions: Vec<f64>,
    remaining: Vec<u64>,
}

impl ClassPool {
    fn new(
        class_diameters: &[f64],
        mass_fractions: &[f64],
        normal_volume: f64,
        total_mass: f64,
        density: f64,
    ) -> Result<Self, DistributionError> {
        if class_diameters.is_empty() {
            return Err(DistributionError::Empty("diameters"));
        }
        if class_diameters.len() != mass_fractions.len() {
            return Err(DistributionError::LengthMismatch {
                expected: class_diameters.len(),
                found: mass_fractions.len(),
            });
        }
        if let Some(&d) = class_diameters.iter().find(|d| **d <= 0.0) {
            return Err(DistributionError::NonPositive { what: "diameter", value: d });
        }
        if mass_fractions.iter().sum::<f64>() <= 0.0 {
            return Err(DistributionError::NoMass);
        }
        let number_fractions = number_fractions(class_diameters, mass_fractions);
        let mean_mass: f64 = number_fractions
            .iter()
            .zip(class_diameters)
            .map(|(n, d)| n * density * normal_volume * d.powi(3))
            .sum();
        let expected_total = if mean_mass > 0.0 { total_mass / mean_mass } else { 0.0 };
        let remaining = number_fractions
            .iter()
            .map(|n| (n * expected_total).round().max(0.0) as u64)
            .collect();
        Ok(Self {
            number_fractions,
            remaining,
        })
    }

    fn draw_class(&mut self, rng: &mut DeterministicRng) -> usize {
        let left: u64 = self.remaining.iter().sum();
        if left > 0 {
            let mut pick = (rng.unit() * left as f64) as u64;
            for (class, count) in self.remaining.iter_mut().enumerate() {
                if pick < *count {
                    *count -= 1;
                    return class;
                }
                pick -= *count;
            }
        }
        let mut pick = rng.unit();
        for (class, n) in self.number_fractions.iter().enumerate() {
            if pick < *n {
                return class;
            }
            pick -= n;
        }
        self.number_fractions
            .iter()
            .rposition(|n| *n > 0.0)
            .unwrap_or(0)
    }
}

/// Draws class mean diameters.
#[derive(Debug, Clone)]
pub struct DiscreteSieving {
    diameters: Vec<f64>,
    pool: ClassPool,
    rng: DeterministicRng,
}

impl DiscreteSieving {
    pub fn new(
        diameters: Vec<f64>,
        mass_fractions: &[f64],
        seed: u64,
        normal_volume: f64,
        total_mass: f64,
        density: f64,
    ) -> Result<Self, DistributionError> {
        let pool = ClassPool::new(&diameters, mass_fractions, normal_volume, total_mass, density)?;
        Ok(Self {
            diameters,
            pool,
            rng: DeterministicRng::new(seed),
        })
    }

    pub fn draw(&mut self) -> f64 {
        let class = self.pool.draw_class(&mut self.rng);
        self.diameters[class]
    }
}

/// Draws a sieve class, then a diameter log-uniformly inside it.
#[derive(Debug, Clone)]
pub struct ContinuousSieving {
    sieve_sizes: Vec<f64>,
    pool: ClassPool,
    rng: DeterministicRng,
}

impl ContinuousSieving {
    pub fn new(
        sieve_sizes: Vec<f64>,
        mass_fractions: &[f64],
        seed: u64,
        normal_volume: f64,
        total_mass: f64,
        density: f64,
    ) -> Result<Self, DistributionError> {
        if sieve_sizes.len() < 2 {
            return Err(DistributionError::Empty("sieve sizes"));
        }
        let means = super::mean_diameters_from_sieve_sizes(&sieve_sizes);
        let pool = ClassPool::new(&means, mass_fractions, normal_volume, total_mass, density)?;
        Ok(Self {
            sieve_sizes,
            pool,
            rng: DeterministicRng::new(seed),
        })
    }

    pub fn draw(&mut self) -> f64 {
        let class = self.pool.draw_class(&mut self.rng);
        let lo = self.sieve_sizes[class].ln();
        let hi = self.sieve_sizes[class + 1].ln();
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self.rng.uniform(lo, hi).exp()
    }
}

#[derive(Debug, Clone)]
pub enum DiameterSource {
    Uniform { diameter: f64 },
    LogNormal { mu: f64, variance: f64, rng: DeterministicRng },
    Discrete(DiscreteSieving),
    Continuous(ContinuousSieving),
}

impl DiameterSource {
    pub fn uniform(diameter: f64) -> Self {
        DiameterSource::Uniform { diameter }
    }

    pub fn log_normal(mu: f64, variance: f64, seed: u64) -> Self {
        DiameterSource::LogNormal {
            mu,
            variance,
            rng: DeterministicRng::new(seed),
        }
    }

    pub fn draw(&mut self) -> f64 {
        match self {
            DiameterSource::Uniform { diameter } => *diameter,
            DiameterSource::LogNormal { mu, variance, rng } => {
                rng.gaussian(*mu, variance.max(0.0).sqrt()).exp()
            }
            DiameterSource::Discrete(d) => d.draw(),
            DiameterSource::Continuous(c) => c.draw(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiameterSource::Uniform { .. } => "Uniform",
            DiameterSource::LogNormal { .. } => "LogNormal",
            DiameterSource::Discrete(_) => "DiscreteSieving",
            DiameterSource::Continuous(_) => "ContinuousSieving",
        }
    }
}
