/// Geometric mean of neighbouring sieve sizes.
pub fn mean_diameters_from_sieve_sizes(sieve_sizes: &[f64]) -> Vec<f64> {
    sieve_sizes
        .windows(2)
        .map(|w| (w[0] * w[1]).sqrt())
        .collect()
}

/// Diameter below which `percentile` percent of the mass lies.
///
/// Interpolates the cumulative mass fraction linearly in log-diameter
/// between class diameters.
pub fn percentile_from_sieve_distribution(diameters: &[f64], mass_fractions: &[f64], percentile: f64) -> f64 {
    let mut classes: Vec<(f64, f64)> = diameters
        .iter()
        .copied()
        .zip(mass_fractions.iter().copied())
        .collect();
    if classes.is_empty() {
        return 0.0;
    }
    classes.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = classes.iter().map(|c| c.1).sum();
    if total <= 0.0 {
        return classes[0].0;
    }
    let target = percentile / 100.0;
    let mut cumulative = 0.0;
    let mut prev = (classes[0].0, 0.0);
    for &(d, f) in &classes {
        cumulative += f / total;
        if cumulative >= target {
            let (d0, c0) = prev;
            if cumulative - c0 <= f64::EPSILON || d0 <= 0.0 {
                return d;
            }
            let t = ((target - c0) / (cumulative - c0)).clamp(0.0, 1.0);
            return (d0.ln() + t * (d.ln() - d0.ln())).exp();
        }
        prev = (d, cumulative);
    }
    classes[classes.len() - 1].0
}

/// Number fractions from mass fractions for shapes of volume
/// `normal_volume * d^3`.
pub(super) fn number_fractions(diameters: &[f64], mass_fractions: &[f64]) -> Vec<f64> {
    let raw: Vec<f64> = diameters
        .iter()
        .zip(mass_fractions)
        .map(|(d, f)| f / d.powi(3))
        .collect();
    let sum: f64 = raw.iter().sum();
    if sum <= 0.0 {
        return raw;
    }
    raw.into_iter().map(|n| n / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn class_means_are_geometric() {
        let d = mean_diameters_from_sieve_sizes(&[1.0, 4.0, 16.0]);
        assert_eq!(d.len(), 2);
        assert_relative_eq!(d[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(d[1], 8.0, epsilon = 1e-12);
    }

    #[test]
    fn median_of_two_equal_classes_lies_between_them() {
        let d50 = percentile_from_sieve_distribution(&[1.0, 4.0], &[0.5, 0.5], 50.0);
        assert_relative_eq!(d50, 1.0, epsilon = 1e-12);
        let d75 = percentile_from_sieve_distribution(&[1.0, 4.0], &[0.5, 0.5], 75.0);
        assert_relative_eq!(d75, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn small_particles_dominate_number_fractions() {
        let n = number_fractions(&[1.0, 2.0], &[0.5, 0.5]);
        assert_relative_eq!(n[0], 8.0 / 9.0, epsilon = 1e-12);
        assert_relative_eq!(n[0] + n[1], 1.0, epsilon = 1e-12);
    }
}
