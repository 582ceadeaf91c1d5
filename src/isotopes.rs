//! A Poisson approximation of peptide isotope abundances and the divergence used to
//! compare observed envelopes against it.

/// The mass of a proton in Daltons
pub const PROTON: f64 = 1.00727646688;

/// The neutral mass per unit of the Poisson mean. A peptide of mass `m` is modeled as
/// having a Poisson-distributed number of heavy isotopes with mean `m / 1800`.
pub const POISSON_MASS_SCALE: f64 = 1800.0;

const EPSILON: f64 = 1e-12;

/// The neutral mass of an ion observed at `mz` with `charge` protons
#[inline]
pub fn neutral_mass(mz: f64, charge: i32) -> f64 {
    (mz - PROTON) * charge as f64
}

/// The m/z of a neutral `mass` carrying `charge` protons
#[inline]
pub fn mass_charge_ratio(mass: f64, charge: i32) -> f64 {
    mass / charge as f64 + PROTON
}

/// The m/z spacing between consecutive isotope peaks at `charge`
#[inline]
pub fn isotopic_shift(charge: i32) -> f64 {
    1.0 / charge as f64
}

/// Predicts the relative abundance of the first few isotope peaks of a peptide from
/// its mass alone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoissonIsotopeModel {
    pub slots: usize,
    pub mass_scale: f64,
}

impl Default for PoissonIsotopeModel {
    fn default() -> Self {
        Self::new(6)
    }
}

impl PoissonIsotopeModel {
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            mass_scale: POISSON_MASS_SCALE,
        }
    }

    /// The normalized abundances of isotope slots `0..slots` for a neutral `mass`
    pub fn distribution(&self, mass: f64) -> Vec<f32> {
        if self.slots == 0 {
            return Vec::new();
        }
        let lambda = mass / self.mass_scale;
        if lambda <= 0.0 {
            let mut terms = vec![0.0; self.slots];
            terms[0] = 1.0;
            return terms;
        }
        // ln p_k = k ln(lambda) - lambda - ln(k!)
        let log_lambda = lambda.ln();
        let terms: Vec<f64> = (0..self.slots)
            .map(|k| {
                let k = k as f64;
                (k * log_lambda - lambda - libm::lgamma(k + 1.0)).exp()
            })
            .collect();
        let total: f64 = terms.iter().sum();
        terms.into_iter().map(|t| (t / total) as f32).collect()
    }
}

/// Normalize `intensities` to sum to one after raising every slot to at least
/// `floor_fraction` of the most intense slot
pub fn normalize_with_floor(intensities: &[f32], floor_fraction: f32) -> Vec<f32> {
    let max = intensities.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0; intensities.len()];
    }
    let floor = max * floor_fraction;
    let floored: Vec<f64> = intensities
        .iter()
        .map(|v| v.max(floor) as f64)
        .collect();
    let total: f64 = floored.iter().sum();
    floored.into_iter().map(|v| (v / total) as f32).collect()
}

fn kullback_leibler(p: &[f64], q: &[f64]) -> f64 {
    p.iter()
        .zip(q.iter())
        .map(|(pi, qi)| {
            if *pi <= 0.0 {
                0.0
            } else {
                pi * (pi / qi.max(EPSILON)).ln()
            }
        })
        .sum()
}

/// The mean of the Kullback-Leibler divergences of `observed` from `theoretical` and of
/// `theoretical` from `observed`. Both distributions should already be normalized.
pub fn symmetric_kl(observed: &[f32], theoretical: &[f32]) -> f32 {
    let n = observed.len().min(theoretical.len());
    let p: Vec<f64> = observed[..n].iter().map(|v| (*v as f64).max(EPSILON)).collect();
    let q: Vec<f64> = theoretical[..n]
        .iter()
        .map(|v| (*v as f64).max(EPSILON))
        .collect();
    (0.5 * (kullback_leibler(&p, &q) + kullback_leibler(&q, &p))) as f32
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mass_conversion() {
        let mass = neutral_mass(500.0, 2);
        assert!((mass - 997.98544706624).abs() < 1e-9);
        assert!((mass_charge_ratio(mass, 2) - 500.0).abs() < 1e-9);
        assert_eq!(isotopic_shift(4), 0.25);
    }

    #[test]
    fn test_poisson_distribution() {
        let model = PoissonIsotopeModel::new(6);
        let dist = model.distribution(1800.0);
        assert_eq!(dist.len(), 6);
        assert!((dist.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        // With a mean of one the first two slots are equally abundant
        assert!((dist[0] - dist[1]).abs() < 1e-6);
        assert!(dist[2] < dist[1]);

        let light = model.distribution(0.0);
        assert_eq!(light[0], 1.0);
        assert!(light[1..].iter().all(|v| *v == 0.0));

        let heavy = model.distribution(5400.0);
        let apex = heavy
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!(apex >= 2);
    }

    #[test]
    fn test_divergence() {
        let model = PoissonIsotopeModel::new(6);
        let theo = model.distribution(1000.0);
        assert!(symmetric_kl(&theo, &theo).abs() < 1e-6);

        let observed = normalize_with_floor(&[100.0, 50.0, 0.0, 0.0, 0.0, 0.0], 0.001);
        assert!((observed.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(observed[5] > 0.0);
        let kl = symmetric_kl(&observed, &theo);
        assert!(kl > 0.0);
        let kl_rev = symmetric_kl(&theo, &observed);
        assert!((kl - kl_rev).abs() < 1e-6);

        let shuffled = normalize_with_floor(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0], 0.001);
        assert!(symmetric_kl(&shuffled, &theo) > kl);
    }
}
