//! Synthetic dataset generators for the worked examples.
//!
//! Every generator takes an explicit seed and draws from its own `ChaCha20Rng`,
//! so two examples never share random state and a fixed seed always reproduces
//! the same dataset bit for bit.
//!
//! Group labels are 1-based, matching Stan's array indexing.

mod hierarchy;

pub use hierarchy::{
    simulate_grouped_regression, simulate_three_level, GroupHierarchy, GroupedRegression,
    GroupedRegressionSpec, ThreeLevelData, ThreeLevelSpec,
};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while simulating data, always before any engine call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataGenError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub(crate) fn seeded_rng(seed: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed)
}

pub(crate) fn ensure_count(name: &str, n: usize) -> Result<(), DataGenError> {
    if n == 0 {
        return Err(DataGenError::InvalidArgument(format!(
            "{name} must be a positive integer, got 0"
        )));
    }
    Ok(())
}

pub(crate) fn normal(name: &str, mu: f64, sigma: f64) -> Result<Normal<f64>, DataGenError> {
    if !mu.is_finite() || !sigma.is_finite() || sigma <= 0.0 {
        return Err(DataGenError::InvalidArgument(format!(
            "{name} needs a finite location and a positive scale, got ({mu}, {sigma})"
        )));
    }
    Normal::new(mu, sigma).map_err(|e| DataGenError::InvalidArgument(format!("{name}: {e}")))
}

/// A plain sequence of real-valued observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    pub values: Vec<f64>,
}

impl Observations {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        mean(&self.values)
    }
}

/// Observations with an index-aligned 1-based group label per value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedObservations {
    pub values: Vec<f64>,
    pub groups: Vec<usize>,
    pub n_groups: usize,
}

impl GroupedObservations {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values belonging to one group (1-based).
    pub fn group_values(&self, group: usize) -> Vec<f64> {
        self.values
            .iter()
            .zip(&self.groups)
            .filter(|(_, g)| **g == group)
            .map(|(&v, _)| v)
            .collect()
    }
}

/// Before/after measurements on the same subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedObservations {
    pub before: Vec<f64>,
    pub after: Vec<f64>,
}

impl PairedObservations {
    pub fn len(&self) -> usize {
        self.before.len()
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
    }

    pub fn differences(&self) -> Vec<f64> {
        self.after
            .iter()
            .zip(&self.before)
            .map(|(a, b)| a - b)
            .collect()
    }
}

/// Predictor/response pairs for a simple linear regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl RegressionData {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Single normal sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalSpec {
    pub n: usize,
    pub mu: f64,
    pub sigma: f64,
}

impl Default for NormalSpec {
    fn default() -> Self {
        Self {
            n: 10,
            mu: 10.0,
            sigma: 5.0,
        }
    }
}

/// Normal sample with a few indices overwritten by hand-picked extremes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierSpec {
    pub base: NormalSpec,
    /// `(index, value)` pairs, 0-based.
    pub outliers: Vec<(usize, f64)>,
}

impl Default for OutlierSpec {
    fn default() -> Self {
        Self {
            base: NormalSpec {
                n: 20,
                mu: 10.0,
                sigma: 5.0,
            },
            outliers: vec![(0, 60.0), (1, -40.0), (2, 75.0)],
        }
    }
}

/// Paired design: `after = before + delta + noise`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedSpec {
    pub n: usize,
    pub mu: f64,
    pub sigma: f64,
    pub delta: f64,
    pub sigma_diff: f64,
}

impl Default for PairedSpec {
    fn default() -> Self {
        Self {
            n: 15,
            mu: 100.0,
            sigma: 15.0,
            delta: 5.0,
            sigma_diff: 3.0,
        }
    }
}

/// Two independent normal groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoGroupSpec {
    pub group1: NormalSpec,
    pub group2: NormalSpec,
}

impl Default for TwoGroupSpec {
    fn default() -> Self {
        Self {
            group1: NormalSpec {
                n: 20,
                mu: 10.0,
                sigma: 3.0,
            },
            group2: NormalSpec {
                n: 25,
                mu: 13.0,
                sigma: 4.0,
            },
        }
    }
}

/// Straight line with normal noise and uniformly spread predictors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSpec {
    pub n: usize,
    pub alpha: f64,
    pub beta: f64,
    pub sigma: f64,
    pub x_min: f64,
    pub x_max: f64,
}

impl Default for LinearSpec {
    fn default() -> Self {
        Self {
            n: 50,
            alpha: 2.0,
            beta: 0.5,
            sigma: 1.0,
            x_min: 0.0,
            x_max: 10.0,
        }
    }
}

pub(crate) fn uniform(name: &str, lo: f64, hi: f64) -> Result<Uniform<f64>, DataGenError> {
    if !(lo.is_finite() && hi.is_finite() && lo < hi) {
        return Err(DataGenError::InvalidArgument(format!(
            "{name} needs lower < upper, got [{lo}, {hi})"
        )));
    }
    Ok(Uniform::new(lo, hi))
}

/// Draw `spec.n` independent values from `Normal(mu, sigma)`.
pub fn simulate_normal(spec: &NormalSpec, seed: u64) -> Result<Observations, DataGenError> {
    let mut rng = seeded_rng(seed);
    draw_normal(&mut rng, "normal sample", spec).map(|values| Observations { values })
}

fn draw_normal(
    rng: &mut ChaCha20Rng,
    name: &str,
    spec: &NormalSpec,
) -> Result<Vec<f64>, DataGenError> {
    ensure_count(&format!("{name} size"), spec.n)?;
    let dist = normal(name, spec.mu, spec.sigma)?;
    Ok((0..spec.n).map(|_| dist.sample(&mut *rng)).collect())
}

/// Normal sample with the configured indices replaced by outliers.
pub fn simulate_with_outliers(spec: &OutlierSpec, seed: u64) -> Result<Observations, DataGenError> {
    let mut obs = simulate_normal(&spec.base, seed)?;
    for &(index, value) in &spec.outliers {
        let slot = obs.values.get_mut(index).ok_or_else(|| {
            DataGenError::InvalidArgument(format!(
                "outlier index {index} out of range for {} observations",
                spec.base.n
            ))
        })?;
        *slot = value;
    }
    Ok(obs)
}

pub fn simulate_paired(spec: &PairedSpec, seed: u64) -> Result<PairedObservations, DataGenError> {
    ensure_count("paired sample size", spec.n)?;
    let mut rng = seeded_rng(seed);
    let baseline = normal("baseline", spec.mu, spec.sigma)?;
    let change = normal("paired change", spec.delta, spec.sigma_diff)?;

    let before: Vec<f64> = (0..spec.n).map(|_| baseline.sample(&mut rng)).collect();
    let after = before.iter().map(|b| b + change.sample(&mut rng)).collect();
    Ok(PairedObservations { before, after })
}

/// Group 1 values first, then group 2, labelled `1` and `2`.
pub fn simulate_two_groups(
    spec: &TwoGroupSpec,
    seed: u64,
) -> Result<GroupedObservations, DataGenError> {
    let mut rng = seeded_rng(seed);
    let mut values = draw_normal(&mut rng, "group 1", &spec.group1)?;
    values.extend(draw_normal(&mut rng, "group 2", &spec.group2)?);

    let groups = std::iter::repeat(1)
        .take(spec.group1.n)
        .chain(std::iter::repeat(2).take(spec.group2.n))
        .collect();

    Ok(GroupedObservations {
        values,
        groups,
        n_groups: 2,
    })
}

pub fn simulate_linear(spec: &LinearSpec, seed: u64) -> Result<RegressionData, DataGenError> {
    let mut rng = seeded_rng(seed);
    let (x, y) = draw_line(&mut rng, spec.n, spec.alpha, spec.beta, spec)?;
    Ok(RegressionData { x, y })
}

/// Shared by the single-line and per-group regression generators.
pub(crate) fn draw_line(
    rng: &mut ChaCha20Rng,
    n: usize,
    alpha: f64,
    beta: f64,
    spec: &LinearSpec,
) -> Result<(Vec<f64>, Vec<f64>), DataGenError> {
    ensure_count("regression sample size", n)?;
    let xs = uniform("predictor range", spec.x_min, spec.x_max)?;
    let noise = normal("residual", 0.0, spec.sigma)?;

    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        let xi = xs.sample(&mut *rng);
        x.push(xi);
        y.push(alpha + beta * xi + noise.sample(&mut *rng));
    }
    Ok((x, y))
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_sample_count_and_seed() {
        let spec = NormalSpec::default();
        let a = simulate_normal(&spec, 2019).unwrap();
        let b = simulate_normal(&spec, 2019).unwrap();
        assert_eq!(a.len(), 10);
        assert_eq!(a, b);

        let c = simulate_normal(&spec, 2020).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_zero_count_rejected() {
        let spec = NormalSpec {
            n: 0,
            ..NormalSpec::default()
        };
        let err = simulate_normal(&spec, 1).unwrap_err();
        assert!(matches!(err, DataGenError::InvalidArgument(_)));
    }

    #[test]
    fn test_non_positive_scale_rejected() {
        let spec = NormalSpec {
            sigma: 0.0,
            ..NormalSpec::default()
        };
        assert!(simulate_normal(&spec, 1).is_err());
    }

    #[test]
    fn test_outliers_overwrite_fixed_indices() {
        let spec = OutlierSpec::default();
        let clean = simulate_normal(&spec.base, 7).unwrap();
        let dirty = simulate_with_outliers(&spec, 7).unwrap();

        assert_eq!(dirty.len(), spec.base.n);
        assert_eq!(dirty.values[0], 60.0);
        assert_eq!(dirty.values[1], -40.0);
        assert_eq!(dirty.values[2], 75.0);
        assert_eq!(&dirty.values[3..], &clean.values[3..]);
    }

    #[test]
    fn test_outlier_index_out_of_range() {
        let spec = OutlierSpec {
            base: NormalSpec {
                n: 3,
                ..NormalSpec::default()
            },
            outliers: vec![(3, 100.0)],
        };
        assert!(simulate_with_outliers(&spec, 7).is_err());
    }

    #[test]
    fn test_paired_lengths_and_mean_shift() {
        let spec = PairedSpec {
            n: 5000,
            ..PairedSpec::default()
        };
        let data = simulate_paired(&spec, 11).unwrap();
        assert_eq!(data.before.len(), 5000);
        assert_eq!(data.after.len(), 5000);

        let mean_diff = mean(&data.differences());
        assert!((mean_diff - spec.delta).abs() < 0.2);
    }

    #[test]
    fn test_two_groups_labels_aligned() {
        let spec = TwoGroupSpec::default();
        let data = simulate_two_groups(&spec, 3).unwrap();
        assert_eq!(data.values.len(), 45);
        assert_eq!(data.groups.len(), 45);
        assert_eq!(data.group_values(1).len(), 20);
        assert_eq!(data.group_values(2).len(), 25);
        assert!(data.groups.iter().all(|&g| g == 1 || g == 2));
    }

    #[test]
    fn test_linear_predictors_in_range() {
        let spec = LinearSpec::default();
        let data = simulate_linear(&spec, 5).unwrap();
        assert_eq!(data.x.len(), spec.n);
        assert_eq!(data.y.len(), spec.n);
        assert!(data.x.iter().all(|&x| x >= spec.x_min && x < spec.x_max));
    }

    #[test]
    fn test_linear_rejects_empty_range() {
        let spec = LinearSpec {
            x_min: 5.0,
            x_max: 5.0,
            ..LinearSpec::default()
        };
        assert!(simulate_linear(&spec, 5).is_err());
    }
}
