//! Nested (hierarchical) generators.
//!
//! Draws proceed top-down: hyperparameters, then each child's parameters from
//! its already-realized parent, then leaf observations from the realized leaf
//! parameters.

use super::{draw_line, ensure_count, mean, normal, seeded_rng, DataGenError, LinearSpec};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};

/// Child → parent mapping with 1-based parent indices.
///
/// Every entry is guaranteed to lie in `1..=n_parents`; deserialized values
/// go through the same check as `new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHierarchy")]
pub struct GroupHierarchy {
    parent_of: Vec<usize>,
    n_parents: usize,
}

#[derive(Deserialize)]
struct RawHierarchy {
    parent_of: Vec<usize>,
    n_parents: usize,
}

impl TryFrom<RawHierarchy> for GroupHierarchy {
    type Error = DataGenError;

    fn try_from(raw: RawHierarchy) -> Result<Self, Self::Error> {
        Self::new(raw.parent_of, raw.n_parents)
    }
}

impl GroupHierarchy {
    pub fn new(parent_of: Vec<usize>, n_parents: usize) -> Result<Self, DataGenError> {
        ensure_count("number of children", parent_of.len())?;
        ensure_count("number of parents", n_parents)?;
        if let Some((child, &parent)) = parent_of
            .iter()
            .enumerate()
            .find(|&(_, &p)| p == 0 || p > n_parents)
        {
            return Err(DataGenError::InvalidArgument(format!(
                "child {} refers to parent {parent}, expected 1..={n_parents}",
                child + 1
            )));
        }
        Ok(Self {
            parent_of,
            n_parents,
        })
    }

    /// Balanced assignment: child `i` (0-based) belongs to parent `i % n_parents + 1`.
    ///
    /// Needs at least as many children as parents so no parent is left empty.
    pub fn round_robin(n_children: usize, n_parents: usize) -> Result<Self, DataGenError> {
        ensure_count("number of parents", n_parents)?;
        if n_children < n_parents {
            return Err(DataGenError::InvalidArgument(format!(
                "{n_children} children cannot cover {n_parents} parents"
            )));
        }
        Self::new((0..n_children).map(|i| i % n_parents + 1).collect(), n_parents)
    }

    pub fn parent_of(&self, child: usize) -> Option<usize> {
        child.checked_sub(1).and_then(|i| self.parent_of.get(i)).copied()
    }

    pub fn parents(&self) -> &[usize] {
        &self.parent_of
    }

    pub fn n_children(&self) -> usize {
        self.parent_of.len()
    }

    pub fn n_parents(&self) -> usize {
        self.n_parents
    }

    /// 1-based children of one parent.
    pub fn children(&self, parent: usize) -> Vec<usize> {
        self.parent_of
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == parent)
            .map(|(i, _)| i + 1)
            .collect()
    }
}

/// Regression where every group has its own intercept and slope, drawn from
/// shared population distributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedRegressionSpec {
    pub n_groups: usize,
    pub n_per_group: usize,
    pub mu_alpha: f64,
    pub sigma_alpha: f64,
    pub mu_beta: f64,
    pub sigma_beta: f64,
    /// Residual SD within a group.
    pub sigma: f64,
    pub x_min: f64,
    pub x_max: f64,
}

impl Default for GroupedRegressionSpec {
    fn default() -> Self {
        Self {
            n_groups: 8,
            n_per_group: 15,
            mu_alpha: 3.0,
            sigma_alpha: 1.5,
            mu_beta: 0.8,
            sigma_beta: 0.3,
            sigma: 1.0,
            x_min: 0.0,
            x_max: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedRegression {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub groups: Vec<usize>,
    pub n_groups: usize,
    /// Realized per-group intercepts, index `g - 1` for group `g`.
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
}

impl GroupedRegression {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

pub fn simulate_grouped_regression(
    spec: &GroupedRegressionSpec,
    seed: u64,
) -> Result<GroupedRegression, DataGenError> {
    ensure_count("number of groups", spec.n_groups)?;
    ensure_count("observations per group", spec.n_per_group)?;
    let mut rng = seeded_rng(seed);

    let alpha_dist = normal("group intercepts", spec.mu_alpha, spec.sigma_alpha)?;
    let beta_dist = normal("group slopes", spec.mu_beta, spec.sigma_beta)?;
    let alpha: Vec<f64> = (0..spec.n_groups)
        .map(|_| alpha_dist.sample(&mut rng))
        .collect();
    let beta: Vec<f64> = (0..spec.n_groups)
        .map(|_| beta_dist.sample(&mut rng))
        .collect();

    let line = LinearSpec {
        n: spec.n_per_group,
        alpha: 0.0,
        beta: 0.0,
        sigma: spec.sigma,
        x_min: spec.x_min,
        x_max: spec.x_max,
    };

    let total = spec.n_groups * spec.n_per_group;
    let mut x = Vec::with_capacity(total);
    let mut y = Vec::with_capacity(total);
    let mut groups = Vec::with_capacity(total);
    for g in 0..spec.n_groups {
        let (gx, gy) = draw_line(&mut rng, spec.n_per_group, alpha[g], beta[g], &line)?;
        x.extend(gx);
        y.extend(gy);
        groups.extend(std::iter::repeat(g + 1).take(spec.n_per_group));
    }

    Ok(GroupedRegression {
        x,
        y,
        groups,
        n_groups: spec.n_groups,
        alpha,
        beta,
    })
}

/// Businesses nested in cities nested in provinces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreeLevelSpec {
    /// Number of businesses (leaf observations).
    pub nb: usize,
    /// Number of cities.
    pub nc: usize,
    /// Number of provinces.
    pub np: usize,
    pub mu_root: f64,
    /// Spread of province locations around the root.
    pub sigma_root: f64,
    /// Spread of city locations around their province.
    pub sigma_province: f64,
    /// Spread of business values around their city.
    pub sigma_city: f64,
    /// Log-scale SD of each unit's own scale around its level's scale;
    /// `0` gives every unit the same scale.
    pub scale_spread: f64,
}

impl Default for ThreeLevelSpec {
    fn default() -> Self {
        Self {
            nb: 20,
            nc: 2,
            np: 2,
            mu_root: 50.0,
            sigma_root: 10.0,
            sigma_province: 5.0,
            sigma_city: 2.0,
            scale_spread: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeLevelData {
    pub values: Vec<f64>,
    pub business_city: GroupHierarchy,
    pub city_province: GroupHierarchy,
    /// Realized province locations, index `p - 1`.
    pub province_mu: Vec<f64>,
    /// Realized spread of each province's cities, index `p - 1`.
    pub province_sigma: Vec<f64>,
    /// Realized city locations, index `c - 1`.
    pub city_mu: Vec<f64>,
    /// Realized spread of each city's businesses, index `c - 1`.
    pub city_sigma: Vec<f64>,
}

impl ThreeLevelData {
    pub fn nb(&self) -> usize {
        self.values.len()
    }

    pub fn nc(&self) -> usize {
        self.city_province.n_children()
    }

    pub fn np(&self) -> usize {
        self.city_province.n_parents()
    }

    /// City of each business, 1-based.
    pub fn city_id(&self) -> &[usize] {
        self.business_city.parents()
    }

    /// Province of each city, 1-based.
    pub fn city_province_lkp(&self) -> &[usize] {
        self.city_province.parents()
    }

    /// Province of each business, resolved through its city. `None` when a
    /// business refers to a city the lookup does not cover.
    pub fn province_id(&self) -> Option<Vec<usize>> {
        self.city_id()
            .iter()
            .map(|&c| self.city_province.parent_of(c))
            .collect()
    }

    fn city_values(&self, city: usize) -> Vec<f64> {
        self.business_city
            .children(city)
            .into_iter()
            .filter_map(|b| self.values.get(b - 1).copied())
            .collect()
    }

    pub fn city_mean(&self, city: usize) -> f64 {
        mean(&self.city_values(city))
    }

    /// Sample SD of one city's businesses.
    pub fn city_sd(&self, city: usize) -> f64 {
        let values = self.city_values(city);
        if values.len() < 2 {
            return 0.0;
        }
        let m = mean(&values);
        let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
        (ss / (values.len() - 1) as f64).sqrt()
    }
}

/// Unit scales scattered log-normally around `median`.
fn unit_scales(
    rng: &mut ChaCha20Rng,
    name: &str,
    median: f64,
    spread: f64,
    n: usize,
) -> Result<Vec<f64>, DataGenError> {
    if !(median.is_finite() && median > 0.0) || !(spread.is_finite() && spread >= 0.0) {
        return Err(DataGenError::InvalidArgument(format!(
            "{name} needs a positive scale and a non-negative spread, got ({median}, {spread})"
        )));
    }
    if spread == 0.0 {
        return Ok(vec![median; n]);
    }
    let dist = LogNormal::new(median.ln(), spread)
        .map_err(|e| DataGenError::InvalidArgument(format!("{name}: {e}")))?;
    Ok((0..n).map(|_| dist.sample(&mut *rng)).collect())
}

pub fn simulate_three_level(spec: &ThreeLevelSpec, seed: u64) -> Result<ThreeLevelData, DataGenError> {
    ensure_count("Nb", spec.nb)?;
    ensure_count("Nc", spec.nc)?;
    ensure_count("Np", spec.np)?;
    let city_province = GroupHierarchy::round_robin(spec.nc, spec.np)?;
    let business_city = GroupHierarchy::round_robin(spec.nb, spec.nc)?;

    let mut rng = seeded_rng(seed);

    let root = normal("province locations", spec.mu_root, spec.sigma_root)?;
    let province_mu: Vec<f64> = (0..spec.np).map(|_| root.sample(&mut rng)).collect();
    let province_sigma = unit_scales(
        &mut rng,
        "province scales",
        spec.sigma_province,
        spec.scale_spread,
        spec.np,
    )?;

    let mut city_mu = Vec::with_capacity(spec.nc);
    for &p in city_province.parents() {
        let dist = normal("city locations", province_mu[p - 1], province_sigma[p - 1])?;
        city_mu.push(dist.sample(&mut rng));
    }
    let city_sigma = unit_scales(
        &mut rng,
        "city scales",
        spec.sigma_city,
        spec.scale_spread,
        spec.nc,
    )?;

    let mut values = Vec::with_capacity(spec.nb);
    for &c in business_city.parents() {
        let dist = normal("business values", city_mu[c - 1], city_sigma[c - 1])?;
        values.push(dist.sample(&mut rng));
    }

    Ok(ThreeLevelData {
        values,
        business_city,
        city_province,
        province_mu,
        province_sigma,
        city_mu,
        city_sigma,
    })
}
