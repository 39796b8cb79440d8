//! MCMC quality metrics over a `Posterior`
//!
//! This module provides functionality to:
//! - Compute split R-hat and bulk ESS per parameter column
//! - Count divergences and tree depth exceedances
//! - Grade the overall fit

use crate::stanrun::Posterior;
use serde::{Deserialize, Serialize};

/// MCMC statistics for a single parameter column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamMcmcStats {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub rhat: f64,
    pub ess_bulk: f64,
    pub q05: f64,
    pub q50: f64,
    pub q95: f64,
}

/// Summary of MCMC fit quality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitMcmcSummary {
    pub n_draws: usize,
    pub n_chains: usize,
    pub n_divergent: usize,
    pub max_treedepth_exceeded: usize,
    pub params: Vec<ParamMcmcStats>,
    pub overall_quality: FitQuality,
}

impl FitMcmcSummary {
    pub fn param(&self, name: &str) -> Option<&ParamMcmcStats> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Overall fit quality assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitQuality {
    pub has_convergence_issues: bool,
    pub has_sampling_issues: bool,
    pub max_rhat: f64,
    pub min_ess_bulk: f64,
    pub quality_grade: String, // "A", "B", "C", "D", "F"
}

/// Summarize a posterior; `max_treedepth` is the limit the run was sampled with.
pub fn summarize_posterior(posterior: &Posterior, max_treedepth: usize) -> FitMcmcSummary {
    let n_chains = posterior.n_chains();
    let n_draws = posterior.draws_per_chain();

    let n_divergent = posterior.n_divergent();
    let max_treedepth_exceeded = posterior
        .diagnostic("treedepth__")
        .map(|chains| {
            chains
                .iter()
                .flatten()
                .filter(|&&d| d >= max_treedepth as f64)
                .count()
        })
        .unwrap_or(0);

    let mut params = Vec::new();
    let mut max_rhat: f64 = 0.0;
    let mut min_ess_bulk = f64::INFINITY;

    for name in posterior.parameter_names() {
        let Some(draws_per_chain) = posterior.draws(name) else {
            continue;
        };
        let flat: Vec<f64> = draws_per_chain.iter().flatten().copied().collect();
        let mean = compute_mean(&flat);
        let sd = compute_sd(&flat, mean);
        let rhat = compute_split_rhat(draws_per_chain);
        let ess_bulk = compute_ess(draws_per_chain);
        let quantiles = compute_quantiles(&flat, &[0.05, 0.50, 0.95]);

        // constant columns (e.g. a fixed generated quantity) have undefined R-hat
        if rhat.is_finite() {
            max_rhat = max_rhat.max(rhat);
        }
        min_ess_bulk = min_ess_bulk.min(ess_bulk);

        params.push(ParamMcmcStats {
            name: name.clone(),
            mean,
            sd,
            rhat,
            ess_bulk,
            q05: quantiles[0],
            q50: quantiles[1],
            q95: quantiles[2],
        });
    }

    let has_convergence_issues = max_rhat > 1.01 || min_ess_bulk < 100.0;
    let has_sampling_issues = n_divergent > 0 || max_treedepth_exceeded > n_draws / 20;

    let quality_grade = if !has_convergence_issues && !has_sampling_issues {
        "A"
    } else if max_rhat < 1.05 && min_ess_bulk > 50.0 && n_divergent < 10 {
        "B"
    } else if max_rhat < 1.10 && min_ess_bulk > 20.0 {
        "C"
    } else if max_rhat < 1.20 {
        "D"
    } else {
        "F"
    };

    FitMcmcSummary {
        n_draws,
        n_chains,
        n_divergent,
        max_treedepth_exceeded,
        params,
        overall_quality: FitQuality {
            has_convergence_issues,
            has_sampling_issues,
            max_rhat,
            min_ess_bulk,
            quality_grade: quality_grade.to_string(),
        },
    }
}

pub(crate) fn compute_mean(draws: &[f64]) -> f64 {
    if draws.is_empty() {
        return 0.0;
    }
    draws.iter().sum::<f64>() / draws.len() as f64
}

pub(crate) fn compute_sd(draws: &[f64], mean: f64) -> f64 {
    if draws.len() < 2 {
        return 0.0;
    }
    let variance = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (draws.len() - 1) as f64;
    variance.sqrt()
}

fn sample_variance(chain: &[f64]) -> f64 {
    compute_sd(chain, compute_mean(chain)).powi(2)
}

/// Each chain is split in half so a single drifting chain also shows up.
fn split_chains(draws_per_chain: &[Vec<f64>]) -> Vec<&[f64]> {
    draws_per_chain
        .iter()
        .flat_map(|chain| {
            let half = chain.len() / 2;
            let (first, second) = chain.split_at(half);
            // drop the middle draw of an odd-length chain
            [first, &second[second.len() - half..]]
        })
        .collect()
}

/// Split R-hat (Gelman-Rubin on half-chains).
pub(crate) fn compute_split_rhat(draws_per_chain: &[Vec<f64>]) -> f64 {
    let halves = split_chains(draws_per_chain);
    let m = halves.len();
    let n = halves.first().map_or(0, |h| h.len());
    if m < 2 || n < 2 {
        return f64::NAN;
    }

    let within = halves.iter().map(|h| sample_variance(h)).sum::<f64>() / m as f64;
    let means: Vec<f64> = halves.iter().map(|h| compute_mean(h)).collect();
    let grand = compute_mean(&means);
    let between = n as f64 * means.iter().map(|x| (x - grand).powi(2)).sum::<f64>() / (m - 1) as f64;

    let var_plus = ((n - 1) as f64 * within + between) / n as f64;
    (var_plus / within).sqrt()
}

fn autocovariance(chain: &[f64], lag: usize) -> f64 {
    let mean = compute_mean(chain);
    let n = chain.len();
    chain[..n - lag]
        .iter()
        .zip(&chain[lag..])
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum::<f64>()
        / n as f64
}

/// Effective sample size with Geyer's initial positive sequence over the
/// chain-averaged autocorrelation.
pub(crate) fn compute_ess(draws_per_chain: &[Vec<f64>]) -> f64 {
    let m = draws_per_chain.len();
    let n = draws_per_chain.first().map_or(0, |c| c.len());
    if m == 0 || n < 4 {
        return (m * n) as f64;
    }

    let chain_var: Vec<f64> = draws_per_chain.iter().map(|c| autocovariance(c, 0)).collect();
    let within = compute_mean(&chain_var) * n as f64 / (n - 1) as f64;
    if within <= 0.0 {
        return (m * n) as f64;
    }
    let means: Vec<f64> = draws_per_chain.iter().map(|c| compute_mean(c)).collect();
    let between = if m > 1 {
        let grand = compute_mean(&means);
        n as f64 * means.iter().map(|x| (x - grand).powi(2)).sum::<f64>() / (m - 1) as f64
    } else {
        0.0
    };
    let var_plus = ((n - 1) as f64 * within + between) / n as f64;

    let rho = |lag: usize| {
        let acov = draws_per_chain
            .iter()
            .map(|c| autocovariance(c, lag))
            .sum::<f64>()
            / m as f64;
        1.0 - (within - acov) / var_plus
    };

    let mut tau: f64 = -1.0;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        tau += 2.0 * pair;
        lag += 2;
    }

    let total = (m * n) as f64;
    total / tau.max(1.0 / total.log10())
}

pub(crate) fn compute_quantiles(draws: &[f64], probs: &[f64]) -> Vec<f64> {
    if draws.is_empty() {
        return vec![f64::NAN; probs.len()];
    }
    let mut sorted = draws.to_vec();
    sorted.sort_by(f64::total_cmp);

    probs
        .iter()
        .map(|&p| {
            let idx = (p * (sorted.len() - 1) as f64).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanrun::{parse_stan_csv, Posterior};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rand_distr::{Distribution, Normal};

    fn iid_chains(m: usize, n: usize, shift: f64) -> Vec<Vec<f64>> {
        let mut rng = ChaCha20Rng::seed_from_u64(17);
        let dist = Normal::new(0.0, 1.0).unwrap();
        (0..m)
            .map(|c| {
                (0..n)
                    .map(|_| dist.sample(&mut rng) + shift * c as f64)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_compute_mean() {
        let draws = vec![1.0, 2.0, 3.0, 1.5, 2.5, 3.5];
        assert!((compute_mean(&draws) - 2.25).abs() < 0.01);
    }

    #[test]
    fn test_split_rhat_near_one_for_mixed_chains() {
        let rhat = compute_split_rhat(&iid_chains(4, 500, 0.0));
        assert!(rhat > 0.99 && rhat < 1.02, "R-hat = {rhat}");
    }

    #[test]
    fn test_split_rhat_flags_separated_chains() {
        let rhat = compute_split_rhat(&iid_chains(2, 500, 5.0));
        assert!(rhat > 1.5, "R-hat = {rhat}");
    }

    #[test]
    fn test_ess_of_independent_draws_is_close_to_total() {
        let ess = compute_ess(&iid_chains(2, 1000, 0.0));
        assert!(ess > 1400.0 && ess < 2600.0, "ESS = {ess}");
    }

    #[test]
    fn test_ess_drops_for_autocorrelated_draws() {
        // AR(1) with phi = 0.9 has ESS ~ N * (1 - phi) / (1 + phi)
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let dist = Normal::new(0.0, 1.0).unwrap();
        let mut x = 0.0;
        let chain: Vec<f64> = (0..4000)
            .map(|_| {
                x = 0.9 * x + dist.sample(&mut rng);
                x
            })
            .collect();
        let ess = compute_ess(&[chain]);
        assert!(ess < 600.0, "ESS = {ess}");
    }

    #[test]
    fn test_compute_quantiles() {
        let draws = vec![10.0, 9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let quantiles = compute_quantiles(&draws, &[0.0, 0.5, 1.0]);
        assert_eq!(quantiles, vec![1.0, 6.0, 10.0]);
    }

    #[test]
    fn test_summarize_posterior_counts_sampler_issues() {
        let mut text = String::from("lp__,divergent__,treedepth__,mu\n");
        for i in 0..40 {
            let divergent = if i < 3 { 1 } else { 0 };
            let depth = if i < 5 { 10 } else { 3 };
            text.push_str(&format!("0,{divergent},{depth},{}\n", (i % 7) as f64));
        }
        let posterior = Posterior::from_chains(vec![parse_stan_csv(&text).unwrap()]).unwrap();
        let summary = summarize_posterior(&posterior, 10);

        assert_eq!(summary.n_chains, 1);
        assert_eq!(summary.n_draws, 40);
        assert_eq!(summary.n_divergent, 3);
        assert_eq!(summary.max_treedepth_exceeded, 5);
        assert!(summary.overall_quality.has_sampling_issues);
        assert_ne!(summary.overall_quality.quality_grade, "A");
        assert!(summary.param("mu").is_some());
        assert!(summary.param("divergent__").is_none());
    }
}
