//! Parameter recovery against simulation truth.
//!
//! Every worked example knows the values its data was generated from, so the
//! fit can be checked directly: does the 90% credible interval cover the truth?

use super::mcmc::FitMcmcSummary;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCheck {
    pub param: String,
    pub truth: f64,
    pub posterior_mean: f64,
    pub q05: f64,
    pub q95: f64,
    /// Is the truth in [q05, q95]?
    pub in_credible_interval: bool,
}

/// Compare `(column, truth)` pairs with the fitted summary. Columns missing
/// from the summary are skipped.
pub fn check_recovery(summary: &FitMcmcSummary, truths: &[(String, f64)]) -> Vec<RecoveryCheck> {
    truths
        .iter()
        .filter_map(|(param, truth)| {
            let stats = summary.param(param)?;
            Some(RecoveryCheck {
                param: param.clone(),
                truth: *truth,
                posterior_mean: stats.mean,
                q05: stats.q05,
                q95: stats.q95,
                in_credible_interval: stats.q05 <= *truth && *truth <= stats.q95,
            })
        })
        .collect()
}
