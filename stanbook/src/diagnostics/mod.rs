//! Diagnostics for fitted worked examples
//!
//! This module provides tools for:
//! - MCMC quality metrics (R-hat, ESS, divergences)
//! - Checking posterior intervals against the values the data was simulated from

pub mod mcmc;
pub mod recovery;

pub use mcmc::{summarize_posterior, FitMcmcSummary, FitQuality, ParamMcmcStats};
pub use recovery::{check_recovery, RecoveryCheck};
