//! The worked examples.
//!
//! Each example owns its generator settings, its data seed and its sampler
//! settings. Nothing is shared between examples: every run builds its data,
//! payload and posterior from scratch.

use crate::datagen::{
    self, GroupedRegressionSpec, LinearSpec, NormalSpec, OutlierSpec, PairedSpec, ThreeLevelSpec,
    TwoGroupSpec,
};
use crate::diagnostics::{check_recovery, summarize_posterior, FitMcmcSummary, RecoveryCheck};
use crate::error::{Result, StanbookError};
use crate::model::{self, ModelDescriptor};
use crate::payload::{self, DataPayload};
use crate::stanrun::{InferenceEngine, Posterior, RunConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One worked example's generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scenario {
    SingleGroup(NormalSpec),
    Outliers(OutlierSpec),
    Paired(PairedSpec),
    TwoGroups(TwoGroupSpec),
    LinearRegression(LinearSpec),
    HierarchicalRegression(GroupedRegressionSpec),
    ThreeLevel(ThreeLevelSpec),
}

impl Scenario {
    pub const NAMES: [&'static str; 7] = [
        "single_group",
        "outliers",
        "paired",
        "two_groups",
        "linear_regression",
        "hierarchical_regression",
        "three_level",
    ];

    /// All examples with default settings, simplest first.
    pub fn all() -> Vec<Scenario> {
        Self::NAMES
            .iter()
            .filter_map(|name| Self::from_name(name))
            .collect()
    }

    pub fn from_name(name: &str) -> Option<Scenario> {
        let scenario = match name {
            "single_group" => Scenario::SingleGroup(NormalSpec::default()),
            "outliers" => Scenario::Outliers(OutlierSpec::default()),
            "paired" => Scenario::Paired(PairedSpec::default()),
            "two_groups" => Scenario::TwoGroups(TwoGroupSpec::default()),
            "linear_regression" => Scenario::LinearRegression(LinearSpec::default()),
            "hierarchical_regression" => {
                Scenario::HierarchicalRegression(GroupedRegressionSpec::default())
            }
            "three_level" => Scenario::ThreeLevel(ThreeLevelSpec::default()),
            _ => return None,
        };
        Some(scenario)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::SingleGroup(_) => "single_group",
            Scenario::Outliers(_) => "outliers",
            Scenario::Paired(_) => "paired",
            Scenario::TwoGroups(_) => "two_groups",
            Scenario::LinearRegression(_) => "linear_regression",
            Scenario::HierarchicalRegression(_) => "hierarchical_regression",
            Scenario::ThreeLevel(_) => "three_level",
        }
    }

    /// Models fitted to this example's data. The outlier example fits a
    /// normal and a Student-t likelihood to the same payload.
    pub fn models(&self) -> Vec<&'static ModelDescriptor> {
        match self {
            Scenario::SingleGroup(_) => vec![&model::NORMAL_UNIFORM],
            Scenario::Outliers(_) => vec![&model::NORMAL_OUTLIER, &model::STUDENT_T],
            Scenario::Paired(_) => vec![&model::PAIRED_DIFFERENCE],
            Scenario::TwoGroups(_) => vec![&model::TWO_GROUP],
            Scenario::LinearRegression(_) => vec![&model::LINEAR_REGRESSION],
            Scenario::HierarchicalRegression(_) => vec![&model::HIERARCHICAL_REGRESSION],
            Scenario::ThreeLevel(_) => vec![&model::THREE_LEVEL],
        }
    }

    /// Simulate the data and build its payload.
    pub fn prepare(&self, seed: u64) -> Result<PreparedData> {
        let prepared = match self {
            Scenario::SingleGroup(spec) => {
                let obs = datagen::simulate_normal(spec, seed)?;
                PreparedData {
                    payload: payload::single_group(&obs)?,
                    truths: truths(&[("mu", spec.mu), ("s", spec.sigma)]),
                    predictor_range: None,
                }
            }
            Scenario::Outliers(spec) => {
                let obs = datagen::simulate_with_outliers(spec, seed)?;
                PreparedData {
                    payload: payload::single_group(&obs)?,
                    truths: truths(&[("mu", spec.base.mu), ("s", spec.base.sigma)]),
                    predictor_range: None,
                }
            }
            Scenario::Paired(spec) => {
                let obs = datagen::simulate_paired(spec, seed)?;
                PreparedData {
                    payload: payload::paired(&obs)?,
                    truths: truths(&[("mu_diff", spec.delta), ("s_diff", spec.sigma_diff)]),
                    predictor_range: None,
                }
            }
            Scenario::TwoGroups(spec) => {
                let obs = datagen::simulate_two_groups(spec, seed)?;
                PreparedData {
                    payload: payload::two_group(&obs)?,
                    truths: truths(&[
                        ("mu.1", spec.group1.mu),
                        ("mu.2", spec.group2.mu),
                        ("s.1", spec.group1.sigma),
                        ("s.2", spec.group2.sigma),
                        ("mu_diff", spec.group2.mu - spec.group1.mu),
                    ]),
                    predictor_range: None,
                }
            }
            Scenario::LinearRegression(spec) => {
                let data = datagen::simulate_linear(spec, seed)?;
                PreparedData {
                    payload: payload::linear(&data)?,
                    truths: truths(&[("alpha", spec.alpha), ("beta", spec.beta), ("s", spec.sigma)]),
                    predictor_range: Some((spec.x_min, spec.x_max)),
                }
            }
            Scenario::HierarchicalRegression(spec) => {
                let data = datagen::simulate_grouped_regression(spec, seed)?;
                let mut known = truths(&[
                    ("mu_alpha", spec.mu_alpha),
                    ("mu_beta", spec.mu_beta),
                    ("s", spec.sigma),
                ]);
                known.extend(indexed("alpha", &data.alpha));
                known.extend(indexed("beta", &data.beta));
                PreparedData {
                    payload: payload::grouped_regression(&data)?,
                    truths: known,
                    predictor_range: Some((spec.x_min, spec.x_max)),
                }
            }
            Scenario::ThreeLevel(spec) => {
                let data = datagen::simulate_three_level(spec, seed)?;
                let mut known = truths(&[("mu", spec.mu_root)]);
                known.extend(indexed("mu_p", &data.province_mu));
                known.extend(indexed("mu_c", &data.city_mu));
                known.extend(indexed("s", &data.city_sigma));
                PreparedData {
                    payload: payload::three_level(&data)?,
                    truths: known,
                    predictor_range: None,
                }
            }
        };
        Ok(prepared)
    }
}

fn truths(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
    pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
}

/// `name.1`, `name.2`, ... in CmdStan's column naming.
fn indexed(name: &str, values: &[f64]) -> Vec<(String, f64)> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| (format!("{name}.{}", i + 1), v))
        .collect()
}

/// Simulated data ready for the engine, plus what it was simulated from.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub payload: DataPayload,
    /// `(column, value)` pairs the fit should recover
    pub truths: Vec<(String, f64)>,
    /// Predictor range for regression-line overlays
    pub predictor_range: Option<(f64, f64)>,
}

/// A scenario with its own seed and sampler settings.
#[derive(Debug, Clone)]
pub struct Example {
    pub scenario: Scenario,
    pub data_seed: u64,
    pub run: RunConfig,
}

/// One model fitted within an example.
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub model: &'static str,
    pub posterior: Posterior,
    pub summary: FitMcmcSummary,
    pub recovery: Vec<RecoveryCheck>,
}

#[derive(Debug, Clone)]
pub struct ExampleOutcome {
    pub name: &'static str,
    pub data: PreparedData,
    pub fits: Vec<ModelFit>,
}

impl Example {
    pub fn new(scenario: Scenario, data_seed: u64, run: RunConfig) -> Self {
        Self {
            scenario,
            data_seed,
            run,
        }
    }

    /// Generate, check, sample and summarize. Any failure stops this example.
    pub fn run(&self, engine: &dyn InferenceEngine) -> Result<ExampleOutcome> {
        let name = self.scenario.name();
        let data = self.scenario.prepare(self.data_seed)?;
        info!(example = name, seed = self.data_seed, "generated data");

        let mut fits = Vec::new();
        for model in self.scenario.models() {
            data.payload.validate_sizes(model)?;
            let posterior = engine.sample(model, &data.payload, &self.run)?;
            let summary = summarize_posterior(&posterior, self.run.max_treedepth);
            let recovery = check_recovery(&summary, &data.truths);
            fits.push(ModelFit {
                model: model.name(),
                posterior,
                summary,
                recovery,
            });
        }

        Ok(ExampleOutcome { name, data, fits })
    }
}

/// Run examples one after another. A failed example is logged and reported
/// in its slot; the remaining examples still run.
pub fn run_sequentially(
    examples: &[Example],
    engine: &dyn InferenceEngine,
) -> Vec<(&'static str, Result<ExampleOutcome>)> {
    examples
        .iter()
        .map(|example| {
            let name = example.scenario.name();
            let outcome = example.run(engine);
            if let Err(err) = &outcome {
                warn!(example = name, error = %err, "example failed");
            }
            (name, outcome)
        })
        .collect()
}

/// Look up a scenario by name or fail with `UnknownScenario`.
pub fn scenario_by_name(name: &str) -> Result<Scenario> {
    Scenario::from_name(name).ok_or_else(|| StanbookError::UnknownScenario(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::DataValue;

    #[test]
    fn test_every_name_round_trips() {
        for name in Scenario::NAMES {
            assert_eq!(Scenario::from_name(name).unwrap().name(), name);
        }
        assert_eq!(Scenario::all().len(), Scenario::NAMES.len());
        assert!(matches!(
            scenario_by_name("nope"),
            Err(StanbookError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_every_payload_matches_its_models() {
        for scenario in Scenario::all() {
            let prepared = scenario.prepare(2019).unwrap();
            for model in scenario.models() {
                prepared
                    .payload
                    .validate_sizes(model)
                    .unwrap_or_else(|e| panic!("{} / {}: {e}", scenario.name(), model.name()));
            }
        }
    }

    #[test]
    fn test_generation_error_stops_before_engine() {
        let scenario = Scenario::SingleGroup(NormalSpec {
            n: 0,
            ..NormalSpec::default()
        });
        let err = scenario.prepare(1).unwrap_err();
        assert!(err.is_pre_engine());
    }

    #[test]
    fn test_three_level_truths_indexed() {
        let prepared = Scenario::from_name("three_level").unwrap().prepare(5).unwrap();
        let names: Vec<&str> = prepared.truths.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"mu_p.1"));
        assert!(names.contains(&"mu_c.2"));
        assert!(names.contains(&"s.2"));
        assert!(!names.contains(&"s"));
        assert_eq!(prepared.payload.get("Nb"), Some(&DataValue::Int(20)));
    }
}
