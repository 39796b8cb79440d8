//! Engine boundary without CmdStan: sampler output parsing, the draw-count
//! contract and example orchestration against a scripted engine.

use std::cell::RefCell;

use stanbook::payload::DataPayload;
use stanbook::report::{write_outcome, LINE_POINTS};
use stanbook::scenario::{run_sequentially, Example};
use stanbook::stanrun::{parse_stan_csv, EngineError, InferenceEngine, Posterior, RunConfig};
use stanbook::{ModelDescriptor, Scenario, StanbookError};

/// CmdStan-shaped CSV for one chain with `n` draws of `columns`.
fn chain_text(columns: &[&str], n: usize, offset: f64) -> String {
    let mut text = String::from("# model = scripted\n# method = sample (Default)\n");
    text.push_str("lp__,accept_stat__,stepsize__,treedepth__,n_leapfrog__,divergent__,energy__");
    for c in columns {
        text.push(',');
        text.push_str(c);
    }
    text.push('\n');
    text.push_str("# Adaptation terminated\n# Step size = 0.9\n");
    for i in 0..n {
        text.push_str("-10,0.9,0.9,2,3,0,11");
        for (k, _) in columns.iter().enumerate() {
            let value = offset + k as f64 + ((i * 7919) % 101) as f64 / 100.0;
            text.push_str(&format!(",{value}"));
        }
        text.push('\n');
    }
    text.push_str("# Elapsed Time: 0.01 seconds (Warm-up)\n");
    text
}

/// Returns well-formed draws for every declared parameter and records what
/// it was asked to fit. Parameters listed in `vectors` come out as
/// `name.1..name.n` columns, the way CmdStan writes vector parameters.
struct ScriptedEngine {
    calls: RefCell<Vec<(String, usize)>>,
    fail_on: Option<&'static str>,
    vectors: Vec<(&'static str, usize)>,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            fail_on: None,
            vectors: Vec::new(),
        }
    }

    fn columns(&self, model: &ModelDescriptor) -> Vec<String> {
        let mut columns = Vec::new();
        for &param in model.parameters() {
            match self.vectors.iter().find(|(name, _)| *name == param) {
                Some(&(_, n)) => columns.extend((1..=n).map(|i| format!("{param}.{i}"))),
                None => columns.push(param.to_string()),
            }
        }
        columns
    }
}

impl InferenceEngine for ScriptedEngine {
    fn sample(
        &self,
        model: &ModelDescriptor,
        data: &DataPayload,
        run: &RunConfig,
    ) -> Result<Posterior, EngineError> {
        self.calls
            .borrow_mut()
            .push((model.name().to_string(), data.names().count()));
        if self.fail_on == Some(model.name()) {
            return Err(EngineError::Sampling {
                chain: 1,
                stderr: "Rejecting initial value".to_string(),
            });
        }
        let columns = self.columns(model);
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        let chains = (0..run.chains)
            .map(|c| parse_stan_csv(&chain_text(&columns, run.num_samples(), c as f64 * 0.001)))
            .collect::<Result<Vec<_>, _>>()?;
        Posterior::from_chains(chains)
    }
}

fn short_run() -> RunConfig {
    RunConfig {
        iter: 200,
        chains: 2,
        ..RunConfig::default()
    }
}

#[test]
fn test_draw_count_contract() {
    // iter = 1000 with default warm-up keeps 500 draws per chain
    let run = RunConfig {
        iter: 1000,
        chains: 2,
        seed: Some(2019),
        ..RunConfig::default()
    };
    assert_eq!(run.num_warmup(), 500);
    assert_eq!(run.num_samples(), 500);

    let chains = (0..run.chains)
        .map(|c| parse_stan_csv(&chain_text(&["mu", "s"], run.num_samples(), c as f64)).unwrap())
        .collect();
    let posterior = Posterior::from_chains(chains).unwrap();

    assert_eq!(posterior.n_chains(), 2);
    assert_eq!(posterior.draws_per_chain(), 500);
    for name in ["mu", "s"] {
        let draws = posterior.draws(name).unwrap();
        assert_eq!(draws.len(), 2);
        assert!(draws.iter().all(|chain| chain.len() == 500));
        assert_eq!(posterior.flat_draws(name).unwrap().len(), 1000);
    }
    assert_eq!(posterior.parameter_names(), &["mu".to_string(), "s".to_string()]);
    assert_eq!(posterior.to_table().rows.len(), 1000);
    assert_eq!(posterior.n_divergent(), 0);
}

#[test]
fn test_malformed_rows_are_errors() {
    let mut text = chain_text(&["mu"], 3, 0.0);
    text.push_str("-10,0.9,0.9,2,3,0\n");
    assert!(matches!(parse_stan_csv(&text), Err(EngineError::Output(_))));

    let mut text = chain_text(&["mu"], 3, 0.0);
    text.push_str("-10,0.9,0.9,2,3,0,11,nope\n");
    assert!(matches!(parse_stan_csv(&text), Err(EngineError::Output(_))));
}

#[test]
fn test_chains_must_agree() {
    let a = parse_stan_csv(&chain_text(&["mu"], 10, 0.0)).unwrap();
    let b = parse_stan_csv(&chain_text(&["mu"], 9, 0.0)).unwrap();
    assert!(matches!(
        Posterior::from_chains(vec![a.clone(), b]),
        Err(EngineError::Output(_))
    ));

    let c = parse_stan_csv(&chain_text(&["mu", "s"], 10, 0.0)).unwrap();
    assert!(Posterior::from_chains(vec![a, c]).is_err());
}

#[test]
fn test_example_runs_every_model_once() {
    let engine = ScriptedEngine::new();
    let example = Example::new(Scenario::from_name("outliers").unwrap(), 2019, short_run());
    let outcome = example.run(&engine).unwrap();

    assert_eq!(outcome.name, "outliers");
    let fitted: Vec<&str> = outcome.fits.iter().map(|f| f.model).collect();
    assert_eq!(fitted, vec!["normal_outlier", "student_t"]);

    let calls = engine.calls.borrow();
    assert_eq!(calls.len(), 2);
    // N and y
    assert!(calls.iter().all(|(_, n_vars)| *n_vars == 2));

    for fit in &outcome.fits {
        assert_eq!(fit.summary.n_chains, 2);
        assert_eq!(fit.summary.n_draws, 100);
        assert!(fit.summary.param("mu").is_some());
        assert_eq!(fit.recovery.len(), 2);
    }
}

#[test]
fn test_engine_failure_propagates_unmodified() {
    let engine = ScriptedEngine {
        fail_on: Some("student_t"),
        ..ScriptedEngine::new()
    };
    let example = Example::new(Scenario::from_name("outliers").unwrap(), 2019, short_run());
    match example.run(&engine) {
        Err(StanbookError::Engine(EngineError::Sampling { chain, stderr })) => {
            assert_eq!(chain, 1);
            assert_eq!(stderr, "Rejecting initial value");
        }
        other => panic!("expected a sampling failure, got {other:?}"),
    }
}

#[test]
fn test_generation_failure_never_reaches_engine() {
    let engine = ScriptedEngine::new();
    let bad = Scenario::SingleGroup(stanbook::datagen::NormalSpec {
        sigma: 0.0,
        ..Default::default()
    });
    let err = Example::new(bad, 1, short_run()).run(&engine).unwrap_err();
    assert!(matches!(err, StanbookError::DataGen(_)));
    assert!(err.is_pre_engine());
    assert!(engine.calls.borrow().is_empty());
}

#[test]
fn test_examples_run_in_order_and_failures_stay_local() {
    let engine = ScriptedEngine {
        fail_on: Some("paired_difference"),
        ..ScriptedEngine::new()
    };
    let examples: Vec<Example> = ["single_group", "paired", "linear_regression"]
        .iter()
        .map(|name| Example::new(Scenario::from_name(name).unwrap(), 7, short_run()))
        .collect();

    let results = run_sequentially(&examples, &engine);
    let names: Vec<&str> = results.iter().map(|(n, _)| *n).collect();
    assert_eq!(names, vec!["single_group", "paired", "linear_regression"]);
    assert!(results[0].1.is_ok());
    assert!(results[1].1.is_err());
    assert!(results[2].1.is_ok());

    let models: Vec<String> = engine.calls.borrow().iter().map(|(m, _)| m.clone()).collect();
    assert_eq!(
        models,
        vec!["normal_uniform", "paired_difference", "linear_regression"]
    );
}

fn read_line_csv(dir: &std::path::Path, file: &str) -> Vec<String> {
    let text = std::fs::read_to_string(dir.join(file))
        .unwrap_or_else(|e| panic!("{file} was not written: {e}"));
    text.lines().map(str::to_string).collect()
}

#[test]
fn test_regression_examples_write_fitted_lines() {
    let engine = ScriptedEngine {
        vectors: vec![("alpha", 8), ("beta", 8), ("mu_p", 2), ("mu_c", 2), ("s", 2)],
        ..ScriptedEngine::new()
    };
    let dir = tempfile::tempdir().unwrap();

    let linear = Example::new(Scenario::from_name("linear_regression").unwrap(), 3, short_run());
    let outcome = linear.run(&ScriptedEngine::new()).unwrap();
    write_outcome(&outcome, dir.path()).unwrap();
    let rows = read_line_csv(dir.path(), "linear_regression_linear_regression_line.csv");
    assert_eq!(rows[0], "line,x,mean,q05,q95");
    assert_eq!(rows.len(), 1 + LINE_POINTS);
    assert!(rows[1..].iter().all(|r| r.starts_with("all,")));

    let grouped = Example::new(
        Scenario::from_name("hierarchical_regression").unwrap(),
        3,
        short_run(),
    );
    let outcome = grouped.run(&engine).unwrap();
    write_outcome(&outcome, dir.path()).unwrap();
    let rows = read_line_csv(
        dir.path(),
        "hierarchical_regression_hierarchical_regression_line.csv",
    );
    assert_eq!(rows.len(), 1 + 8 * LINE_POINTS);
    for group in 1..=8 {
        let prefix = format!("{group},");
        let n = rows.iter().filter(|r| r.starts_with(&prefix)).count();
        assert_eq!(n, LINE_POINTS, "group {group}");
    }

    // no predictor, no line file
    let three = Example::new(Scenario::from_name("three_level").unwrap(), 3, short_run());
    let outcome = three.run(&engine).unwrap();
    write_outcome(&outcome, dir.path()).unwrap();
    assert!(dir.path().join("three_level_summary.json").exists());
    assert!(!dir.path().join("three_level_three_level_line.csv").exists());
}
