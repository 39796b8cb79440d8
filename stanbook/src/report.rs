//! Text and file output for fitted examples.

use crate::diagnostics::mcmc::compute_quantiles;
use crate::diagnostics::{FitMcmcSummary, RecoveryCheck};
use crate::error::{Result, StanbookError};
use crate::scenario::ExampleOutcome;
use crate::stanrun::Posterior;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Posterior mean and 90% band of `alpha + beta * x` at one predictor value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinePoint {
    pub x: f64,
    pub mean: f64,
    pub q05: f64,
    pub q95: f64,
}

/// Evaluate the regression line draw by draw at each `x`.
///
/// `alpha` and `beta` must come from the same draws in the same order.
pub fn regression_line(alpha: &[f64], beta: &[f64], xs: &[f64]) -> Vec<LinePoint> {
    xs.iter()
        .map(|&x| {
            let fitted: Vec<f64> = alpha
                .iter()
                .zip(beta)
                .map(|(a, b)| a + b * x)
                .collect();
            let mean = if fitted.is_empty() {
                f64::NAN
            } else {
                fitted.iter().sum::<f64>() / fitted.len() as f64
            };
            let q = compute_quantiles(&fitted, &[0.05, 0.95]);
            LinePoint {
                x,
                mean,
                q05: q[0],
                q95: q[1],
            }
        })
        .collect()
}

/// `n` evenly spaced points covering `[lo, hi]`.
pub fn grid(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|i| lo + step * i as f64).collect()
        }
    }
}

/// One fitted regression line; `label` is `"all"` for a pooled fit and the
/// group index otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedLine {
    pub label: String,
    pub points: Vec<LinePoint>,
}

/// Regression lines for every `alpha`/`beta` pair in a fit.
///
/// A fit with scalar `alpha` and `beta` gives one line. A fit with `alpha.g`
/// and `beta.g` columns gives one line per group `g`. Fits without them give
/// none.
pub fn fitted_lines(posterior: &Posterior, range: (f64, f64), n: usize) -> Vec<FittedLine> {
    let xs = grid(range.0, range.1, n);
    posterior
        .columns_for("alpha")
        .into_iter()
        .filter_map(|alpha_col| {
            let label = match alpha_col.strip_prefix("alpha.") {
                Some(group) => group.to_string(),
                None => "all".to_string(),
            };
            let beta_col = alpha_col.replacen("alpha", "beta", 1);
            let alpha = posterior.flat_draws(alpha_col)?;
            let beta = posterior.flat_draws(&beta_col)?;
            Some(FittedLine {
                label,
                points: regression_line(&alpha, &beta, &xs),
            })
        })
        .collect()
}

/// Write fitted lines as CSV: `line,x,mean,q05,q95`.
pub fn write_lines_csv(lines: &[FittedLine], path: &Path) -> Result<()> {
    let mut text = String::from("line,x,mean,q05,q95\n");
    for line in lines {
        for p in &line.points {
            text.push_str(&format!(
                "{},{},{},{},{}\n",
                line.label, p.x, p.mean, p.q05, p.q95
            ));
        }
    }
    fs::write(path, text)
        .map_err(|e| StanbookError::io(format!("writing lines to {}", path.display()), e))
}

/// Write every retained draw as CSV: `chain,draw,<parameters...>`.
pub fn write_draws_csv(posterior: &Posterior, path: &Path) -> Result<()> {
    let context = || format!("writing draws to {}", path.display());
    let file = File::create(path).map_err(|e| StanbookError::io(context(), e))?;
    let mut out = BufWriter::new(file);

    let table = posterior.to_table();
    let write = |out: &mut BufWriter<File>| -> std::io::Result<()> {
        writeln!(out, "{}", table.header.join(","))?;
        for row in &table.rows {
            // chain and draw indices are whole numbers
            write!(out, "{},{}", row[0] as usize, row[1] as usize)?;
            for value in &row[2..] {
                write!(out, ",{value}")?;
            }
            writeln!(out)?;
        }
        out.flush()
    };
    write(&mut out).map_err(|e| StanbookError::io(context(), e))
}

/// Diagnostics table for one fit, as plain text.
pub fn summary_table(summary: &FitMcmcSummary) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "chains: {}  draws/chain: {}  divergent: {}  treedepth hits: {}  grade: {}\n",
        summary.n_chains,
        summary.n_draws,
        summary.n_divergent,
        summary.max_treedepth_exceeded,
        summary.overall_quality.quality_grade
    ));
    out.push_str(&format!(
        "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8}\n",
        "Parameter", "Mean", "SD", "5%", "50%", "95%", "Rhat", "ESS"
    ));
    out.push_str(&format!("{}\n", "-".repeat(92)));

    for p in &summary.params {
        out.push_str(&format!(
            "{:<20} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>8.3} {:>8.0}\n",
            p.name, p.mean, p.sd, p.q05, p.q50, p.q95, p.rhat, p.ess_bulk
        ));
    }

    for p in &summary.params {
        if p.rhat > 1.01 {
            out.push_str(&format!(
                "warning: {} has Rhat = {:.3} (should be < 1.01)\n",
                p.name, p.rhat
            ));
        }
    }
    if summary.n_divergent > 0 {
        out.push_str(&format!(
            "warning: {} divergent transitions after warm-up\n",
            summary.n_divergent
        ));
    }
    out
}

pub fn recovery_table(checks: &[RecoveryCheck]) -> String {
    let mut out = format!(
        "{:<20} {:>10} {:>10} {:>10} {:>10}  {}\n",
        "Parameter", "Truth", "Mean", "5%", "95%", "Covered"
    );
    for c in checks {
        out.push_str(&format!(
            "{:<20} {:>10.3} {:>10.3} {:>10.3} {:>10.3}  {}\n",
            c.param,
            c.truth,
            c.posterior_mean,
            c.q05,
            c.q95,
            if c.in_credible_interval { "yes" } else { "NO" }
        ));
    }
    out
}

/// Full text report for one example.
pub fn format_outcome(outcome: &ExampleOutcome) -> String {
    let mut out = format!("=== {} ===\n", outcome.name);
    for fit in &outcome.fits {
        out.push_str(&format!("\n--- model: {} ---\n", fit.model));
        out.push_str(&summary_table(&fit.summary));
        if !fit.recovery.is_empty() {
            out.push('\n');
            out.push_str(&recovery_table(&fit.recovery));
        }
        if let Some(range) = outcome.data.predictor_range {
            for line in fitted_lines(&fit.posterior, range, 5) {
                out.push_str(&format!("\nfitted line ({}):\n", line.label));
                for p in line.points {
                    out.push_str(&format!(
                        "  x = {:>6.2}  mean {:>8.3}  90% [{:.3}, {:.3}]\n",
                        p.x, p.mean, p.q05, p.q95
                    ));
                }
            }
        }
    }
    out
}

#[derive(Serialize)]
struct FitReport<'a> {
    model: &'a str,
    summary: &'a FitMcmcSummary,
    recovery: &'a [RecoveryCheck],
}

/// Number of predictor values each written regression line is evaluated at.
pub const LINE_POINTS: usize = 25;

/// Write `<name>_<model>_draws.csv` for each fit and one `<name>_summary.json`.
/// Regression examples also get `<name>_<model>_line.csv`.
pub fn write_outcome(outcome: &ExampleOutcome, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| StanbookError::io(format!("creating {}", dir.display()), e))?;

    for fit in &outcome.fits {
        let path = dir.join(format!("{}_{}_draws.csv", outcome.name, fit.model));
        write_draws_csv(&fit.posterior, &path)?;

        if let Some(range) = outcome.data.predictor_range {
            let lines = fitted_lines(&fit.posterior, range, LINE_POINTS);
            if !lines.is_empty() {
                let path = dir.join(format!("{}_{}_line.csv", outcome.name, fit.model));
                write_lines_csv(&lines, &path)?;
            }
        }
    }

    let fits: Vec<FitReport<'_>> = outcome
        .fits
        .iter()
        .map(|fit| FitReport {
            model: fit.model,
            summary: &fit.summary,
            recovery: &fit.recovery,
        })
        .collect();
    let json = serde_json::to_string_pretty(&fits)
        .map_err(|e| StanbookError::io(format!("serializing {} summary", outcome.name), e.into()))?;
    let path = dir.join(format!("{}_summary.json", outcome.name));
    fs::write(&path, json)
        .map_err(|e| StanbookError::io(format!("writing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::summarize_posterior;
    use crate::stanrun::parse_stan_csv;

    fn line_posterior() -> Posterior {
        let mut text = String::from("lp__,divergent__,alpha,beta\n");
        for i in 0..20 {
            let jitter = (i % 5) as f64 * 0.01;
            text.push_str(&format!("0,0,{},{}\n", 2.0 + jitter, 0.5 - jitter));
        }
        Posterior::from_chains(vec![parse_stan_csv(&text).unwrap()]).unwrap()
    }

    #[test]
    fn test_regression_line_exact_draws() {
        let line = regression_line(&[1.0, 3.0], &[2.0, 2.0], &[0.0, 1.0]);
        assert_eq!(line.len(), 2);
        assert!((line[0].mean - 2.0).abs() < 1e-12);
        assert!((line[1].mean - 4.0).abs() < 1e-12);
        assert!(line[1].q05 <= line[1].mean && line[1].mean <= line[1].q95);
    }

    #[test]
    fn test_grid_endpoints() {
        let g = grid(0.0, 10.0, 5);
        assert_eq!(g, vec![0.0, 2.5, 5.0, 7.5, 10.0]);
        assert_eq!(grid(1.0, 2.0, 1), vec![1.0]);
        assert!(grid(1.0, 2.0, 0).is_empty());
    }

    #[test]
    fn test_fitted_lines_needs_alpha_and_beta() {
        let posterior = line_posterior();
        let lines = fitted_lines(&posterior, (0.0, 10.0), 3);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].label, "all");
        assert!((lines[0].points[0].mean - 2.02).abs() < 1e-9);

        let text = "lp__,mu\n0,1\n0,2\n";
        let no_line = Posterior::from_chains(vec![parse_stan_csv(text).unwrap()]).unwrap();
        assert!(fitted_lines(&no_line, (0.0, 1.0), 3).is_empty());
    }

    #[test]
    fn test_fitted_lines_one_per_group() {
        let text = "lp__,mu_alpha,alpha.1,alpha.2,beta.1,beta.2\n\
                    0,0,1,3,2,-1\n\
                    0,0,1,3,2,-1\n";
        let posterior = Posterior::from_chains(vec![parse_stan_csv(text).unwrap()]).unwrap();
        let lines = fitted_lines(&posterior, (0.0, 2.0), 3);

        let labels: Vec<&str> = lines.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["1", "2"]);
        // group 1: 1 + 2x, group 2: 3 - x
        assert!((lines[0].points[2].mean - 5.0).abs() < 1e-12);
        assert!((lines[1].points[2].mean - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_write_lines_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("line.csv");
        let lines = fitted_lines(&line_posterior(), (0.0, 10.0), 4);
        write_lines_csv(&lines, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next(), Some("line,x,mean,q05,q95"));
        assert_eq!(text.lines().count(), 5);
        assert!(text.lines().skip(1).all(|l| l.starts_with("all,")));
    }

    #[test]
    fn test_write_draws_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draws.csv");
        write_draws_csv(&line_posterior(), &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("chain,draw,alpha,beta"));
        assert_eq!(lines.next(), Some("1,1,2,0.5"));
        assert_eq!(text.lines().count(), 21);
    }

    #[test]
    fn test_summary_table_lists_parameters() {
        let summary = summarize_posterior(&line_posterior(), 10);
        let table = summary_table(&summary);
        assert!(table.contains("alpha"));
        assert!(table.contains("beta"));
        assert!(!table.contains("lp__"));
        assert!(table.contains("draws/chain: 20"));
    }
}
