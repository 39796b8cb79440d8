//! Stan execution through CmdStan
//!
//! This module provides:
//! - The `InferenceEngine` seam every worked example samples through
//! - CmdStan detection, model compilation and chain execution
//! - Parsing of CmdStan CSV output into a `Posterior`
//!
//! Engine-side failures are reported as they come back from CmdStan; nothing
//! here retries or repairs a run.

use crate::model::ModelDescriptor;
use crate::payload::{DataPayload, PayloadError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cmdstan not found: set CMDSTAN or engine.cmdstan in the config file")]
    CmdStanNotFound,

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stan compilation failed:\n{0}")]
    Compile(String),

    #[error("chain {chain} failed:\n{stderr}")]
    Sampling { chain: usize, stderr: String },

    #[error("malformed sampler output: {0}")]
    Output(String),

    #[error("invalid run configuration: {0}")]
    InvalidRunConfig(String),

    #[error("could not start chain pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl EngineError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Sampler settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Iterations per chain, warm-up included
    pub iter: usize,
    /// Warm-up iterations per chain; `None` means half of `iter`
    pub warmup: Option<usize>,
    /// Number of independent chains
    pub chains: usize,
    /// Maximum number of chains running at once
    pub n_jobs: usize,
    /// Random seed for reproducibility
    pub seed: Option<u32>,
    /// Adapt delta (target acceptance rate)
    pub adapt_delta: f64,
    /// Maximum tree depth
    pub max_treedepth: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iter: 2000,
            warmup: None,
            chains: 4,
            n_jobs: 1,
            seed: None,
            adapt_delta: 0.8,
            max_treedepth: 10,
        }
    }
}

impl RunConfig {
    pub fn num_warmup(&self) -> usize {
        self.warmup.unwrap_or(self.iter / 2)
    }

    /// Retained draws per chain.
    pub fn num_samples(&self) -> usize {
        self.iter.saturating_sub(self.num_warmup())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.iter == 0 {
            return Err(EngineError::InvalidRunConfig("iter must be positive".into()));
        }
        if self.chains == 0 {
            return Err(EngineError::InvalidRunConfig("chains must be positive".into()));
        }
        if self.n_jobs == 0 {
            return Err(EngineError::InvalidRunConfig("n_jobs must be positive".into()));
        }
        if self.num_warmup() >= self.iter {
            return Err(EngineError::InvalidRunConfig(format!(
                "warmup ({}) leaves no draws out of {} iterations",
                self.num_warmup(),
                self.iter
            )));
        }
        if !(self.adapt_delta > 0.0 && self.adapt_delta < 1.0) {
            return Err(EngineError::InvalidRunConfig(format!(
                "adapt_delta must lie in (0, 1), got {}",
                self.adapt_delta
            )));
        }
        Ok(())
    }
}

/// Anything that turns a model, its data and run settings into posterior draws.
///
/// Calls block until every chain has finished or one has failed.
pub trait InferenceEngine {
    fn sample(
        &self,
        model: &ModelDescriptor,
        data: &DataPayload,
        run: &RunConfig,
    ) -> Result<Posterior, EngineError>;
}

/// Detect cmdstan installation
pub fn detect_cmdstan() -> Result<PathBuf, EngineError> {
    if let Ok(path) = std::env::var("CMDSTAN") {
        let cmdstan_path = PathBuf::from(&path);
        if cmdstan_path.exists() {
            return Ok(cmdstan_path);
        }
    }

    let mut roots = vec![
        PathBuf::from("/usr/local/cmdstan"),
        PathBuf::from("/opt/cmdstan"),
    ];
    if let Ok(home) = std::env::var("HOME") {
        roots.insert(0, PathBuf::from(&home).join("cmdstan"));
        roots.insert(0, PathBuf::from(&home).join(".cmdstan"));
    }

    for root in roots {
        if !root.exists() {
            continue;
        }
        if root.join("makefile").exists() {
            return Ok(root);
        }
        // ~/.cmdstan holds one directory per installed version
        if let Ok(entries) = fs::read_dir(&root) {
            let mut versions: Vec<_> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            versions.sort();
            if let Some(latest) = versions.pop() {
                return Ok(latest);
            }
        }
    }

    Err(EngineError::CmdStanNotFound)
}

/// Runs models through a local CmdStan installation.
#[derive(Debug, Clone)]
pub struct CmdStanEngine {
    cmdstan: PathBuf,
    work_dir: PathBuf,
}

impl CmdStanEngine {
    pub fn new(cmdstan: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            cmdstan: cmdstan.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Use `cmdstan` when given, otherwise `detect_cmdstan`.
    pub fn locate(cmdstan: Option<&Path>, work_dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let cmdstan = match cmdstan {
            Some(path) if path.exists() => path.to_path_buf(),
            Some(_) => return Err(EngineError::CmdStanNotFound),
            None => detect_cmdstan()?,
        };
        Ok(Self::new(cmdstan, work_dir))
    }

    pub fn cmdstan_path(&self) -> &Path {
        &self.cmdstan
    }

    fn model_dir(&self, model: &ModelDescriptor) -> PathBuf {
        self.work_dir.join(model.name())
    }

    /// Compile a model to an executable, reusing an up-to-date build.
    pub fn compile(&self, model: &ModelDescriptor) -> Result<PathBuf, EngineError> {
        let dir = self.model_dir(model);
        let dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()
                .map_err(|e| EngineError::io("failed to resolve working directory", e))?
                .join(dir)
        };
        let stan_file = model
            .write_to(&dir)
            .map_err(|e| EngineError::io(format!("failed to write {}.stan", model.name()), e))?;
        let exe_path = stan_file.with_extension("");

        if is_fresh(&exe_path, &stan_file) {
            debug!(model = model.name(), "reusing compiled executable");
            return Ok(exe_path);
        }

        info!(model = model.name(), "compiling Stan model");
        let output = Command::new("make")
            .current_dir(&self.cmdstan)
            .arg(exe_path.to_string_lossy().to_string())
            .output()
            .map_err(|e| EngineError::io("failed to execute make", e))?;

        if !output.status.success() {
            return Err(EngineError::Compile(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(exe_path)
    }

    fn run_chain(
        &self,
        exe_path: &Path,
        data_file: &Path,
        output_dir: &Path,
        run: &RunConfig,
        chain_id: usize,
    ) -> Result<PathBuf, EngineError> {
        let output_file = output_dir.join(format!("output_{chain_id}.csv"));
        debug!(chain = chain_id, "starting chain");

        let mut cmd = Command::new(exe_path);
        cmd.arg("sample")
            .arg(format!("num_samples={}", run.num_samples()))
            .arg(format!("num_warmup={}", run.num_warmup()))
            .arg("save_warmup=0")
            .arg("adapt")
            .arg(format!("delta={}", run.adapt_delta))
            .arg("algorithm=hmc")
            .arg("engine=nuts")
            .arg(format!("max_depth={}", run.max_treedepth))
            .arg(format!("id={chain_id}"))
            .arg("data")
            .arg(format!("file={}", data_file.display()))
            .arg("output")
            .arg(format!("file={}", output_file.display()));

        if let Some(seed) = run.seed {
            cmd.arg("random")
                .arg(format!("seed={}", seed.wrapping_add(chain_id as u32)));
        }

        let output = cmd
            .output()
            .map_err(|e| EngineError::io(format!("failed to execute chain {chain_id}"), e))?;

        if !output.status.success() {
            return Err(EngineError::Sampling {
                chain: chain_id,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output_file)
    }
}

fn is_fresh(exe_path: &Path, source: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(exe_path), modified(source)) {
        (Some(exe), Some(src)) => exe > src,
        _ => false,
    }
}

impl InferenceEngine for CmdStanEngine {
    fn sample(
        &self,
        model: &ModelDescriptor,
        data: &DataPayload,
        run: &RunConfig,
    ) -> Result<Posterior, EngineError> {
        run.validate()?;
        let exe_path = self.compile(model)?;

        let output_dir = exe_path
            .parent()
            .map(|p| p.join("output"))
            .unwrap_or_else(|| self.model_dir(model).join("output"));
        fs::create_dir_all(&output_dir)
            .map_err(|e| EngineError::io("failed to create output directory", e))?;

        let data_file = output_dir.join("data.json");
        data.write_json(&data_file)?;

        info!(
            model = model.name(),
            chains = run.chains,
            parallel = run.n_jobs,
            "running MCMC sampling"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(run.n_jobs.min(run.chains))
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;

        let chain_files = pool.install(|| {
            (1..=run.chains)
                .into_par_iter()
                .map(|chain_id| self.run_chain(&exe_path, &data_file, &output_dir, run, chain_id))
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut chains = Vec::with_capacity(chain_files.len());
        for file in &chain_files {
            let text = fs::read_to_string(file)
                .map_err(|e| EngineError::io(format!("failed to read {}", file.display()), e))?;
            chains.push(parse_stan_csv(&text)?);
        }

        let posterior = Posterior::from_chains(chains)?;
        info!(
            model = model.name(),
            draws_per_chain = posterior.draws_per_chain(),
            divergent = posterior.n_divergent(),
            "sampling complete"
        );
        Ok(posterior)
    }
}

/// One chain's CSV: header plus one row per retained draw.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainCsv {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// Parse CmdStan CSV output. Comment lines start with `#`.
///
/// A short row or a non-numeric cell is an error, never a skipped draw.
pub fn parse_stan_csv(text: &str) -> Result<ChainCsv, EngineError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.starts_with('#') && !l.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| EngineError::Output("no header row".into()))?;
    let columns: Vec<String> = header.split(',').map(|s| s.trim().to_string()).collect();

    let mut rows = Vec::new();
    for (line_num, line) in lines {
        let row = line
            .split(',')
            .map(|cell| {
                cell.trim().parse::<f64>().map_err(|_| {
                    EngineError::Output(format!("line {}: '{}' is not a number", line_num + 1, cell))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        if row.len() != columns.len() {
            return Err(EngineError::Output(format!(
                "line {} has {} columns, expected {}",
                line_num + 1,
                row.len(),
                columns.len()
            )));
        }
        rows.push(row);
    }

    Ok(ChainCsv { columns, rows })
}

/// Posterior draws, kept per chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Posterior {
    /// Parameter columns in sampler output order
    names: Vec<String>,
    /// Parameter name -> chain -> draws
    samples: HashMap<String, Vec<Vec<f64>>>,
    /// Sampler columns (`lp__`, `divergent__`, ...) -> chain -> values
    sampler: HashMap<String, Vec<Vec<f64>>>,
    n_chains: usize,
    draws_per_chain: usize,
}

impl Posterior {
    /// Assemble chains that share one header and one draw count.
    pub fn from_chains(chains: Vec<ChainCsv>) -> Result<Self, EngineError> {
        let first = chains
            .first()
            .ok_or_else(|| EngineError::Output("no chains".into()))?;
        let columns = first.columns.clone();
        let draws_per_chain = first.rows.len();

        let mut samples: HashMap<String, Vec<Vec<f64>>> = HashMap::new();
        let mut sampler: HashMap<String, Vec<Vec<f64>>> = HashMap::new();

        for (chain_idx, chain) in chains.iter().enumerate() {
            if chain.columns != columns {
                return Err(EngineError::Output(format!(
                    "chain {} has a different header",
                    chain_idx + 1
                )));
            }
            if chain.rows.len() != draws_per_chain {
                return Err(EngineError::Output(format!(
                    "chain {} has {} draws, chain 1 has {}",
                    chain_idx + 1,
                    chain.rows.len(),
                    draws_per_chain
                )));
            }
            for (col, name) in columns.iter().enumerate() {
                let target = if name.ends_with("__") {
                    &mut sampler
                } else {
                    &mut samples
                };
                target
                    .entry(name.clone())
                    .or_default()
                    .push(chain.rows.iter().map(|row| row[col]).collect());
            }
        }

        let names = columns.into_iter().filter(|c| !c.ends_with("__")).collect();
        Ok(Self {
            names,
            samples,
            sampler,
            n_chains: chains.len(),
            draws_per_chain,
        })
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.names
    }

    /// Columns for a declared parameter: `mu` itself or its elements `mu.1`, `mu.2`, ...
    pub fn columns_for(&self, base: &str) -> Vec<&str> {
        self.names
            .iter()
            .filter(|n| {
                n.as_str() == base
                    || n.strip_prefix(base)
                        .map_or(false, |rest| rest.starts_with('.'))
            })
            .map(String::as_str)
            .collect()
    }

    pub fn n_chains(&self) -> usize {
        self.n_chains
    }

    pub fn draws_per_chain(&self) -> usize {
        self.draws_per_chain
    }

    /// Draws of one column, one vector per chain.
    pub fn draws(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.samples.get(name).map(Vec::as_slice)
    }

    /// Draws of one column with all chains concatenated.
    pub fn flat_draws(&self, name: &str) -> Option<Vec<f64>> {
        self.draws(name)
            .map(|chains| chains.iter().flatten().copied().collect())
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        self.flat_draws(name)
            .filter(|d| !d.is_empty())
            .map(|d| d.iter().sum::<f64>() / d.len() as f64)
    }

    /// A sampler column such as `divergent__` or `treedepth__`.
    pub fn diagnostic(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.sampler.get(name).map(Vec::as_slice)
    }

    pub fn n_divergent(&self) -> usize {
        self.diagnostic("divergent__")
            .map(|chains| chains.iter().flatten().filter(|&&d| d > 0.0).count())
            .unwrap_or(0)
    }

    /// One row per retained draw: `chain`, `draw`, then every parameter column.
    pub fn to_table(&self) -> DrawsTable {
        let mut header = vec!["chain".to_string(), "draw".to_string()];
        header.extend(self.names.iter().cloned());

        let mut rows = Vec::with_capacity(self.n_chains * self.draws_per_chain);
        for chain in 0..self.n_chains {
            for draw in 0..self.draws_per_chain {
                let mut row = vec![(chain + 1) as f64, (draw + 1) as f64];
                row.extend(self.names.iter().map(|n| self.samples[n][chain][draw]));
                rows.push(row);
            }
        }
        DrawsTable { header, rows }
    }
}

/// Tabular view of a posterior.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawsTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}
