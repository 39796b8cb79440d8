//! Configuration for stanbook.
//!
//! Everything has a default, so the config file is optional. CLI flags are
//! applied on top of whatever the file sets.

use crate::stanrun::RunConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where CmdStan lives and where model builds go
    #[serde(default)]
    pub engine: EngineConfig,

    /// Default sampler settings for every example
    #[serde(default)]
    pub run: RunConfig,

    /// Seed used by the data generators
    #[serde(default = "default_data_seed")]
    pub data_seed: u64,
}

/// CmdStan location and build directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// CmdStan root; detected from CMDSTAN or common install paths when unset
    #[serde(default)]
    pub cmdstan: Option<PathBuf>,

    /// Directory for compiled models, data files and chain output
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("stanbook-runs")
}

fn default_data_seed() -> u64 {
    2019
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            run: RunConfig::default(),
            data_seed: default_data_seed(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cmdstan: None,
            work_dir: default_work_dir(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.engine.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("engine.work_dir must not be empty".into()));
        }
        Ok(())
    }

    /// Annotated example file, as printed by `stanbook example-config`.
    pub fn example_toml() -> &'static str {
        r#"# stanbook configuration

# Seed for the synthetic data generators
data_seed = 2019

[engine]
# CmdStan root directory (defaults to $CMDSTAN, then ~/.cmdstan/<latest>)
# cmdstan = "/opt/cmdstan/cmdstan-2.36.0"
work_dir = "stanbook-runs"

[run]
# Iterations per chain, warm-up included; warm-up defaults to iter / 2
iter = 2000
chains = 4
# Chains allowed to run at the same time
n_jobs = 2
# seed = 2019
adapt_delta = 0.8
max_treedepth = 10
"#
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
