//! stanbook library.
//!
//! Worked Bayesian examples of increasing depth, from a single-group mean up
//! to a three-level hierarchy. Each example simulates its own data, packs it
//! into a CmdStan data payload, samples a fixed Stan program and summarizes
//! the draws.

pub mod config;
pub mod datagen;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod payload;
pub mod report;
pub mod scenario;
pub mod stanrun;

pub use config::Config;
pub use error::{Result, StanbookError};
pub use model::ModelDescriptor;
pub use payload::{DataPayload, DataValue};
pub use scenario::{Example, ExampleOutcome, Scenario};
pub use stanrun::{CmdStanEngine, InferenceEngine, Posterior, RunConfig};
