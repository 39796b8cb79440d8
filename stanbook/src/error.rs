//! Error types for stanbook.
//!
//! Failures fall into three groups:
//! - Generation errors: invalid simulation parameters, raised before any engine call
//! - Input errors: a data payload that disagrees with its model descriptor
//! - Engine errors: anything CmdStan reports, passed through unmodified

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::datagen::DataGenError;
pub use crate::payload::PayloadError;
pub use crate::stanrun::EngineError;

/// Top-level error type for stanbook.
#[derive(Debug, Error)]
pub enum StanbookError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data generation failed: {0}")]
    DataGen(#[from] DataGenError),

    #[error("Invalid data payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("Inference engine failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StanbookError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the failure happened before the engine was invoked.
    pub fn is_pre_engine(&self) -> bool {
        matches!(
            self,
            Self::DataGen(_) | Self::Payload(_) | Self::Config(_) | Self::UnknownScenario(_)
        )
    }
}

/// Result type alias for stanbook.
pub type Result<T> = std::result::Result<T, StanbookError>;
