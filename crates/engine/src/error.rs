//! Error types for the optimization engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Indicator error: {0}")]
    Indicator(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Symbol universe too small: {eligible} eligible symbols, {required} required")]
    InsufficientUniverse { eligible: usize, required: usize },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Generation task failed: {0}")]
    TaskJoin(String),
}

/// Problems found while validating a [`crate::config::RunConfig`] or a
/// parameter space definition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Parameter '{name}': min {min} is greater than max {max}")]
    InvertedRange { name: String, min: f64, max: f64 },

    #[error("Parameter '{name}': step must be positive, got {step}")]
    NonPositiveStep { name: String, step: f64 },

    #[error("{field} must be {requirement}")]
    Invalid {
        field: &'static str,
        requirement: String,
    },
}

impl ConfigError {
    pub fn invalid(field: &'static str, requirement: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            requirement: requirement.into(),
        }
    }
}

impl From<ta::errors::TaError> for EngineError {
    fn from(err: ta::errors::TaError) -> Self {
        EngineError::Indicator(format!("{:?}", err))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
