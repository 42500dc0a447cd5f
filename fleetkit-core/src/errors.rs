use std::io;

use thiserror::Error;

use crate::structured_error::StructuredError;

/// Result type used across the fleetkit core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Infrastructure failures raised by the toolkit itself (setup, I/O, serde).
///
/// Domain failures that travel between services are [`StructuredError`]s.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Structured(#[from] StructuredError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Deserialization(err.to_string())
    }
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for environment variable {key}: {source}")]
    InvalidEnvVar {
        key: String,
        #[source]
        source: std::env::VarError,
    },

    #[error("internal configuration error: {0}")]
    Internal(String),
}

impl From<ConfigError> for CoreError {
    fn from(value: ConfigError) -> Self {
        CoreError::Config(value.to_string())
    }
}
