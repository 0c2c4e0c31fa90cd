//! Error types for the w2-app service layer.

use std::path::PathBuf;

use w2_results::RunStatus;

/// Errors for misuse of the service layer. Failures of a run itself are
/// reported inside its `RunResult`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Control file error: {0}")]
    Config(String),

    #[error("Results error: {0}")]
    Results(String),

    #[error("Failed to read orchestrator config: {path}")]
    SettingsFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse orchestrator config {path}: {message}")]
    SettingsParse { path: PathBuf, message: String },

    #[error("Failed to write orchestrator config: {path}")]
    SettingsFileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid run state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for w2-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<w2_schema::SchemaError> for AppError {
    fn from(err: w2_schema::SchemaError) -> Self {
        AppError::Schema(err.to_string())
    }
}

impl From<w2_config::ConfigError> for AppError {
    fn from(err: w2_config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<w2_config::ParseError> for AppError {
    fn from(err: w2_config::ParseError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<w2_results::ResultsError> for AppError {
    fn from(err: w2_results::ResultsError) -> Self {
        AppError::Results(err.to_string())
    }
}
