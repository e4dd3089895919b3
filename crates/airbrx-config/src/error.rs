use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration directory not found (no home directory?)")]
    ConfigDirNotFound,

    #[error(
        "No deployment configuration found. Looked in:\n\
        - AIRBRX_CONFIG (path to a configuration file)\n\
        - {searched}/*.env\n\
        Run `airbrx setup` to create one, or pass --config"
    )]
    ConfigNotFound { searched: String },

    #[error("Configuration file does not exist: {0}")]
    ConfigFileMissing(PathBuf),

    #[error("Several deployment configurations found; pick one with --config")]
    Ambiguous { candidates: Vec<PathBuf> },

    #[error("Required key {0} is missing or empty")]
    MissingKey(&'static str),

    #[error("Invalid prefix '{prefix}': {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    #[error("Invalid region '{0}'")]
    InvalidRegion(String),

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid admin token record: {0}")]
    InvalidToken(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
