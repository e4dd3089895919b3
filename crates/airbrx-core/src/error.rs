use crate::registry::ArtifactKey;
use airbrx_cloud::CloudError;
use airbrx_config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("Step '{step}' requires artifact {key}, which no earlier step produced")]
    MissingArtifact { step: String, key: ArtifactKey },

    #[error("Step '{step}' declared {key} but did not produce it")]
    MissingOutput { step: String, key: ArtifactKey },

    #[error("Step '{step}' produced undeclared artifact {key}")]
    UndeclaredOutput { step: String, key: ArtifactKey },

    #[error("Artifact {key} is already '{existing}', refusing to overwrite with '{new}'")]
    ArtifactConflict {
        key: ArtifactKey,
        existing: String,
        new: String,
    },

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Phase '{phase}' failed at step '{step}': {source}")]
    PhaseFailed {
        phase: String,
        step: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error("Artifact source error: {0}")]
    Source(String),

    #[error("Not authenticated with AWS: {0}")]
    NotAuthenticated(String),

    #[error("Confirmation '{given}' does not match deployment name '{expected}'")]
    ConfirmationMismatch { expected: String, given: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// The innermost error, unwrapping phase context
    pub fn root(&self) -> &DeployError {
        match self {
            DeployError::PhaseFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
