//! Cloud resource client error types

use thiserror::Error;

/// Errors returned by the resource clients
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Name {0} belongs to another AWS account; choose a different deployment prefix")]
    NameTaken(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Access denied during {operation}: {message}")]
    AccessDenied { operation: String, message: String },

    #[error("API error during {operation}: {message}")]
    ApiError { operation: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiError {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// The resource is already gone (or never existed).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound(_))
    }

    /// The resource (or permission statement) already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ResourceAlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CloudError::ResourceNotFound("bucket".into()).is_not_found());
        assert!(!CloudError::ResourceNotFound("bucket".into()).is_conflict());
        assert!(CloudError::ResourceAlreadyExists("stmt".into()).is_conflict());
        assert!(!CloudError::api("CreateBucket", "boom").is_not_found());

        let taken = CloudError::NameTaken("acme-dev-airbrx-app".into());
        assert!(!taken.is_conflict());
        assert!(!taken.is_not_found());
        assert!(taken.to_string().contains("another AWS account"));
    }

    #[test]
    fn test_api_error_message() {
        let err = CloudError::api("PutObject", "malformed request");
        assert_eq!(
            err.to_string(),
            "API error during PutObject: malformed request"
        );
    }
}
