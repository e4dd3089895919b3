//! AWS error classification
//!
//! Every SDK crate re-exports the same `SdkError` and `ProvideErrorMetadata`,
//! so one classifier serves S3, IAM, Lambda, CloudFront and STS. The service
//! error code decides first; the HTTP status is the fallback for responses
//! without a body (S3 HEAD requests). A 409 carries too many meanings
//! (`BucketNotEmpty`, `OperationAborted`, `DistributionNotDisabled`) to be
//! read as "already exists", so conflicts are recognized by code only.

use airbrx_cloud::CloudError;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// Errors specific to talking to AWS, before they are folded into `CloudError`
#[derive(Error, Debug)]
pub enum AwsError {
    #[error("AWS region is not configured")]
    MissingRegion,

    #[error("Failed to build {what} request: {message}")]
    Build { what: &'static str, message: String },

    #[error("{operation} returned no {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },
}

impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::MissingRegion => CloudError::InvalidConfig(err.to_string()),
            other => CloudError::api("aws", other.to_string()),
        }
    }
}

/// Broad error families the deployer reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    NotFound,
    Conflict,
    NameTaken,
    AccessDenied,
    Unauthenticated,
    Other,
}

const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchEntity",
    "ResourceNotFoundException",
    "NoSuchBucket",
    "NoSuchKey",
    "NotFound",
    "NoSuchDistribution",
    "NoSuchOriginAccessControl",
];

const CONFLICT_CODES: &[&str] = &[
    "EntityAlreadyExists",
    "ResourceConflictException",
    "BucketAlreadyOwnedByYou",
    "DistributionAlreadyExists",
    "OriginAccessControlAlreadyExists",
];

/// Global names owned by a different account
const NAME_TAKEN_CODES: &[&str] = &["BucketAlreadyExists"];

const ACCESS_DENIED_CODES: &[&str] = &["AccessDenied", "AccessDeniedException"];

const UNAUTHENTICATED_CODES: &[&str] = &[
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "SignatureDoesNotMatch",
];

pub(crate) fn classify_code(code: Option<&str>, status: Option<u16>) -> ErrorClass {
    if let Some(code) = code {
        if NOT_FOUND_CODES.contains(&code) {
            return ErrorClass::NotFound;
        }
        if CONFLICT_CODES.contains(&code) {
            return ErrorClass::Conflict;
        }
        if NAME_TAKEN_CODES.contains(&code) {
            return ErrorClass::NameTaken;
        }
        if ACCESS_DENIED_CODES.contains(&code) {
            return ErrorClass::AccessDenied;
        }
        if UNAUTHENTICATED_CODES.contains(&code) {
            return ErrorClass::Unauthenticated;
        }
    }
    match status {
        Some(404) => ErrorClass::NotFound,
        Some(403) => ErrorClass::AccessDenied,
        Some(401) => ErrorClass::Unauthenticated,
        _ => ErrorClass::Other,
    }
}

/// Map an SDK error to `CloudError` with code and HTTP status classification
pub(crate) fn map_sdk_error<E>(err: SdkError<E>, operation: &str, target: &str) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = match &err {
        SdkError::ServiceError(service_err) => Some(service_err.raw().status().as_u16()),
        SdkError::ResponseError(response_err) => Some(response_err.raw().status().as_u16()),
        _ => None,
    };
    let code = err.code().map(str::to_string);
    let detail = DisplayErrorContext(&err).to_string();

    match classify_code(code.as_deref(), status) {
        ErrorClass::NotFound => CloudError::ResourceNotFound(target.to_string()),
        ErrorClass::Conflict => CloudError::ResourceAlreadyExists(target.to_string()),
        ErrorClass::NameTaken => CloudError::NameTaken(target.to_string()),
        ErrorClass::AccessDenied => CloudError::AccessDenied {
            operation: operation.to_string(),
            message: format!("{}: {}", target, detail),
        },
        ErrorClass::Unauthenticated => CloudError::AuthenticationFailed(detail),
        ErrorClass::Other => match &err {
            SdkError::TimeoutError(_) => {
                CloudError::Timeout(format!("{} on {}", operation, target))
            }
            _ => CloudError::api(operation, format!("{}: {}", target, detail)),
        },
    }
}

/// Map a request builder error (missing required field)
pub(crate) fn build_error(what: &'static str, err: impl std::fmt::Display) -> CloudError {
    AwsError::Build {
        what,
        message: err.to_string(),
    }
    .into()
}

pub(crate) fn missing(operation: &'static str, field: &'static str) -> CloudError {
    AwsError::MissingField { operation, field }.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_wins_over_status() {
        assert_eq!(
            classify_code(Some("NoSuchEntity"), Some(400)),
            ErrorClass::NotFound
        );
        assert_eq!(
            classify_code(Some("ResourceConflictException"), Some(400)),
            ErrorClass::Conflict
        );
        assert_eq!(
            classify_code(Some("BucketAlreadyOwnedByYou"), Some(409)),
            ErrorClass::Conflict
        );
    }

    #[test]
    fn test_status_fallback() {
        // S3 HEAD responses carry no body, so no code
        assert_eq!(classify_code(None, Some(404)), ErrorClass::NotFound);
        assert_eq!(classify_code(None, Some(403)), ErrorClass::AccessDenied);
        assert_eq!(classify_code(None, Some(500)), ErrorClass::Other);
        assert_eq!(classify_code(None, Some(409)), ErrorClass::Other);
        assert_eq!(classify_code(None, None), ErrorClass::Other);
    }

    #[test]
    fn test_non_idempotent_conflicts_are_not_swallowed() {
        for code in ["BucketNotEmpty", "OperationAborted", "DistributionNotDisabled"] {
            assert_eq!(
                classify_code(Some(code), Some(409)),
                ErrorClass::Other,
                "{}",
                code
            );
        }
        assert_eq!(
            classify_code(Some("BucketAlreadyExists"), Some(409)),
            ErrorClass::NameTaken
        );
    }

    #[test]
    fn test_auth_codes() {
        assert_eq!(
            classify_code(Some("ExpiredToken"), Some(403)),
            ErrorClass::Unauthenticated
        );
        assert_eq!(
            classify_code(Some("AccessDeniedException"), Some(403)),
            ErrorClass::AccessDenied
        );
    }

    #[test]
    fn test_aws_error_into_cloud_error() {
        let err: CloudError = AwsError::MissingRegion.into();
        assert!(matches!(err, CloudError::InvalidConfig(_)));

        let err = missing("CreateFunctionUrlConfig", "function_url");
        assert!(err.to_string().contains("CreateFunctionUrlConfig returned no function_url"));
    }
}
