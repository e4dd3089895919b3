//! Typed resource descriptors
//!
//! A descriptor is the desired shape of one remote resource. Descriptors are
//! built from the deployment configuration (and artifacts discovered earlier in
//! the run) and handed to the resource clients unchanged.

use serde::{Deserialize, Serialize};

/// Identifying tag attached to every distribution at creation time.
///
/// CloudFront has no natural unique business key, so lookups are done by
/// exact match on both tag values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceTag {
    pub deployment: String,
    pub component: String,
}

impl ResourceTag {
    pub const DEPLOYMENT_KEY: &'static str = "airbrx:deployment";
    pub const COMPONENT_KEY: &'static str = "airbrx:component";

    pub fn new(deployment: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            deployment: deployment.into(),
            component: component.into(),
        }
    }

    /// Tag key/value pairs in the order they are attached
    pub fn pairs(&self) -> [(&'static str, &str); 2] {
        [
            (Self::DEPLOYMENT_KEY, self.deployment.as_str()),
            (Self::COMPONENT_KEY, self.component.as_str()),
        ]
    }

    /// Rebuild a tag from a resource's tag list. Returns `None` unless both
    /// keys are present.
    pub fn from_pairs<'a, I>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut deployment = None;
        let mut component = None;
        for (key, value) in pairs {
            match key {
                Self::DEPLOYMENT_KEY => deployment = Some(value.to_string()),
                Self::COMPONENT_KEY => component = Some(value.to_string()),
                _ => {}
            }
        }
        Some(Self {
            deployment: deployment?,
            component: component?,
        })
    }

    /// Human-readable marker written into the distribution comment
    pub fn marker(&self) -> String {
        format!("airbrx {} {}", self.deployment, self.component)
    }
}

impl std::fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.deployment, self.component)
    }
}

/// S3 public access block settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAccessBlock {
    pub block_public_acls: bool,
    pub ignore_public_acls: bool,
    pub block_public_policy: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlock {
    /// Every public path closed
    pub fn all_blocked() -> Self {
        Self {
            block_public_acls: true,
            ignore_public_acls: true,
            block_public_policy: true,
            restrict_public_buckets: true,
        }
    }

    /// ACLs stay blocked, but a bucket policy granting the CDN read access
    /// can be attached.
    pub fn allow_bucket_policy() -> Self {
        Self {
            block_public_acls: true,
            ignore_public_acls: true,
            block_public_policy: false,
            restrict_public_buckets: false,
        }
    }
}

/// Desired bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSpec {
    pub name: String,
    pub region: String,
    pub public_access: PublicAccessBlock,
    pub versioning: bool,
}

/// One entry of a versioned bucket listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: Option<String>,
    pub is_delete_marker: bool,
}

/// Desired IAM role with its single inline policy
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSpec {
    pub name: String,
    pub trust_policy: serde_json::Value,
    pub policy_name: String,
    pub policy: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub name: String,
    pub arn: String,
}

/// Desired Lambda function configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub runtime: String,
    pub handler: String,
    pub memory_mb: i32,
    pub timeout_secs: i32,
    pub role_arn: String,
    /// Environment variables in declaration order
    pub environment: Vec<(String, String)>,
}

impl FunctionSpec {
    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Lambda lifecycle state as reported by the function host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionState {
    Pending,
    Active,
    Inactive,
    Failed,
    Unknown,
}

impl std::fmt::Display for FunctionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionState::Pending => write!(f, "pending"),
            FunctionState::Active => write!(f, "active"),
            FunctionState::Inactive => write!(f, "inactive"),
            FunctionState::Failed => write!(f, "failed"),
            FunctionState::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub arn: String,
    pub state: FunctionState,
}

/// What sits behind a distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// A Lambda function URL: nothing cached, every method forwarded
    FunctionUrl,
    /// A private S3 bucket read through an origin-access control
    StaticSite,
}

/// Managed CloudFront policies used for an origin kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicySelection {
    pub cache_policy_id: &'static str,
    pub origin_request_policy_id: &'static str,
    pub allowed_methods: &'static [&'static str],
    pub cached_methods: &'static [&'static str],
}

/// Managed-CachingOptimized
pub const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";
/// Managed-CachingDisabled
pub const CACHING_DISABLED_POLICY_ID: &str = "4135ea2d-6df8-44a3-9df3-4b5a84be39ad";
/// Managed-AllViewerExceptHostHeader (function URLs reject a foreign Host header)
pub const ALL_VIEWER_EXCEPT_HOST_POLICY_ID: &str = "b689b0a8-53d0-40ab-baf2-68738e2966ac";
/// Managed-CORS-S3Origin
pub const CORS_S3_ORIGIN_POLICY_ID: &str = "88a5eaf4-2fd4-4709-b370-b4c650ea3fcf";

const ALL_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "PUT", "POST", "PATCH", "DELETE"];
const READ_METHODS: &[&str] = &["GET", "HEAD"];

impl OriginKind {
    pub fn policies(&self) -> CachePolicySelection {
        match self {
            OriginKind::FunctionUrl => CachePolicySelection {
                cache_policy_id: CACHING_DISABLED_POLICY_ID,
                origin_request_policy_id: ALL_VIEWER_EXCEPT_HOST_POLICY_ID,
                allowed_methods: ALL_METHODS,
                cached_methods: READ_METHODS,
            },
            OriginKind::StaticSite => CachePolicySelection {
                cache_policy_id: CACHING_OPTIMIZED_POLICY_ID,
                origin_request_policy_id: CORS_S3_ORIGIN_POLICY_ID,
                allowed_methods: READ_METHODS,
                cached_methods: READ_METHODS,
            },
        }
    }
}

/// Desired distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionSpec {
    pub tag: ResourceTag,
    pub comment: String,
    pub origin_domain: String,
    pub origin_kind: OriginKind,
    /// Required for `OriginKind::StaticSite`
    pub origin_access_control_id: Option<String>,
    pub default_root_object: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionInfo {
    pub id: String,
    pub arn: String,
    pub domain_name: String,
    pub enabled: bool,
    /// "InProgress" or "Deployed"
    pub status: String,
}

impl DistributionInfo {
    pub fn is_deployed(&self) -> bool {
        self.status == "Deployed"
    }
}

/// Desired origin-access control (S3 origin, sigv4, always sign)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginAccessControlSpec {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginAccessControlInfo {
    pub id: String,
    pub name: String,
}

/// Strip scheme and trailing slash from a function URL so it can be used as
/// a CloudFront origin domain.
pub fn origin_domain_from_url(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}
