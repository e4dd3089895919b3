//! Resource client traits
//!
//! One trait per resource family. Implementations are thin wrappers around
//! remote calls; create-or-update decisions live in the reconciler that sits
//! on top of them. Missing resources are reported as `Ok(None)` by lookups and
//! as `CloudError::ResourceNotFound` by mutating calls.

use crate::error::Result;
use crate::resource::{
    BucketSpec, DistributionInfo, DistributionSpec, FunctionInfo, FunctionSpec, ObjectVersion,
    OriginAccessControlInfo, OriginAccessControlSpec, PublicAccessBlock, ResourceTag, RoleInfo,
    RoleSpec,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Object storage (S3)
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn bucket_exists(&self, name: &str) -> Result<bool>;

    /// Create the bucket in `spec.region`. Settings are applied separately.
    async fn create_bucket(&self, spec: &BucketSpec) -> Result<()>;

    async fn put_public_access_block(&self, bucket: &str, block: &PublicAccessBlock)
    -> Result<()>;

    async fn put_versioning(&self, bucket: &str, enabled: bool) -> Result<()>;

    async fn put_bucket_policy(&self, bucket: &str, policy: &serde_json::Value) -> Result<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Every object version and delete marker in the bucket
    async fn list_object_versions(&self, bucket: &str) -> Result<Vec<ObjectVersion>>;

    async fn delete_object_versions(&self, bucket: &str, versions: &[ObjectVersion])
    -> Result<()>;

    async fn delete_bucket(&self, name: &str) -> Result<()>;
}

/// Identity (IAM roles)
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_role(&self, name: &str) -> Result<Option<RoleInfo>>;

    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleInfo>;

    /// Full replace of the named inline policy
    async fn put_role_policy(
        &self,
        role: &str,
        policy_name: &str,
        policy: &serde_json::Value,
    ) -> Result<()>;

    async fn list_role_policies(&self, role: &str) -> Result<Vec<String>>;

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> Result<()>;

    /// ARNs of managed policies attached to the role
    async fn list_attached_policies(&self, role: &str) -> Result<Vec<String>>;

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()>;

    async fn delete_role(&self, name: &str) -> Result<()>;
}

/// Function host (Lambda)
#[async_trait]
pub trait FunctionHost: Send + Sync {
    async fn get_function(&self, name: &str) -> Result<Option<FunctionInfo>>;

    async fn create_function(&self, spec: &FunctionSpec, code: &[u8]) -> Result<FunctionInfo>;

    async fn update_function_code(&self, name: &str, code: &[u8]) -> Result<()>;

    async fn update_function_configuration(&self, spec: &FunctionSpec) -> Result<()>;

    /// Block until the last update has finished
    async fn wait_until_updated(&self, name: &str) -> Result<()>;

    /// Block until the function state is Active
    async fn wait_until_active(&self, name: &str) -> Result<()>;

    async fn get_function_url(&self, name: &str) -> Result<Option<String>>;

    /// Create a public (auth type NONE) function URL
    async fn create_function_url(&self, name: &str) -> Result<String>;

    /// Grant `lambda:InvokeFunctionUrl` to everyone. Returns
    /// `ResourceAlreadyExists` when the statement is already present.
    async fn add_public_url_permission(&self, name: &str) -> Result<()>;

    async fn delete_function_url(&self, name: &str) -> Result<()>;

    async fn delete_function(&self, name: &str) -> Result<()>;
}

/// CDN (CloudFront)
#[async_trait]
pub trait Cdn: Send + Sync {
    /// Find the distribution carrying exactly this tag
    async fn find_distribution(&self, tag: &ResourceTag) -> Result<Option<DistributionInfo>>;

    async fn create_distribution(&self, spec: &DistributionSpec) -> Result<DistributionInfo>;

    async fn get_distribution(&self, id: &str) -> Result<Option<DistributionInfo>>;

    async fn disable_distribution(&self, id: &str) -> Result<()>;

    /// Block until the distribution status is "Deployed"
    async fn wait_until_deployed(&self, id: &str) -> Result<()>;

    async fn delete_distribution(&self, id: &str) -> Result<()>;

    async fn find_origin_access_control(
        &self,
        name: &str,
    ) -> Result<Option<OriginAccessControlInfo>>;

    async fn create_origin_access_control(
        &self,
        spec: &OriginAccessControlSpec,
    ) -> Result<OriginAccessControlInfo>;

    async fn delete_origin_access_control(&self, id: &str) -> Result<()>;
}

/// Everything the deployer needs from one cloud account
#[async_trait]
pub trait CloudProvider: ObjectStorage + RoleStore + FunctionHost + Cdn {
    /// Returns the provider name (e.g., "aws", "memory")
    fn name(&self) -> &str;

    /// Region every regional resource is created in
    fn region(&self) -> &str;

    /// Check that credentials resolve and return the account id
    async fn check_auth(&self) -> Result<AuthStatus>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account id if available
    pub account_id: Option<String>,

    /// Caller identity (user or role ARN) if available
    pub principal: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_id: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_id: Some(account_id.into()),
            principal: Some(principal.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_id: None,
            principal: None,
            error: Some(error.into()),
        }
    }
}

/// Upper bounds handed to the provider's native wait primitives
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Max wait for a function update or activation
    pub function: Duration,

    /// Max wait for a distribution to reach "Deployed"
    pub distribution: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            function: Duration::from_secs(5 * 60),
            distribution: Duration::from_secs(30 * 60),
        }
    }
}
