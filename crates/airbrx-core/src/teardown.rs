//! Best-effort teardown
//!
//! Resources are removed in reverse dependency order. A missing resource
//! counts as removed. Any other error is recorded and the teardown moves on
//! to the next independent resource, so one failure never blocks the rest.

use crate::error::{DeployError, Result};
use crate::naming::{Component, ResourceNames};
use airbrx_cloud::{ApplyResult, CloudError, CloudProvider, ResourceTag};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Emptying a bucket re-lists until nothing is left, at most this often
const MAX_EMPTY_PASSES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    pub result: ApplyResult,
    /// Things the operator has to remove by hand
    pub manual_followups: Vec<String>,
}

impl TeardownReport {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

pub struct Teardown {
    provider: Arc<dyn CloudProvider>,
    names: ResourceNames,
}

/// `Ok(true)` when the call removed something, `Ok(false)` when it was
/// already gone
fn gone(result: airbrx_cloud::Result<()>) -> airbrx_cloud::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

impl Teardown {
    pub fn new(provider: Arc<dyn CloudProvider>, prefix: &str) -> Self {
        Self {
            provider,
            names: ResourceNames::new(prefix),
        }
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    /// Tear everything down. `confirmation` must equal the prefix exactly.
    pub async fn run(&self, confirmation: &str) -> Result<TeardownReport> {
        if confirmation != self.names.prefix {
            return Err(DeployError::ConfirmationMismatch {
                expected: self.names.prefix.clone(),
                given: confirmation.to_string(),
            });
        }

        let started = Instant::now();
        let mut result = ApplyResult::new();
        tracing::info!("Tearing down {}", self.names.prefix);

        for component in [Component::App, Component::Gateway, Component::Api] {
            self.remove_distribution(component, &mut result).await;
        }
        self.remove_origin_access_control(&mut result).await;
        for function in self.names.functions() {
            self.remove_function(function, &mut result).await;
        }
        for bucket in self.names.buckets() {
            self.remove_bucket(bucket, &mut result).await;
        }
        for role in self.names.roles() {
            self.remove_role(&role, &mut result).await;
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        let manual_followups = self
            .names
            .log_groups()
            .into_iter()
            .map(|group| format!("CloudWatch log group {} is not deleted automatically", group))
            .collect();

        Ok(TeardownReport {
            result,
            manual_followups,
        })
    }

    fn record(result: &mut ApplyResult, id: &str, outcome: airbrx_cloud::Result<String>) {
        match outcome {
            Ok(message) => {
                tracing::info!("{}: {}", id, message);
                result.add_success(id, message);
            }
            Err(e) => {
                tracing::warn!("{}: {}", id, e);
                result.add_failure(id, e.to_string());
            }
        }
    }

    async fn remove_distribution(&self, component: Component, result: &mut ApplyResult) {
        let tag = ResourceTag::new(&self.names.prefix, component.as_str());
        let id = format!("distribution/{}", component);
        let outcome = self.delete_distribution(&tag, result).await;
        Self::record(result, &id, outcome);
    }

    async fn delete_distribution(
        &self,
        tag: &ResourceTag,
        result: &mut ApplyResult,
    ) -> airbrx_cloud::Result<String> {
        let Some(info) = self.provider.find_distribution(tag).await? else {
            return Ok("not found".to_string());
        };

        if info.enabled {
            match self.provider.disable_distribution(&info.id).await {
                Ok(()) => tracing::info!("Disabled distribution {}", info.id),
                Err(e) if e.is_not_found() => return Ok(format!("{} already deleted", info.id)),
                // Disabling is asynchronous; a concurrent disable shows up here
                Err(e) => result.add_warning(format!("disable {}: {}", info.id, e)),
            }
        }

        tracing::info!("Waiting for distribution {} to finish deploying", info.id);
        if !gone(self.provider.wait_until_deployed(&info.id).await)? {
            return Ok(format!("{} already deleted", info.id));
        }
        Ok(if gone(self.provider.delete_distribution(&info.id).await)? {
            format!("{} deleted", info.id)
        } else {
            format!("{} already deleted", info.id)
        })
    }

    async fn remove_origin_access_control(&self, result: &mut ApplyResult) {
        let id = format!("origin-access-control/{}", self.names.app_oac);
        let outcome = self.delete_origin_access_control().await;
        Self::record(result, &id, outcome);
    }

    async fn delete_origin_access_control(&self) -> airbrx_cloud::Result<String> {
        let Some(oac) = self
            .provider
            .find_origin_access_control(&self.names.app_oac)
            .await?
        else {
            return Ok("not found".to_string());
        };
        Ok(if gone(self.provider.delete_origin_access_control(&oac.id).await)? {
            format!("{} deleted", oac.id)
        } else {
            "not found".to_string()
        })
    }

    async fn remove_function(&self, function: &str, result: &mut ApplyResult) {
        let id = format!("function/{}", function);
        let outcome = self.delete_function(function).await;
        Self::record(result, &id, outcome);
    }

    /// URL configuration first, then the function
    async fn delete_function(&self, function: &str) -> airbrx_cloud::Result<String> {
        gone(self.provider.delete_function_url(function).await)?;
        Ok(if gone(self.provider.delete_function(function).await)? {
            "deleted".to_string()
        } else {
            "not found".to_string()
        })
    }

    async fn remove_bucket(&self, bucket: &str, result: &mut ApplyResult) {
        let id = format!("bucket/{}", bucket);
        let outcome = self.empty_and_delete_bucket(bucket).await;
        Self::record(result, &id, outcome);
    }

    /// Delete every version and delete marker, then the bucket
    pub async fn empty_and_delete_bucket(&self, bucket: &str) -> airbrx_cloud::Result<String> {
        let mut removed = 0;
        for _ in 0..MAX_EMPTY_PASSES {
            let versions = match self.provider.list_object_versions(bucket).await {
                Ok(versions) => versions,
                Err(e) if e.is_not_found() => return Ok("not found".to_string()),
                Err(e) => return Err(e),
            };
            if versions.is_empty() {
                break;
            }
            tracing::debug!("Deleting {} versions from {}", versions.len(), bucket);
            self.provider.delete_object_versions(bucket, &versions).await?;
            removed += versions.len();
        }

        if !self.provider.list_object_versions(bucket).await?.is_empty() {
            return Err(CloudError::api(
                "delete_bucket",
                format!("{} still has object versions after emptying", bucket),
            ));
        }

        Ok(if gone(self.provider.delete_bucket(bucket).await)? {
            format!("deleted ({} versions removed)", removed)
        } else {
            "not found".to_string()
        })
    }

    async fn remove_role(&self, role: &str, result: &mut ApplyResult) {
        let id = format!("role/{}", role);
        let outcome = self.delete_role(role).await;
        Self::record(result, &id, outcome);
    }

    /// Inline policies, then attached managed policies, then the role
    async fn delete_role(&self, role: &str) -> airbrx_cloud::Result<String> {
        if self.provider.get_role(role).await?.is_none() {
            return Ok("not found".to_string());
        }
        for policy in self.provider.list_role_policies(role).await? {
            gone(self.provider.delete_role_policy(role, &policy).await)?;
        }
        for arn in self.provider.list_attached_policies(role).await? {
            gone(self.provider.detach_role_policy(role, &arn).await)?;
        }
        Ok(if gone(self.provider.delete_role(role).await)? {
            "deleted".to_string()
        } else {
            "not found".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airbrx_cloud::{
        BucketSpec, InjectedFailure, MemoryProvider, ObjectStorage, PublicAccessBlock,
    };

    fn teardown(provider: &Arc<MemoryProvider>) -> Teardown {
        Teardown::new(provider.clone(), "acme-dev")
    }

    #[tokio::test]
    async fn test_confirmation_must_match_exactly() {
        let provider = Arc::new(MemoryProvider::new("us-west-2"));
        let err = teardown(&provider).run("acme-dev ").await.unwrap_err();
        assert!(matches!(err, DeployError::ConfirmationMismatch { .. }));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_account_is_success() {
        let provider = Arc::new(MemoryProvider::new("us-west-2"));
        let report = teardown(&provider).run("acme-dev").await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.manual_followups.len(), 3);
        assert!(report.manual_followups[0].contains("/aws/lambda/acme-dev-airbrx-api"));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_teardown() {
        let provider = Arc::new(MemoryProvider::new("us-west-2"));
        let names = ResourceNames::new("acme-dev");
        for bucket in names.buckets() {
            provider
                .create_bucket(&BucketSpec {
                    name: bucket.to_string(),
                    region: "us-west-2".to_string(),
                    public_access: PublicAccessBlock::all_blocked(),
                    versioning: true,
                })
                .await
                .unwrap();
        }
        provider.inject_failure(
            "delete_bucket",
            &names.admin_bucket,
            InjectedFailure::AccessDenied,
        );

        let report = teardown(&provider).run("acme-dev").await.unwrap();
        assert_eq!(report.result.failed.len(), 1);
        assert_eq!(
            report.result.failed[0].action_id,
            format!("bucket/{}", names.admin_bucket)
        );
        assert_eq!(provider.bucket_names(), vec![names.admin_bucket.clone()]);
    }
}
