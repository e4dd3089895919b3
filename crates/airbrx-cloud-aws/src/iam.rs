//! IAM roles and their policies

use crate::error::{map_sdk_error, missing};
use crate::provider::AwsProvider;
use airbrx_cloud::{CloudError, Result, RoleInfo, RoleSpec, RoleStore};
use async_trait::async_trait;

#[async_trait]
impl RoleStore for AwsProvider {
    async fn get_role(&self, name: &str) -> Result<Option<RoleInfo>> {
        match self.iam.get_role().role_name(name).send().await {
            Ok(response) => {
                let role = response.role().ok_or_else(|| missing("GetRole", "role"))?;
                Ok(Some(RoleInfo {
                    name: role.role_name().to_string(),
                    arn: role.arn().to_string(),
                }))
            }
            Err(e) => match map_sdk_error(e, "GetRole", name) {
                CloudError::ResourceNotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleInfo> {
        let response = self
            .iam
            .create_role()
            .role_name(&spec.name)
            .assume_role_policy_document(spec.trust_policy.to_string())
            .description(format!("Execution role for {}", spec.name.trim_end_matches("-role")))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "CreateRole", &spec.name))?;

        let role = response
            .role()
            .ok_or_else(|| missing("CreateRole", "role"))?;

        tracing::info!("Created role {}", spec.name);
        Ok(RoleInfo {
            name: role.role_name().to_string(),
            arn: role.arn().to_string(),
        })
    }

    async fn put_role_policy(
        &self,
        role: &str,
        policy_name: &str,
        policy: &serde_json::Value,
    ) -> Result<()> {
        self.iam
            .put_role_policy()
            .role_name(role)
            .policy_name(policy_name)
            .policy_document(policy.to_string())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "PutRolePolicy", role))?;
        tracing::debug!("Put inline policy {} on {}", policy_name, role);
        Ok(())
    }

    async fn list_role_policies(&self, role: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let response = self
                .iam
                .list_role_policies()
                .role_name(role)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "ListRolePolicies", role))?;

            names.extend(response.policy_names().iter().cloned());

            if !response.is_truncated() {
                break;
            }
            match response.marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> Result<()> {
        self.iam
            .delete_role_policy()
            .role_name(role)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "DeleteRolePolicy", &format!("{}/{}", role, policy_name)))?;
        Ok(())
    }

    async fn list_attached_policies(&self, role: &str) -> Result<Vec<String>> {
        let mut arns = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let response = self
                .iam
                .list_attached_role_policies()
                .role_name(role)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "ListAttachedRolePolicies", role))?;

            arns.extend(
                response
                    .attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_arn().map(str::to_string)),
            );

            if !response.is_truncated() {
                break;
            }
            match response.marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        Ok(arns)
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.iam
            .detach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "DetachRolePolicy", role))?;
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        self.iam
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "DeleteRole", name))?;
        tracing::info!("Deleted role {}", name);
        Ok(())
    }
}
