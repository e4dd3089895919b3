//! Lambda functions and function URLs

use crate::error::{map_sdk_error, missing};
use crate::provider::AwsProvider;
use airbrx_cloud::{CloudError, FunctionHost, FunctionInfo, FunctionSpec, FunctionState, Result};
use async_trait::async_trait;
use aws_sdk_lambda::client::Waiters;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{Environment, FunctionCode, FunctionUrlAuthType, Runtime, State};
use std::collections::HashMap;

/// Statement id of the public function URL grant
const PUBLIC_URL_STATEMENT_ID: &str = "FunctionURLAllowPublicAccess";

fn environment(spec: &FunctionSpec) -> Environment {
    let variables: HashMap<String, String> = spec.environment.iter().cloned().collect();
    Environment::builder().set_variables(Some(variables)).build()
}

fn function_state(state: Option<&State>) -> FunctionState {
    match state {
        Some(State::Pending) => FunctionState::Pending,
        Some(State::Active) => FunctionState::Active,
        Some(State::Inactive) => FunctionState::Inactive,
        Some(State::Failed) => FunctionState::Failed,
        _ => FunctionState::Unknown,
    }
}

#[async_trait]
impl FunctionHost for AwsProvider {
    async fn get_function(&self, name: &str) -> Result<Option<FunctionInfo>> {
        match self.lambda.get_function().function_name(name).send().await {
            Ok(response) => {
                let config = response
                    .configuration()
                    .ok_or_else(|| missing("GetFunction", "configuration"))?;
                Ok(Some(FunctionInfo {
                    name: name.to_string(),
                    arn: config
                        .function_arn()
                        .ok_or_else(|| missing("GetFunction", "function_arn"))?
                        .to_string(),
                    state: function_state(config.state()),
                }))
            }
            Err(e) => match map_sdk_error(e, "GetFunction", name) {
                CloudError::ResourceNotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create_function(&self, spec: &FunctionSpec, code: &[u8]) -> Result<FunctionInfo> {
        let response = self
            .lambda
            .create_function()
            .function_name(&spec.name)
            .description(&spec.description)
            .runtime(Runtime::from(spec.runtime.as_str()))
            .handler(&spec.handler)
            .memory_size(spec.memory_mb)
            .timeout(spec.timeout_secs)
            .role(&spec.role_arn)
            .environment(environment(spec))
            .code(FunctionCode::builder().zip_file(Blob::new(code.to_vec())).build())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "CreateFunction", &spec.name))?;

        tracing::info!("Created function {}", spec.name);
        Ok(FunctionInfo {
            name: spec.name.clone(),
            arn: response
                .function_arn()
                .ok_or_else(|| missing("CreateFunction", "function_arn"))?
                .to_string(),
            state: function_state(response.state()),
        })
    }

    async fn update_function_code(&self, name: &str, code: &[u8]) -> Result<()> {
        self.lambda
            .update_function_code()
            .function_name(name)
            .zip_file(Blob::new(code.to_vec()))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "UpdateFunctionCode", name))?;
        tracing::debug!("Updated code of {} ({} bytes)", name, code.len());
        Ok(())
    }

    async fn update_function_configuration(&self, spec: &FunctionSpec) -> Result<()> {
        self.lambda
            .update_function_configuration()
            .function_name(&spec.name)
            .description(&spec.description)
            .runtime(Runtime::from(spec.runtime.as_str()))
            .handler(&spec.handler)
            .memory_size(spec.memory_mb)
            .timeout(spec.timeout_secs)
            .role(&spec.role_arn)
            .environment(environment(spec))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "UpdateFunctionConfiguration", &spec.name))?;
        tracing::debug!("Updated configuration of {}", spec.name);
        Ok(())
    }

    async fn wait_until_updated(&self, name: &str) -> Result<()> {
        self.lambda
            .wait_until_function_updated_v2()
            .function_name(name)
            .wait(self.wait.function)
            .await
            .map_err(|e| {
                CloudError::Timeout(format!(
                    "update of function {}: {}",
                    name,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn wait_until_active(&self, name: &str) -> Result<()> {
        self.lambda
            .wait_until_function_active_v2()
            .function_name(name)
            .wait(self.wait.function)
            .await
            .map_err(|e| {
                CloudError::Timeout(format!(
                    "activation of function {}: {}",
                    name,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn get_function_url(&self, name: &str) -> Result<Option<String>> {
        match self
            .lambda
            .get_function_url_config()
            .function_name(name)
            .send()
            .await
        {
            Ok(response) => Ok(Some(response.function_url().to_string())),
            Err(e) => match map_sdk_error(e, "GetFunctionUrlConfig", name) {
                CloudError::ResourceNotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create_function_url(&self, name: &str) -> Result<String> {
        let response = self
            .lambda
            .create_function_url_config()
            .function_name(name)
            .auth_type(FunctionUrlAuthType::None)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "CreateFunctionUrlConfig", name))?;

        tracing::info!("Created function URL for {}", name);
        Ok(response.function_url().to_string())
    }

    async fn add_public_url_permission(&self, name: &str) -> Result<()> {
        self.lambda
            .add_permission()
            .function_name(name)
            .statement_id(PUBLIC_URL_STATEMENT_ID)
            .action("lambda:InvokeFunctionUrl")
            .principal("*")
            .function_url_auth_type(FunctionUrlAuthType::None)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "AddPermission", name))?;
        Ok(())
    }

    async fn delete_function_url(&self, name: &str) -> Result<()> {
        self.lambda
            .delete_function_url_config()
            .function_name(name)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "DeleteFunctionUrlConfig", name))?;
        Ok(())
    }

    async fn delete_function(&self, name: &str) -> Result<()> {
        self.lambda
            .delete_function()
            .function_name(name)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "DeleteFunction", name))?;
        tracing::info!("Deleted function {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_state_mapping() {
        assert_eq!(function_state(Some(&State::Active)), FunctionState::Active);
        assert_eq!(function_state(Some(&State::Pending)), FunctionState::Pending);
        assert_eq!(function_state(None), FunctionState::Unknown);
    }

    #[test]
    fn test_environment_keeps_all_variables() {
        let spec = FunctionSpec {
            name: "acme-dev-airbrx-api".to_string(),
            description: "api".to_string(),
            runtime: "nodejs20.x".to_string(),
            handler: "index.handler".to_string(),
            memory_mb: 512,
            timeout_secs: 30,
            role_arn: "arn:aws:iam::123456789012:role/acme-dev-airbrx-api-role".to_string(),
            environment: vec![
                ("TENANT_PREFIX".to_string(), "acme-dev".to_string()),
                ("STORAGE_REGION".to_string(), "us-west-2".to_string()),
            ],
        };
        let env = environment(&spec);
        let vars = env.variables().unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("TENANT_PREFIX").map(String::as_str), Some("acme-dev"));
    }
}
