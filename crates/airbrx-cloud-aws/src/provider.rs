//! AWS provider implementation

use crate::error::{AwsError, map_sdk_error};
use airbrx_cloud::{AuthStatus, CloudProvider, WaitConfig};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};

/// AWS provider: one SDK client per service, all sharing one credential chain
pub struct AwsProvider {
    pub(crate) region: String,
    pub(crate) wait: WaitConfig,
    pub(crate) s3: aws_sdk_s3::Client,
    pub(crate) iam: aws_sdk_iam::Client,
    pub(crate) lambda: aws_sdk_lambda::Client,
    pub(crate) cloudfront: aws_sdk_cloudfront::Client,
    sts: aws_sdk_sts::Client,
}

impl AwsProvider {
    /// Load credentials from the default chain (env, profile, SSO, IMDS) and
    /// pin every regional client to `region`.
    pub async fn new(region: &str, wait: WaitConfig) -> airbrx_cloud::Result<Self> {
        if region.trim().is_empty() {
            return Err(AwsError::MissingRegion.into());
        }

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        tracing::debug!("Loaded AWS configuration for region {}", region);

        Ok(Self {
            region: region.to_string(),
            wait,
            s3: aws_sdk_s3::Client::new(&sdk_config),
            iam: aws_sdk_iam::Client::new(&sdk_config),
            lambda: aws_sdk_lambda::Client::new(&sdk_config),
            cloudfront: aws_sdk_cloudfront::Client::new(&sdk_config),
            sts: aws_sdk_sts::Client::new(&sdk_config),
        })
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn check_auth(&self) -> airbrx_cloud::Result<AuthStatus> {
        match self.sts.get_caller_identity().send().await {
            Ok(identity) => match identity.account() {
                Some(account) => Ok(AuthStatus::ok(
                    account,
                    identity.arn().unwrap_or("unknown"),
                )),
                None => Ok(AuthStatus::failed("caller identity has no account id")),
            },
            Err(e) => {
                let err = map_sdk_error(e, "GetCallerIdentity", "caller identity");
                tracing::debug!("Credential check failed: {}", err);
                Ok(AuthStatus::failed(err.to_string()))
            }
        }
    }
}
