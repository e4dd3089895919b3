//! AWS provider for airbrx
//!
//! Implements the resource client traits of `airbrx-cloud` on top of the
//! official AWS SDK: S3 buckets and objects, IAM roles, Lambda functions and
//! function URLs, CloudFront distributions and origin-access controls.
//!
//! # Requirements
//!
//! - Credentials resolvable through the default chain (environment,
//!   `~/.aws` profile, SSO, instance metadata)
//! - A principal allowed to call the actions in `airbrx setup`'s deployer
//!   policy
//!
//! # Example
//!
//! ```ignore
//! use airbrx_cloud::{CloudProvider, WaitConfig};
//! use airbrx_cloud_aws::AwsProvider;
//!
//! let provider = AwsProvider::new("us-west-2", WaitConfig::default()).await?;
//!
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//! ```

mod cloudfront;
pub mod error;
mod iam;
mod lambda;
pub mod provider;
mod s3;

pub use error::AwsError;
pub use provider::AwsProvider;
