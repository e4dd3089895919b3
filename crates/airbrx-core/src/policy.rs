//! IAM policy documents
//!
//! Each function role gets an inline policy scoped to its own log group and
//! the buckets it touches. The deployer policy enumerates every action the
//! deployer itself performs, for operators whose own permissions are
//! restricted.

use crate::naming::{Component, ResourceNames};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

const VERSION: &str = "2012-10-17";

/// Trust policy shared by all three function roles
pub fn lambda_trust_policy() -> Value {
    json!({
        "Version": VERSION,
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "lambda.amazonaws.com" },
            "Action": "sts:AssumeRole"
        }]
    })
}

fn log_statement(region: &str, account_id: &str, function: &str) -> Value {
    let group = format!(
        "arn:aws:logs:{}:{}:log-group:{}",
        region,
        account_id,
        ResourceNames::log_group_for(function)
    );
    json!({
        "Sid": "OwnLogGroup",
        "Effect": "Allow",
        "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
        "Resource": [group.clone(), format!("{}:*", group)]
    })
}

fn bucket_read_write(sid: &str, bucket: &str) -> Value {
    json!({
        "Sid": sid,
        "Effect": "Allow",
        "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject", "s3:ListBucket"],
        "Resource": [format!("arn:aws:s3:::{}", bucket), format!("arn:aws:s3:::{}/*", bucket)]
    })
}

fn bucket_read(sid: &str, bucket: &str) -> Value {
    json!({
        "Sid": sid,
        "Effect": "Allow",
        "Action": ["s3:GetObject", "s3:ListBucket"],
        "Resource": [format!("arn:aws:s3:::{}", bucket), format!("arn:aws:s3:::{}/*", bucket)]
    })
}

/// Inline policy of one function role
pub fn function_policy(
    component: Component,
    names: &ResourceNames,
    region: &str,
    account_id: &str,
) -> Option<Value> {
    let function = names.function(component)?;
    let mut statements = vec![log_statement(region, account_id, function)];

    match component {
        Component::Api => {
            statements.push(bucket_read_write("AdminStorage", &names.admin_bucket));
            statements.push(json!({
                "Sid": "InvokeLogSummary",
                "Effect": "Allow",
                "Action": "lambda:InvokeFunction",
                "Resource": format!(
                    "arn:aws:lambda:{}:{}:function:{}",
                    region, account_id, names.log_summary_function
                )
            }));
        }
        Component::Gateway => {
            statements.push(bucket_read_write("GatewayStorage", &names.gateway_bucket));
            statements.push(bucket_read("AdminStorageRead", &names.admin_bucket));
        }
        Component::LogSummary => {
            statements.push(bucket_read_write("AdminStorage", &names.admin_bucket));
        }
        Component::App => return None,
    }

    Some(json!({ "Version": VERSION, "Statement": statements }))
}

/// Policy for the operator running the deployer
pub fn deployer_policy(names: &ResourceNames, account_id: &str) -> Value {
    let prefix = &names.prefix;
    json!({
        "Version": VERSION,
        "Statement": [
            {
                "Sid": "Storage",
                "Effect": "Allow",
                "Action": [
                    "s3:CreateBucket", "s3:DeleteBucket", "s3:ListBucket",
                    "s3:ListBucketVersions", "s3:PutBucketPublicAccessBlock",
                    "s3:PutBucketVersioning", "s3:PutBucketPolicy",
                    "s3:GetObject", "s3:PutObject", "s3:DeleteObject",
                    "s3:DeleteObjectVersion"
                ],
                "Resource": [
                    format!("arn:aws:s3:::{}-airbrx-*", prefix),
                    format!("arn:aws:s3:::{}-airbrx-*/*", prefix)
                ]
            },
            {
                "Sid": "Identity",
                "Effect": "Allow",
                "Action": [
                    "iam:GetRole", "iam:CreateRole", "iam:DeleteRole", "iam:PassRole",
                    "iam:PutRolePolicy", "iam:DeleteRolePolicy", "iam:ListRolePolicies",
                    "iam:ListAttachedRolePolicies", "iam:DetachRolePolicy"
                ],
                "Resource": format!("arn:aws:iam::{}:role/{}-airbrx-*", account_id, prefix)
            },
            {
                "Sid": "Compute",
                "Effect": "Allow",
                "Action": [
                    "lambda:GetFunction", "lambda:GetFunctionConfiguration",
                    "lambda:CreateFunction", "lambda:UpdateFunctionCode",
                    "lambda:UpdateFunctionConfiguration", "lambda:DeleteFunction",
                    "lambda:GetFunctionUrlConfig", "lambda:CreateFunctionUrlConfig",
                    "lambda:DeleteFunctionUrlConfig", "lambda:AddPermission"
                ],
                "Resource": format!("arn:aws:lambda:*:{}:function:{}-airbrx-*", account_id, prefix)
            },
            {
                "Sid": "Edge",
                "Effect": "Allow",
                "Action": [
                    "cloudfront:ListDistributions", "cloudfront:ListTagsForResource",
                    "cloudfront:CreateDistribution", "cloudfront:CreateDistributionWithTags",
                    "cloudfront:TagResource", "cloudfront:GetDistribution",
                    "cloudfront:GetDistributionConfig", "cloudfront:UpdateDistribution",
                    "cloudfront:DeleteDistribution", "cloudfront:ListOriginAccessControls",
                    "cloudfront:CreateOriginAccessControl",
                    "cloudfront:DeleteOriginAccessControl"
                ],
                "Resource": "*"
            },
            {
                "Sid": "Identify",
                "Effect": "Allow",
                "Action": "sts:GetCallerIdentity",
                "Resource": "*"
            }
        ]
    })
}

/// Bucket policy letting exactly one distribution read the app bucket
pub fn app_bucket_policy(bucket: &str, distribution_arn: &str) -> Value {
    json!({
        "Version": VERSION,
        "Statement": [{
            "Sid": "AllowCloudFrontRead",
            "Effect": "Allow",
            "Principal": { "Service": "cloudfront.amazonaws.com" },
            "Action": "s3:GetObject",
            "Resource": format!("arn:aws:s3:::{}/*", bucket),
            "Condition": {
                "StringEquals": { "AWS:SourceArn": distribution_arn }
            }
        }]
    })
}

/// The policy documents `setup` writes next to the configuration document
#[derive(Debug, Clone)]
pub struct PolicySet {
    pub documents: Vec<(String, Value)>,
}

impl PolicySet {
    pub fn new(names: &ResourceNames, region: &str, account_id: &str) -> Self {
        let mut documents = Vec::new();
        for component in Component::FUNCTIONS {
            if let (Some(function), Some(policy)) = (
                names.function(component),
                function_policy(component, names, region, account_id),
            ) {
                documents.push((format!("{}.json", ResourceNames::policy_for(function)), policy));
            }
        }
        documents.push((
            format!("{}-airbrx-deployer-policy.json", names.prefix),
            deployer_policy(names, account_id),
        ));
        Self { documents }
    }

    /// Write every document into `dir` and return the paths
    pub fn write(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for (file, document) in &self.documents {
            let path = dir.join(file);
            let body = serde_json::to_string_pretty(document).map_err(std::io::Error::other)?;
            std::fs::write(&path, body)?;
            tracing::debug!("Wrote policy {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}
