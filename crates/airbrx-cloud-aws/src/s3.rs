//! S3 buckets and objects

use crate::error::{build_error, map_sdk_error};
use crate::provider::AwsProvider;
use airbrx_cloud::{BucketSpec, CloudError, ObjectStorage, ObjectVersion, PublicAccessBlock, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration, Delete,
    ObjectIdentifier, PublicAccessBlockConfiguration, VersioningConfiguration,
};

/// DeleteObjects accepts at most this many keys per request
const DELETE_BATCH: usize = 1000;

#[async_trait]
impl ObjectStorage for AwsProvider {
    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        match self.s3.head_bucket().bucket(name).send().await {
            Ok(_) => Ok(true),
            Err(e) => match map_sdk_error(e, "HeadBucket", name) {
                CloudError::ResourceNotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_bucket(&self, spec: &BucketSpec) -> Result<()> {
        let mut request = self.s3.create_bucket().bucket(&spec.name);

        // us-east-1 rejects an explicit location constraint
        if spec.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(spec.region.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "CreateBucket", &spec.name))?;

        tracing::info!("Created bucket {} in {}", spec.name, spec.region);
        Ok(())
    }

    async fn put_public_access_block(
        &self,
        bucket: &str,
        block: &PublicAccessBlock,
    ) -> Result<()> {
        let config = PublicAccessBlockConfiguration::builder()
            .block_public_acls(block.block_public_acls)
            .ignore_public_acls(block.ignore_public_acls)
            .block_public_policy(block.block_public_policy)
            .restrict_public_buckets(block.restrict_public_buckets)
            .build();

        self.s3
            .put_public_access_block()
            .bucket(bucket)
            .public_access_block_configuration(config)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "PutPublicAccessBlock", bucket))?;
        Ok(())
    }

    async fn put_versioning(&self, bucket: &str, enabled: bool) -> Result<()> {
        let status = if enabled {
            BucketVersioningStatus::Enabled
        } else {
            BucketVersioningStatus::Suspended
        };

        self.s3
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "PutBucketVersioning", bucket))?;
        Ok(())
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &serde_json::Value) -> Result<()> {
        self.s3
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy.to_string())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "PutBucketPolicy", bucket))?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let size = body.len();
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "PutObject", &format!("{}/{}", bucket, key)))?;

        tracing::debug!("Uploaded s3://{}/{} ({} bytes)", bucket, key, size);
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.s3.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => match map_sdk_error(e, "HeadObject", &format!("{}/{}", bucket, key)) {
                CloudError::ResourceNotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn list_object_versions(&self, bucket: &str) -> Result<Vec<ObjectVersion>> {
        let mut versions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        loop {
            let response = self
                .s3
                .list_object_versions()
                .bucket(bucket)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "ListObjectVersions", bucket))?;

            for version in response.versions() {
                if let Some(key) = version.key() {
                    versions.push(ObjectVersion {
                        key: key.to_string(),
                        version_id: version.version_id().map(str::to_string),
                        is_delete_marker: false,
                    });
                }
            }
            for marker in response.delete_markers() {
                if let Some(key) = marker.key() {
                    versions.push(ObjectVersion {
                        key: key.to_string(),
                        version_id: marker.version_id().map(str::to_string),
                        is_delete_marker: true,
                    });
                }
            }

            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = response.next_key_marker().map(str::to_string);
            version_marker = response.next_version_id_marker().map(str::to_string);
            if key_marker.is_none() && version_marker.is_none() {
                break;
            }
        }

        Ok(versions)
    }

    async fn delete_object_versions(
        &self,
        bucket: &str,
        versions: &[ObjectVersion],
    ) -> Result<()> {
        for batch in versions.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|v| {
                    ObjectIdentifier::builder()
                        .key(&v.key)
                        .set_version_id(v.version_id.clone())
                        .build()
                        .map_err(|e| build_error("ObjectIdentifier", e))
                })
                .collect::<Result<Vec<_>>>()?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| build_error("Delete", e))?;

            let response = self
                .s3
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "DeleteObjects", bucket))?;

            if let Some(first) = response.errors().first() {
                return Err(CloudError::api(
                    "DeleteObjects",
                    format!(
                        "{}: {} of {} objects not deleted (first: {} {})",
                        bucket,
                        response.errors().len(),
                        batch.len(),
                        first.key().unwrap_or("?"),
                        first.message().unwrap_or("")
                    ),
                ));
            }

            tracing::debug!("Deleted {} object versions from {}", batch.len(), bucket);
        }
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.s3
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "DeleteBucket", name))?;
        tracing::info!("Deleted bucket {}", name);
        Ok(())
    }
}
