//! CloudFront distributions and origin-access controls
//!
//! Distributions are found by their `airbrx:deployment` / `airbrx:component`
//! tags. The comment carries the same marker for humans browsing the console
//! but is never used for lookups.

use crate::error::{build_error, map_sdk_error, missing};
use crate::provider::AwsProvider;
use airbrx_cloud::{
    Cdn, CloudError, DistributionInfo, DistributionSpec, OriginAccessControlInfo,
    OriginAccessControlSpec, OriginKind, ResourceTag, Result,
};
use async_trait::async_trait;
use aws_sdk_cloudfront::client::Waiters;
use aws_sdk_cloudfront::error::DisplayErrorContext;
use aws_sdk_cloudfront::types::{
    AllowedMethods, CachedMethods, CustomErrorResponse, CustomErrorResponses, CustomOriginConfig,
    DefaultCacheBehavior, DistributionConfig, DistributionConfigWithTags, HttpVersion, Method,
    Origin, OriginAccessControlConfig, OriginAccessControlOriginTypes,
    OriginAccessControlSigningBehaviors, OriginAccessControlSigningProtocols,
    OriginProtocolPolicy, OriginSslProtocols, Origins, PriceClass, S3OriginConfig, SslProtocol,
    Tag, Tags, ViewerProtocolPolicy,
};

const ORIGIN_ID: &str = "primary";

fn methods(items: &[&str]) -> Vec<Method> {
    items.iter().map(|m| Method::from(*m)).collect()
}

fn build_origin(spec: &DistributionSpec) -> Result<Origin> {
    let origin = Origin::builder()
        .id(ORIGIN_ID)
        .domain_name(&spec.origin_domain);

    let origin = match spec.origin_kind {
        OriginKind::FunctionUrl => origin.custom_origin_config(
            CustomOriginConfig::builder()
                .http_port(80)
                .https_port(443)
                .origin_protocol_policy(OriginProtocolPolicy::HttpsOnly)
                .origin_ssl_protocols(
                    OriginSslProtocols::builder()
                        .quantity(1)
                        .items(SslProtocol::TlSv12)
                        .build()
                        .map_err(|e| build_error("OriginSslProtocols", e))?,
                )
                .build()
                .map_err(|e| build_error("CustomOriginConfig", e))?,
        ),
        OriginKind::StaticSite => {
            let oac = spec.origin_access_control_id.as_deref().ok_or_else(|| {
                CloudError::InvalidConfig(format!(
                    "static site distribution {} needs an origin-access control",
                    spec.tag
                ))
            })?;
            origin
                .s3_origin_config(
                    // An OAC replaces the legacy identity, which must be empty
                    S3OriginConfig::builder()
                        .origin_access_identity("")
                        .build(),
                )
                .origin_access_control_id(oac)
        }
    };

    origin.build().map_err(|e| build_error("Origin", e))
}

fn build_cache_behavior(kind: OriginKind) -> Result<DefaultCacheBehavior> {
    let policies = kind.policies();

    let cached = CachedMethods::builder()
        .quantity(policies.cached_methods.len() as i32)
        .set_items(Some(methods(policies.cached_methods)))
        .build()
        .map_err(|e| build_error("CachedMethods", e))?;

    let allowed = AllowedMethods::builder()
        .quantity(policies.allowed_methods.len() as i32)
        .set_items(Some(methods(policies.allowed_methods)))
        .cached_methods(cached)
        .build()
        .map_err(|e| build_error("AllowedMethods", e))?;

    DefaultCacheBehavior::builder()
        .target_origin_id(ORIGIN_ID)
        .viewer_protocol_policy(ViewerProtocolPolicy::RedirectToHttps)
        .allowed_methods(allowed)
        .cache_policy_id(policies.cache_policy_id)
        .origin_request_policy_id(policies.origin_request_policy_id)
        .compress(true)
        .build()
        .map_err(|e| build_error("DefaultCacheBehavior", e))
}

/// Single-page app routing: unknown paths fall back to index.html
fn spa_error_responses() -> Result<CustomErrorResponses> {
    let responses = [403, 404]
        .into_iter()
        .map(|code| {
            CustomErrorResponse::builder()
                .error_code(code)
                .response_code("200")
                .response_page_path("/index.html")
                .error_caching_min_ttl(0)
                .build()
                .map_err(|e| build_error("CustomErrorResponse", e))
        })
        .collect::<Result<Vec<_>>>()?;

    CustomErrorResponses::builder()
        .quantity(responses.len() as i32)
        .set_items(Some(responses))
        .build()
        .map_err(|e| build_error("CustomErrorResponses", e))
}

fn build_tags(tag: &ResourceTag) -> Result<Tags> {
    let items = tag
        .pairs()
        .into_iter()
        .map(|(key, value)| {
            Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|e| build_error("Tag", e))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tags::builder().set_items(Some(items)).build())
}

fn build_distribution_config(spec: &DistributionSpec) -> Result<DistributionConfig> {
    let origins = Origins::builder()
        .quantity(1)
        .items(build_origin(spec)?)
        .build()
        .map_err(|e| build_error("Origins", e))?;

    let mut config = DistributionConfig::builder()
        .caller_reference(format!("{}-{}", spec.tag, uuid::Uuid::new_v4()))
        .comment(&spec.comment)
        .enabled(true)
        .origins(origins)
        .default_cache_behavior(build_cache_behavior(spec.origin_kind)?)
        .price_class(PriceClass::PriceClass100)
        .http_version(HttpVersion::Http2)
        .is_ipv6_enabled(true)
        .set_default_root_object(spec.default_root_object.clone());

    if spec.origin_kind == OriginKind::StaticSite {
        config = config.custom_error_responses(spa_error_responses()?);
    }

    config
        .build()
        .map_err(|e| build_error("DistributionConfig", e))
}

impl AwsProvider {
    /// Current ETag of a distribution, required by update and delete
    async fn distribution_etag(&self, id: &str) -> Result<String> {
        let response = self
            .cloudfront
            .get_distribution()
            .id(id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "GetDistribution", id))?;
        response
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| missing("GetDistribution", "etag"))
    }

    async fn distribution_tag(&self, arn: &str) -> Result<Option<ResourceTag>> {
        let response = self
            .cloudfront
            .list_tags_for_resource()
            .resource(arn)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "ListTagsForResource", arn))?;

        Ok(response.tags().and_then(|tags| {
            ResourceTag::from_pairs(
                tags.items()
                    .iter()
                    .map(|t| (t.key(), t.value().unwrap_or_default())),
            )
        }))
    }
}

#[async_trait]
impl Cdn for AwsProvider {
    async fn find_distribution(&self, tag: &ResourceTag) -> Result<Option<DistributionInfo>> {
        let mut marker: Option<String> = None;

        loop {
            let response = self
                .cloudfront
                .list_distributions()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "ListDistributions", &tag.to_string()))?;

            let Some(list) = response.distribution_list() else {
                return Ok(None);
            };

            for summary in list.items() {
                if self.distribution_tag(summary.arn()).await?.as_ref() == Some(tag) {
                    tracing::debug!("Found distribution {} for {}", summary.id(), tag);
                    return Ok(Some(DistributionInfo {
                        id: summary.id().to_string(),
                        arn: summary.arn().to_string(),
                        domain_name: summary.domain_name().to_string(),
                        enabled: summary.enabled(),
                        status: summary.status().to_string(),
                    }));
                }
            }

            if !list.is_truncated() {
                return Ok(None);
            }
            match list.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => return Ok(None),
            }
        }
    }

    async fn create_distribution(&self, spec: &DistributionSpec) -> Result<DistributionInfo> {
        let with_tags = DistributionConfigWithTags::builder()
            .distribution_config(build_distribution_config(spec)?)
            .tags(build_tags(&spec.tag)?)
            .build();

        let response = self
            .cloudfront
            .create_distribution_with_tags()
            .distribution_config_with_tags(with_tags)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "CreateDistributionWithTags", &spec.tag.to_string()))?;

        let distribution = response
            .distribution()
            .ok_or_else(|| missing("CreateDistributionWithTags", "distribution"))?;

        tracing::info!(
            "Created distribution {} ({}) for {}",
            distribution.id(),
            distribution.domain_name(),
            spec.tag
        );

        Ok(DistributionInfo {
            id: distribution.id().to_string(),
            arn: distribution.arn().to_string(),
            domain_name: distribution.domain_name().to_string(),
            enabled: true,
            status: distribution.status().to_string(),
        })
    }

    async fn get_distribution(&self, id: &str) -> Result<Option<DistributionInfo>> {
        match self.cloudfront.get_distribution().id(id).send().await {
            Ok(response) => {
                let distribution = response
                    .distribution()
                    .ok_or_else(|| missing("GetDistribution", "distribution"))?;
                Ok(Some(DistributionInfo {
                    id: distribution.id().to_string(),
                    arn: distribution.arn().to_string(),
                    domain_name: distribution.domain_name().to_string(),
                    enabled: distribution
                        .distribution_config()
                        .map(|c| c.enabled())
                        .unwrap_or(false),
                    status: distribution.status().to_string(),
                }))
            }
            Err(e) => match map_sdk_error(e, "GetDistribution", id) {
                CloudError::ResourceNotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn disable_distribution(&self, id: &str) -> Result<()> {
        let response = self
            .cloudfront
            .get_distribution_config()
            .id(id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "GetDistributionConfig", id))?;

        let etag = response
            .e_tag()
            .ok_or_else(|| missing("GetDistributionConfig", "etag"))?;
        let mut config = response
            .distribution_config()
            .cloned()
            .ok_or_else(|| missing("GetDistributionConfig", "distribution_config"))?;

        if !config.enabled {
            tracing::debug!("Distribution {} is already disabled", id);
            return Ok(());
        }
        config.enabled = false;

        self.cloudfront
            .update_distribution()
            .id(id)
            .if_match(etag)
            .distribution_config(config)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "UpdateDistribution", id))?;

        tracing::info!("Disabled distribution {}", id);
        Ok(())
    }

    async fn wait_until_deployed(&self, id: &str) -> Result<()> {
        self.cloudfront
            .wait_until_distribution_deployed()
            .id(id)
            .wait(self.wait.distribution)
            .await
            .map_err(|e| {
                CloudError::Timeout(format!(
                    "deployment of distribution {}: {}",
                    id,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn delete_distribution(&self, id: &str) -> Result<()> {
        let etag = self.distribution_etag(id).await?;
        self.cloudfront
            .delete_distribution()
            .id(id)
            .if_match(etag)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "DeleteDistribution", id))?;
        tracing::info!("Deleted distribution {}", id);
        Ok(())
    }

    async fn find_origin_access_control(
        &self,
        name: &str,
    ) -> Result<Option<OriginAccessControlInfo>> {
        let mut marker: Option<String> = None;

        loop {
            let response = self
                .cloudfront
                .list_origin_access_controls()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "ListOriginAccessControls", name))?;

            let Some(list) = response.origin_access_control_list() else {
                return Ok(None);
            };

            if let Some(found) = list.items().iter().find(|s| s.name() == name) {
                return Ok(Some(OriginAccessControlInfo {
                    id: found.id().to_string(),
                    name: found.name().to_string(),
                }));
            }

            if !list.is_truncated() {
                return Ok(None);
            }
            match list.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => return Ok(None),
            }
        }
    }

    async fn create_origin_access_control(
        &self,
        spec: &OriginAccessControlSpec,
    ) -> Result<OriginAccessControlInfo> {
        let config = OriginAccessControlConfig::builder()
            .name(&spec.name)
            .description(&spec.description)
            .signing_protocol(OriginAccessControlSigningProtocols::Sigv4)
            .signing_behavior(OriginAccessControlSigningBehaviors::Always)
            .origin_access_control_origin_type(OriginAccessControlOriginTypes::S3)
            .build()
            .map_err(|e| build_error("OriginAccessControlConfig", e))?;

        let response = self
            .cloudfront
            .create_origin_access_control()
            .origin_access_control_config(config)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "CreateOriginAccessControl", &spec.name))?;

        let oac = response
            .origin_access_control()
            .ok_or_else(|| missing("CreateOriginAccessControl", "origin_access_control"))?;

        tracing::info!("Created origin-access control {} ({})", spec.name, oac.id());
        Ok(OriginAccessControlInfo {
            id: oac.id().to_string(),
            name: spec.name.clone(),
        })
    }

    async fn delete_origin_access_control(&self, id: &str) -> Result<()> {
        let response = self
            .cloudfront
            .get_origin_access_control()
            .id(id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "GetOriginAccessControl", id))?;
        let etag = response
            .e_tag()
            .ok_or_else(|| missing("GetOriginAccessControl", "etag"))?;

        self.cloudfront
            .delete_origin_access_control()
            .id(id)
            .if_match(etag)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "DeleteOriginAccessControl", id))?;
        tracing::info!("Deleted origin-access control {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: OriginKind) -> DistributionSpec {
        DistributionSpec {
            tag: ResourceTag::new("acme-dev", "app"),
            comment: "airbrx acme-dev app".to_string(),
            origin_domain: "acme-dev-airbrx-app.s3.us-west-2.amazonaws.com".to_string(),
            origin_kind: kind,
            origin_access_control_id: Some("E2OAC".to_string()),
            default_root_object: Some("index.html".to_string()),
        }
    }

    #[test]
    fn test_static_site_config() {
        let config = build_distribution_config(&spec(OriginKind::StaticSite)).unwrap();
        assert!(config.enabled());
        assert_eq!(config.default_root_object(), Some("index.html"));
        let origin = &config.origins().unwrap().items()[0];
        assert_eq!(origin.origin_access_control_id(), Some("E2OAC"));
        assert_eq!(config.custom_error_responses().unwrap().quantity(), 2);
    }

    #[test]
    fn test_static_site_requires_oac() {
        let mut spec = spec(OriginKind::StaticSite);
        spec.origin_access_control_id = None;
        assert!(matches!(
            build_distribution_config(&spec),
            Err(CloudError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_function_url_behavior_forwards_all_methods() {
        let behavior = build_cache_behavior(OriginKind::FunctionUrl).unwrap();
        assert_eq!(behavior.allowed_methods().unwrap().quantity(), 7);
        assert_eq!(
            behavior.cache_policy_id(),
            Some(airbrx_cloud::resource::CACHING_DISABLED_POLICY_ID)
        );
    }

    #[test]
    fn test_tags_carry_both_keys() {
        let tags = build_tags(&ResourceTag::new("acme-dev", "gateway")).unwrap();
        let pairs: Vec<_> = tags
            .items()
            .iter()
            .map(|t| (t.key(), t.value().unwrap_or_default()))
            .collect();
        assert_eq!(
            ResourceTag::from_pairs(pairs),
            Some(ResourceTag::new("acme-dev", "gateway"))
        );
    }
}
