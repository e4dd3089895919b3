//! Artifact registry
//!
//! Values discovered during a run (bucket names, role ARNs, function URLs,
//! CDN domains) keyed by a logical name. Each step declares the keys it
//! reads and writes; the registry refuses to change a value once written.

use crate::error::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArtifactKey {
    AdminBucket,
    GatewayBucket,
    AppBucket,
    ApiRoleArn,
    GatewayRoleArn,
    LogSummaryRoleArn,
    ApiPackage,
    GatewayPackage,
    LogSummaryPackage,
    AppAssets,
    ApiFunctionArn,
    ApiFunctionUrl,
    GatewayFunctionArn,
    GatewayFunctionUrl,
    LogSummaryFunctionArn,
    ApiCdnDomain,
    ApiDistributionId,
    GatewayCdnDomain,
    GatewayDistributionId,
    GatewayFqdn,
    AppOacId,
    AppCdnDomain,
    AppDistributionId,
    AdminPatKey,
    TenantId,
}

impl ArtifactKey {
    pub const ALL: [ArtifactKey; 25] = [
        ArtifactKey::AdminBucket,
        ArtifactKey::GatewayBucket,
        ArtifactKey::AppBucket,
        ArtifactKey::ApiRoleArn,
        ArtifactKey::GatewayRoleArn,
        ArtifactKey::LogSummaryRoleArn,
        ArtifactKey::ApiPackage,
        ArtifactKey::GatewayPackage,
        ArtifactKey::LogSummaryPackage,
        ArtifactKey::AppAssets,
        ArtifactKey::ApiFunctionArn,
        ArtifactKey::ApiFunctionUrl,
        ArtifactKey::GatewayFunctionArn,
        ArtifactKey::GatewayFunctionUrl,
        ArtifactKey::LogSummaryFunctionArn,
        ArtifactKey::ApiCdnDomain,
        ArtifactKey::ApiDistributionId,
        ArtifactKey::GatewayCdnDomain,
        ArtifactKey::GatewayDistributionId,
        ArtifactKey::GatewayFqdn,
        ArtifactKey::AppOacId,
        ArtifactKey::AppCdnDomain,
        ArtifactKey::AppDistributionId,
        ArtifactKey::AdminPatKey,
        ArtifactKey::TenantId,
    ];

    /// Dotted logical name
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKey::AdminBucket => "adminStorage.bucket",
            ArtifactKey::GatewayBucket => "gatewayStorage.bucket",
            ArtifactKey::AppBucket => "app.bucket",
            ArtifactKey::ApiRoleArn => "api.roleArn",
            ArtifactKey::GatewayRoleArn => "gateway.roleArn",
            ArtifactKey::LogSummaryRoleArn => "logSummary.roleArn",
            ArtifactKey::ApiPackage => "api.package",
            ArtifactKey::GatewayPackage => "gateway.package",
            ArtifactKey::LogSummaryPackage => "logSummary.package",
            ArtifactKey::AppAssets => "app.assets",
            ArtifactKey::ApiFunctionArn => "api.functionArn",
            ArtifactKey::ApiFunctionUrl => "api.functionUrl",
            ArtifactKey::GatewayFunctionArn => "gateway.functionArn",
            ArtifactKey::GatewayFunctionUrl => "gateway.functionUrl",
            ArtifactKey::LogSummaryFunctionArn => "logSummary.functionArn",
            ArtifactKey::ApiCdnDomain => "api.cdnDomain",
            ArtifactKey::ApiDistributionId => "api.distributionId",
            ArtifactKey::GatewayCdnDomain => "gateway.cdnDomain",
            ArtifactKey::GatewayDistributionId => "gateway.distributionId",
            ArtifactKey::GatewayFqdn => "gateway.fqdn",
            ArtifactKey::AppOacId => "app.oacId",
            ArtifactKey::AppCdnDomain => "app.cdnDomain",
            ArtifactKey::AppDistributionId => "app.distributionId",
            ArtifactKey::AdminPatKey => "admin.patKey",
            ArtifactKey::TenantId => "tenant.id",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one step, merged into the registry after the step succeeds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactRecord {
    values: BTreeMap<ArtifactKey, String>,
}

impl ArtifactRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: ArtifactKey, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: ArtifactKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    pub fn contains(&self, key: ArtifactKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = ArtifactKey> + '_ {
        self.values.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Append-only store of artifact values for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactRegistry {
    values: BTreeMap<ArtifactKey, String>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ArtifactKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Value of a key a step declared in `requires`
    pub fn require(&self, step: &str, key: ArtifactKey) -> Result<&str> {
        self.get(key).ok_or_else(|| DeployError::MissingArtifact {
            step: step.to_string(),
            key,
        })
    }

    pub fn contains(&self, key: ArtifactKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Insert one value. Re-inserting the same value is a no-op; a different
    /// value is a conflict.
    pub fn insert(&mut self, key: ArtifactKey, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        match self.values.get(&key) {
            Some(existing) if *existing == value => Ok(()),
            Some(existing) => Err(DeployError::ArtifactConflict {
                key,
                existing: existing.clone(),
                new: value,
            }),
            None => {
                tracing::debug!("Artifact {} = {}", key, value);
                self.values.insert(key, value);
                Ok(())
            }
        }
    }

    pub fn merge(&mut self, record: ArtifactRecord) -> Result<()> {
        for (key, value) in record.values {
            self.insert(key, value)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_append_only() {
        let mut registry = ArtifactRegistry::new();
        registry
            .insert(ArtifactKey::ApiCdnDomain, "d1.cloudfront.net")
            .unwrap();
        registry
            .insert(ArtifactKey::ApiCdnDomain, "d1.cloudfront.net")
            .unwrap();

        let err = registry
            .insert(ArtifactKey::ApiCdnDomain, "d2.cloudfront.net")
            .unwrap_err();
        assert!(matches!(err, DeployError::ArtifactConflict { .. }));
        assert_eq!(registry.get(ArtifactKey::ApiCdnDomain), Some("d1.cloudfront.net"));
    }

    #[test]
    fn test_require_reports_step_and_key() {
        let registry = ArtifactRegistry::new();
        match registry.require("gateway-function", ArtifactKey::ApiFunctionUrl) {
            Err(DeployError::MissingArtifact { step, key }) => {
                assert_eq!(step, "gateway-function");
                assert_eq!(key, ArtifactKey::ApiFunctionUrl);
            }
            other => panic!("Expected MissingArtifact, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_record() {
        let mut registry = ArtifactRegistry::new();
        let record = ArtifactRecord::new()
            .with(ArtifactKey::GatewayCdnDomain, "d2.cloudfront.net")
            .with(ArtifactKey::GatewayFqdn, "d2.cloudfront.net");
        registry.merge(record).unwrap();
        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["gateway.cdnDomain", "gateway.fqdn"]);
    }

    #[test]
    fn test_key_names_are_unique() {
        for key in ArtifactKey::ALL {
            assert_eq!(ArtifactKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(ArtifactKey::parse("nope"), None);
    }
}
