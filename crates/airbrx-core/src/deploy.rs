//! The nine-phase deployment pipeline
//!
//! ```text
//!  1 storage         admin / gateway / app buckets
//!  2 identity        one role per function
//!  3 artifacts       three packages + app assets
//!  4 compute         api ─▶ gateway (api URL, admin token) ─▶ log-summary
//!  5 edge            api + gateway distributions ─▶ gateway.fqdn
//!  6 compute-pass-2  api configuration patched with both CDN domains
//!  7 static-site     assets, config.json, OAC, app distribution, bucket policy
//!  8 seeding         admin token record, tenant config + rules
//!  9 validation      health probes (non-fatal)
//! ```

use crate::environment::{
    ApiPass, EnvironmentDocument, api_environment, gateway_environment, log_summary_environment,
};
use crate::error::{DeployError, Result};
use crate::health::{Endpoint, HealthProbe, HealthReport, check_endpoints};
use crate::naming::{Component, ResourceNames};
use crate::pipeline::{
    DeploymentResult, Orchestrator, Phase, Pipeline, ProgressObserver, Step, StepOutput,
};
use crate::policy::{app_bucket_policy, function_policy, lambda_trust_policy};
use crate::reconcile::{
    ensure_bucket, ensure_distribution, ensure_function, ensure_function_url,
    ensure_origin_access_control, ensure_role, patch_function_configuration,
};
use crate::registry::{ArtifactKey, ArtifactRegistry};
use crate::seed::{CacheRules, TenantConfig};
use crate::source::ArtifactSource;
use airbrx_cloud::{
    Action, ActionType, BucketSpec, CloudProvider, DistributionSpec, FunctionSpec,
    OriginAccessControlSpec, OriginKind, PublicAccessBlock, ResourceKind, ResourceTag, RoleSpec,
    StateManager, resource::origin_domain_from_url,
};
use airbrx_config::{DeploymentConfig, StoredToken};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const FUNCTION_RUNTIME: &str = "nodejs20.x";
pub const FUNCTION_HANDLER: &str = "index.handler";

/// Memory (MB) and timeout (s) of a function component
fn function_size(component: Component) -> (i32, i32) {
    match component {
        Component::Gateway => (1024, 60),
        Component::LogSummary => (512, 300),
        _ => (512, 30),
    }
}

/// Everything a step may read while executing
pub struct DeployContext {
    pub provider: Arc<dyn CloudProvider>,
    pub config: DeploymentConfig,
    pub names: ResourceNames,
    pub source: Arc<dyn ArtifactSource>,
    pub probe: Arc<dyn HealthProbe>,
    pub token: StoredToken,
    pub account_id: String,
    health: Mutex<Option<HealthReport>>,
}

impl DeployContext {
    /// Verify credentials and build the context. Fails before any resource
    /// is touched when the provider cannot authenticate.
    pub async fn connect(
        provider: Arc<dyn CloudProvider>,
        config: DeploymentConfig,
        source: Arc<dyn ArtifactSource>,
        probe: Arc<dyn HealthProbe>,
        token: StoredToken,
    ) -> Result<Self> {
        config.validate()?;

        let auth = provider.check_auth().await?;
        let account_id = match (auth.authenticated, auth.account_id) {
            (true, Some(account_id)) => account_id,
            (_, _) => {
                return Err(DeployError::NotAuthenticated(
                    auth.error.unwrap_or_else(|| "no account id".to_string()),
                ));
            }
        };
        tracing::info!(
            "Deploying {} to account {} ({}) via {}",
            config.prefix,
            account_id,
            config.region,
            provider.name()
        );

        Ok(Self {
            names: ResourceNames::new(&config.prefix),
            provider,
            config,
            source,
            probe,
            token,
            account_id,
            health: Mutex::new(None),
        })
    }

    fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    fn store_health(&self, report: HealthReport) {
        let mut slot = self.health.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(report);
    }

    fn take_health(&self) -> Option<HealthReport> {
        self.health.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    fn function_spec(
        &self,
        component: Component,
        role_arn: &str,
        environment: EnvironmentDocument,
    ) -> Result<FunctionSpec> {
        let name = self.names.function(component).ok_or_else(|| {
            DeployError::InvalidPipeline(format!("{} is not a function component", component))
        })?;
        let (memory_mb, timeout_secs) = function_size(component);
        Ok(FunctionSpec {
            name: name.to_string(),
            description: format!("airbrx {} ({})", component, self.config.prefix),
            runtime: FUNCTION_RUNTIME.to_string(),
            handler: FUNCTION_HANDLER.to_string(),
            memory_mb,
            timeout_secs,
            role_arn: role_arn.to_string(),
            environment: environment.into_vars(),
        })
    }

    fn distribution_arn(&self, id: &str) -> String {
        format!("arn:aws:cloudfront::{}:distribution/{}", self.account_id, id)
    }
}

// ---------------------------------------------------------------------------
// 1. storage

#[derive(Debug, Clone, Copy)]
enum Storage {
    Admin,
    Gateway,
    App,
}

struct BucketStep {
    storage: Storage,
    produces: [ArtifactKey; 1],
}

impl BucketStep {
    fn new(storage: Storage) -> Self {
        let key = match storage {
            Storage::Admin => ArtifactKey::AdminBucket,
            Storage::Gateway => ArtifactKey::GatewayBucket,
            Storage::App => ArtifactKey::AppBucket,
        };
        Self {
            storage,
            produces: [key],
        }
    }
}

#[async_trait]
impl Step<DeployContext> for BucketStep {
    fn name(&self) -> &str {
        match self.storage {
            Storage::Admin => "admin-storage",
            Storage::Gateway => "gateway-storage",
            Storage::App => "app-storage",
        }
    }

    fn produces(&self) -> &[ArtifactKey] {
        &self.produces
    }

    async fn execute(&self, ctx: &DeployContext, _registry: &ArtifactRegistry) -> Result<StepOutput> {
        let (name, public_access) = match self.storage {
            Storage::Admin => (&ctx.names.admin_bucket, PublicAccessBlock::all_blocked()),
            Storage::Gateway => (&ctx.names.gateway_bucket, PublicAccessBlock::all_blocked()),
            // The CDN-scoped bucket policy is attached in the static-site phase
            Storage::App => (&ctx.names.app_bucket, PublicAccessBlock::allow_bucket_policy()),
        };
        let spec = BucketSpec {
            name: name.clone(),
            region: ctx.config.region.clone(),
            public_access,
            versioning: true,
        };
        let bucket = ensure_bucket(ctx.provider(), &spec).await?;
        Ok(StepOutput::new()
            .artifact(self.produces[0], bucket.handle)
            .action(bucket.action))
    }
}

// ---------------------------------------------------------------------------
// 2. identity

struct RoleStep {
    component: Component,
    requires: Vec<ArtifactKey>,
    produces: [ArtifactKey; 1],
}

impl RoleStep {
    fn new(component: Component) -> Self {
        let (requires, key) = match component {
            Component::Api => (vec![ArtifactKey::AdminBucket], ArtifactKey::ApiRoleArn),
            Component::Gateway => (
                vec![ArtifactKey::AdminBucket, ArtifactKey::GatewayBucket],
                ArtifactKey::GatewayRoleArn,
            ),
            _ => (vec![ArtifactKey::AdminBucket], ArtifactKey::LogSummaryRoleArn),
        };
        Self {
            component,
            requires,
            produces: [key],
        }
    }
}

#[async_trait]
impl Step<DeployContext> for RoleStep {
    fn name(&self) -> &str {
        match self.component {
            Component::Api => "api-role",
            Component::Gateway => "gateway-role",
            _ => "log-summary-role",
        }
    }

    fn requires(&self) -> &[ArtifactKey] {
        &self.requires
    }

    fn produces(&self) -> &[ArtifactKey] {
        &self.produces
    }

    async fn execute(&self, ctx: &DeployContext, _registry: &ArtifactRegistry) -> Result<StepOutput> {
        let function = ctx.names.function(self.component).ok_or_else(|| {
            DeployError::InvalidPipeline(format!("no role for {}", self.component))
        })?;
        let policy = function_policy(
            self.component,
            &ctx.names,
            &ctx.config.region,
            &ctx.account_id,
        )
        .ok_or_else(|| DeployError::InvalidPipeline(format!("no policy for {}", self.component)))?;

        let spec = RoleSpec {
            name: ResourceNames::role_for(function),
            trust_policy: lambda_trust_policy(),
            policy_name: ResourceNames::policy_for(function),
            policy,
        };
        let role = ensure_role(ctx.provider(), &spec).await?;
        Ok(StepOutput::new()
            .artifact(self.produces[0], role.handle.arn)
            .action(role.action))
    }
}

// ---------------------------------------------------------------------------
// 3. artifacts

struct FetchStep {
    component: Component,
    produces: [ArtifactKey; 1],
}

impl FetchStep {
    fn new(component: Component) -> Self {
        let key = match component {
            Component::Api => ArtifactKey::ApiPackage,
            Component::Gateway => ArtifactKey::GatewayPackage,
            Component::LogSummary => ArtifactKey::LogSummaryPackage,
            Component::App => ArtifactKey::AppAssets,
        };
        Self {
            component,
            produces: [key],
        }
    }
}

#[async_trait]
impl Step<DeployContext> for FetchStep {
    fn name(&self) -> &str {
        match self.component {
            Component::Api => "api-package",
            Component::Gateway => "gateway-package",
            Component::LogSummary => "log-summary-package",
            Component::App => "app-assets",
        }
    }

    fn produces(&self) -> &[ArtifactKey] {
        &self.produces
    }

    async fn execute(&self, ctx: &DeployContext, _registry: &ArtifactRegistry) -> Result<StepOutput> {
        let path = ctx.source.fetch(self.component).await?;
        tracing::info!("{} artifact from {}: {}", self.component, ctx.source.describe(), path.display());
        Ok(StepOutput::new().artifact(self.produces[0], path.to_string_lossy()))
    }
}

// ---------------------------------------------------------------------------
// 4. compute, pass 1

struct FunctionStep {
    component: Component,
    requires: Vec<ArtifactKey>,
    produces: Vec<ArtifactKey>,
}

impl FunctionStep {
    fn new(component: Component) -> Self {
        let (requires, produces) = match component {
            Component::Api => (
                vec![ArtifactKey::AdminBucket, ArtifactKey::ApiRoleArn, ArtifactKey::ApiPackage],
                vec![ArtifactKey::ApiFunctionArn, ArtifactKey::ApiFunctionUrl],
            ),
            Component::Gateway => (
                vec![
                    ArtifactKey::GatewayBucket,
                    ArtifactKey::GatewayRoleArn,
                    ArtifactKey::GatewayPackage,
                    ArtifactKey::ApiFunctionUrl,
                ],
                vec![ArtifactKey::GatewayFunctionArn, ArtifactKey::GatewayFunctionUrl],
            ),
            _ => (
                vec![
                    ArtifactKey::AdminBucket,
                    ArtifactKey::LogSummaryRoleArn,
                    ArtifactKey::LogSummaryPackage,
                ],
                vec![ArtifactKey::LogSummaryFunctionArn],
            ),
        };
        Self {
            component,
            requires,
            produces,
        }
    }
}

#[async_trait]
impl Step<DeployContext> for FunctionStep {
    fn name(&self) -> &str {
        match self.component {
            Component::Api => "api-function",
            Component::Gateway => "gateway-function",
            _ => "log-summary-function",
        }
    }

    fn requires(&self) -> &[ArtifactKey] {
        &self.requires
    }

    fn produces(&self) -> &[ArtifactKey] {
        &self.produces
    }

    async fn execute(&self, ctx: &DeployContext, registry: &ArtifactRegistry) -> Result<StepOutput> {
        let step = self.name();
        let (role_key, package_key) = match self.component {
            Component::Api => (ArtifactKey::ApiRoleArn, ArtifactKey::ApiPackage),
            Component::Gateway => (ArtifactKey::GatewayRoleArn, ArtifactKey::GatewayPackage),
            _ => (ArtifactKey::LogSummaryRoleArn, ArtifactKey::LogSummaryPackage),
        };
        let role_arn = registry.require(step, role_key)?;
        let code = tokio::fs::read(registry.require(step, package_key)?).await?;

        let environment = match self.component {
            Component::Api => api_environment(&ctx.config, &ctx.names, ApiPass::Initial),
            Component::Gateway => gateway_environment(
                &ctx.config,
                &ctx.names,
                registry.require(step, ArtifactKey::ApiFunctionUrl)?,
                &ctx.token.record.token,
            ),
            _ => log_summary_environment(&ctx.config, &ctx.names),
        };
        let spec = ctx.function_spec(self.component, role_arn, environment)?;

        let function = ensure_function(ctx.provider(), &spec, &code).await?;
        let mut output = StepOutput::new()
            .artifact(self.produces[0], function.handle.arn)
            .action(function.action);

        if let Some(url_key) = self.produces.get(1) {
            let url = ensure_function_url(ctx.provider(), &spec.name).await?;
            output = output.artifact(*url_key, url.handle).action(url.action);
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// 5. edge

struct EdgeStep {
    component: Component,
    requires: [ArtifactKey; 1],
    produces: Vec<ArtifactKey>,
}

impl EdgeStep {
    fn new(component: Component) -> Self {
        match component {
            Component::Gateway => Self {
                component,
                requires: [ArtifactKey::GatewayFunctionUrl],
                produces: vec![
                    ArtifactKey::GatewayCdnDomain,
                    ArtifactKey::GatewayDistributionId,
                    ArtifactKey::GatewayFqdn,
                ],
            },
            _ => Self {
                component: Component::Api,
                requires: [ArtifactKey::ApiFunctionUrl],
                produces: vec![ArtifactKey::ApiCdnDomain, ArtifactKey::ApiDistributionId],
            },
        }
    }
}

#[async_trait]
impl Step<DeployContext> for EdgeStep {
    fn name(&self) -> &str {
        match self.component {
            Component::Gateway => "gateway-edge",
            _ => "api-edge",
        }
    }

    fn requires(&self) -> &[ArtifactKey] {
        &self.requires
    }

    fn produces(&self) -> &[ArtifactKey] {
        &self.produces
    }

    async fn execute(&self, ctx: &DeployContext, registry: &ArtifactRegistry) -> Result<StepOutput> {
        let url = registry.require(self.name(), self.requires[0])?;
        let tag = ResourceTag::new(&ctx.config.prefix, self.component.as_str());
        let spec = DistributionSpec {
            comment: tag.marker(),
            tag,
            origin_domain: origin_domain_from_url(url),
            origin_kind: OriginKind::FunctionUrl,
            origin_access_control_id: None,
            default_root_object: None,
        };
        let distribution = ensure_distribution(ctx.provider(), &spec).await?;
        let domain = distribution.handle.domain_name;

        let mut output = StepOutput::new()
            .artifact(self.produces[0], domain.clone())
            .artifact(self.produces[1], distribution.handle.id)
            .action(distribution.action);
        if let Some(fqdn_key) = self.produces.get(2) {
            output = output.artifact(*fqdn_key, domain);
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// 6. compute, pass 2

struct ApiPatchStep;

const API_PATCH_REQUIRES: [ArtifactKey; 3] = [
    ArtifactKey::ApiRoleArn,
    ArtifactKey::ApiCdnDomain,
    ArtifactKey::GatewayCdnDomain,
];

#[async_trait]
impl Step<DeployContext> for ApiPatchStep {
    fn name(&self) -> &str {
        "api-configuration"
    }

    fn requires(&self) -> &[ArtifactKey] {
        &API_PATCH_REQUIRES
    }

    async fn execute(&self, ctx: &DeployContext, registry: &ArtifactRegistry) -> Result<StepOutput> {
        let step = self.name();
        let environment = api_environment(
            &ctx.config,
            &ctx.names,
            ApiPass::Full {
                api_cdn_domain: registry.require(step, ArtifactKey::ApiCdnDomain)?,
                gateway_cdn_domain: registry.require(step, ArtifactKey::GatewayCdnDomain)?,
            },
        );
        let role_arn = registry.require(step, ArtifactKey::ApiRoleArn)?;
        let spec = ctx.function_spec(Component::Api, role_arn, environment)?;
        let action = patch_function_configuration(ctx.provider(), &spec).await?;
        Ok(StepOutput::new().action(action))
    }
}

// ---------------------------------------------------------------------------
// 7. static site

/// Content type for an asset, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Relative object keys and paths of every file below `root`
pub fn collect_assets(root: &Path) -> Result<Vec<(String, std::path::PathBuf)>> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&root.to_string_lossy()));
    let entries = glob::glob(&pattern)
        .map_err(|e| DeployError::Source(format!("invalid asset pattern: {}", e)))?;

    let mut assets = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DeployError::Source(e.to_string()))?;
        if !path.is_file() {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .map_err(|e| DeployError::Source(e.to_string()))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        assets.push((key, path));
    }
    assets.sort();
    Ok(assets)
}

struct SyncAssetsStep;

const SYNC_REQUIRES: [ArtifactKey; 4] = [
    ArtifactKey::AppBucket,
    ArtifactKey::AppAssets,
    ArtifactKey::ApiCdnDomain,
    ArtifactKey::GatewayCdnDomain,
];

#[async_trait]
impl Step<DeployContext> for SyncAssetsStep {
    fn name(&self) -> &str {
        "app-sync"
    }

    fn requires(&self) -> &[ArtifactKey] {
        &SYNC_REQUIRES
    }

    async fn execute(&self, ctx: &DeployContext, registry: &ArtifactRegistry) -> Result<StepOutput> {
        let step = self.name();
        let bucket = registry.require(step, ArtifactKey::AppBucket)?;
        let root = Path::new(registry.require(step, ArtifactKey::AppAssets)?);

        let assets = collect_assets(root)?;
        for (key, path) in &assets {
            let body = tokio::fs::read(path).await?;
            ctx.provider()
                .put_object(bucket, key, body, content_type_for(path))
                .await?;
        }
        tracing::info!("Synced {} assets to {}", assets.len(), bucket);

        // Runtime configuration read by the dashboard at startup
        let runtime = serde_json::json!({
            "apiBaseUrl": format!("https://{}", registry.require(step, ArtifactKey::ApiCdnDomain)?),
            "gatewayUrl": format!("https://{}", registry.require(step, ArtifactKey::GatewayCdnDomain)?),
            "region": ctx.config.region,
            "tenantPrefix": ctx.config.prefix,
        });
        ctx.provider()
            .put_object(
                bucket,
                "config.json",
                serde_json::to_vec_pretty(&runtime)?,
                "application/json",
            )
            .await?;

        Ok(StepOutput::new().action(Action::new(
            ActionType::Update,
            ResourceKind::Object,
            bucket,
            format!("{} assets + config.json", assets.len()),
        )))
    }
}

struct OacStep;

#[async_trait]
impl Step<DeployContext> for OacStep {
    fn name(&self) -> &str {
        "app-oac"
    }

    fn produces(&self) -> &[ArtifactKey] {
        &[ArtifactKey::AppOacId]
    }

    async fn execute(&self, ctx: &DeployContext, _registry: &ArtifactRegistry) -> Result<StepOutput> {
        let spec = OriginAccessControlSpec {
            name: ctx.names.app_oac.clone(),
            description: format!("airbrx {} app bucket", ctx.config.prefix),
        };
        let oac = ensure_origin_access_control(ctx.provider(), &spec).await?;
        Ok(StepOutput::new()
            .artifact(ArtifactKey::AppOacId, oac.handle.id)
            .action(oac.action))
    }
}

struct AppEdgeStep;

#[async_trait]
impl Step<DeployContext> for AppEdgeStep {
    fn name(&self) -> &str {
        "app-edge"
    }

    fn requires(&self) -> &[ArtifactKey] {
        &[ArtifactKey::AppBucket, ArtifactKey::AppOacId]
    }

    fn produces(&self) -> &[ArtifactKey] {
        &[ArtifactKey::AppCdnDomain, ArtifactKey::AppDistributionId]
    }

    async fn execute(&self, ctx: &DeployContext, registry: &ArtifactRegistry) -> Result<StepOutput> {
        let bucket = registry.require(self.name(), ArtifactKey::AppBucket)?;
        let oac = registry.require(self.name(), ArtifactKey::AppOacId)?;
        let tag = ResourceTag::new(&ctx.config.prefix, Component::App.as_str());
        let spec = DistributionSpec {
            comment: tag.marker(),
            tag,
            origin_domain: format!("{}.s3.{}.amazonaws.com", bucket, ctx.config.region),
            origin_kind: OriginKind::StaticSite,
            origin_access_control_id: Some(oac.to_string()),
            default_root_object: Some("index.html".to_string()),
        };
        let distribution = ensure_distribution(ctx.provider(), &spec).await?;
        Ok(StepOutput::new()
            .artifact(ArtifactKey::AppCdnDomain, distribution.handle.domain_name)
            .artifact(ArtifactKey::AppDistributionId, distribution.handle.id)
            .action(distribution.action))
    }
}

struct AppBucketPolicyStep;

#[async_trait]
impl Step<DeployContext> for AppBucketPolicyStep {
    fn name(&self) -> &str {
        "app-bucket-policy"
    }

    fn requires(&self) -> &[ArtifactKey] {
        &[ArtifactKey::AppBucket, ArtifactKey::AppDistributionId]
    }

    async fn execute(&self, ctx: &DeployContext, registry: &ArtifactRegistry) -> Result<StepOutput> {
        let bucket = registry.require(self.name(), ArtifactKey::AppBucket)?;
        let id = registry.require(self.name(), ArtifactKey::AppDistributionId)?;
        let policy = app_bucket_policy(bucket, &ctx.distribution_arn(id));
        ctx.provider().put_bucket_policy(bucket, &policy).await?;
        Ok(StepOutput::new().action(Action::new(
            ActionType::Update,
            ResourceKind::BucketPolicy,
            bucket,
            format!("read access for distribution {}", id),
        )))
    }
}

// ---------------------------------------------------------------------------
// 8. seeding

/// Upload `body` unless the key already exists
async fn put_if_absent(
    ctx: &DeployContext,
    bucket: &str,
    key: &str,
    body: Vec<u8>,
) -> Result<Action> {
    if ctx.provider().object_exists(bucket, key).await? {
        tracing::info!("{}/{} exists, leaving it untouched", bucket, key);
        return Ok(Action::new(
            ActionType::NoOp,
            ResourceKind::Object,
            key,
            "already present",
        ));
    }
    ctx.provider()
        .put_object(bucket, key, body, "application/json")
        .await?;
    tracing::info!("Uploaded {}/{}", bucket, key);
    Ok(Action::new(ActionType::Create, ResourceKind::Object, key, bucket))
}

struct AdminTokenStep;

#[async_trait]
impl Step<DeployContext> for AdminTokenStep {
    fn name(&self) -> &str {
        "admin-token"
    }

    fn requires(&self) -> &[ArtifactKey] {
        &[ArtifactKey::AdminBucket]
    }

    fn produces(&self) -> &[ArtifactKey] {
        &[ArtifactKey::AdminPatKey]
    }

    async fn execute(&self, ctx: &DeployContext, registry: &ArtifactRegistry) -> Result<StepOutput> {
        let bucket = registry.require(self.name(), ArtifactKey::AdminBucket)?;
        let key = ctx.token.record.object_key();
        let action = put_if_absent(ctx, bucket, &key, ctx.token.bytes.clone()).await?;
        Ok(StepOutput::new()
            .artifact(ArtifactKey::AdminPatKey, key)
            .action(action))
    }
}

struct TenantStep;

#[async_trait]
impl Step<DeployContext> for TenantStep {
    fn name(&self) -> &str {
        "tenant"
    }

    fn requires(&self) -> &[ArtifactKey] {
        &[ArtifactKey::AdminBucket, ArtifactKey::GatewayFqdn]
    }

    fn produces(&self) -> &[ArtifactKey] {
        &[ArtifactKey::TenantId]
    }

    async fn execute(&self, ctx: &DeployContext, registry: &ArtifactRegistry) -> Result<StepOutput> {
        let bucket = registry.require(self.name(), ArtifactKey::AdminBucket)?;
        let tenant_id = registry.require(self.name(), ArtifactKey::GatewayFqdn)?;

        let config = TenantConfig::new(tenant_id, &ctx.names, &ctx.config.region);
        let rules = CacheRules::defaults(tenant_id);
        let conf_action = put_if_absent(
            ctx,
            bucket,
            &config.object_key(),
            serde_json::to_vec_pretty(&config)?,
        )
        .await?;
        let rules_action = put_if_absent(
            ctx,
            bucket,
            &rules.object_key(),
            serde_json::to_vec_pretty(&rules)?,
        )
        .await?;

        Ok(StepOutput::new()
            .artifact(ArtifactKey::TenantId, tenant_id)
            .action(conf_action)
            .action(rules_action))
    }
}

// ---------------------------------------------------------------------------
// 9. validation

struct HealthStep;

const HEALTH_REQUIRES: [ArtifactKey; 5] = [
    ArtifactKey::ApiFunctionUrl,
    ArtifactKey::GatewayFunctionUrl,
    ArtifactKey::ApiCdnDomain,
    ArtifactKey::GatewayCdnDomain,
    ArtifactKey::AppCdnDomain,
];

/// Public endpoints worth probing once everything is deployed
pub fn health_endpoints(registry: &ArtifactRegistry) -> Vec<Endpoint> {
    let mut endpoints = Vec::new();
    let mut push = |name: &str, key: ArtifactKey, url: fn(&str) -> String| {
        if let Some(value) = registry.get(key) {
            endpoints.push(Endpoint::new(name, url(value)));
        }
    };
    push("api function", ArtifactKey::ApiFunctionUrl, |u| {
        format!("{}/health", u.trim_end_matches('/'))
    });
    push("gateway function", ArtifactKey::GatewayFunctionUrl, |u| {
        format!("{}/health", u.trim_end_matches('/'))
    });
    push("api edge", ArtifactKey::ApiCdnDomain, |d| format!("https://{}/health", d));
    push("gateway edge", ArtifactKey::GatewayCdnDomain, |d| format!("https://{}/health", d));
    push("app edge", ArtifactKey::AppCdnDomain, |d| format!("https://{}/", d));
    endpoints
}

#[async_trait]
impl Step<DeployContext> for HealthStep {
    fn name(&self) -> &str {
        "health"
    }

    fn requires(&self) -> &[ArtifactKey] {
        &HEALTH_REQUIRES
    }

    async fn execute(&self, ctx: &DeployContext, registry: &ArtifactRegistry) -> Result<StepOutput> {
        let report = check_endpoints(ctx.probe.as_ref(), &health_endpoints(registry)).await;
        let mut output = StepOutput::new();
        for endpoint in report.unhealthy() {
            let reason = endpoint
                .error
                .clone()
                .or(endpoint.status.map(|s| format!("HTTP {}", s)))
                .unwrap_or_default();
            output = output.warning(format!("{} ({}) unhealthy: {}", endpoint.name, endpoint.url, reason));
        }
        ctx.store_health(report);
        Ok(output)
    }
}

// ---------------------------------------------------------------------------

/// The full pipeline, in order
pub fn deployment_phases() -> Vec<Phase<DeployContext>> {
    vec![
        Phase::new("storage")
            .step(BucketStep::new(Storage::Admin))
            .step(BucketStep::new(Storage::Gateway))
            .step(BucketStep::new(Storage::App)),
        Phase::new("identity")
            .step(RoleStep::new(Component::Api))
            .step(RoleStep::new(Component::Gateway))
            .step(RoleStep::new(Component::LogSummary)),
        Phase::new("artifacts")
            .step(FetchStep::new(Component::Api))
            .step(FetchStep::new(Component::Gateway))
            .step(FetchStep::new(Component::LogSummary))
            .step(FetchStep::new(Component::App)),
        Phase::new("compute")
            .step(FunctionStep::new(Component::Api))
            .step(FunctionStep::new(Component::Gateway))
            .step(FunctionStep::new(Component::LogSummary)),
        Phase::new("edge")
            .step(EdgeStep::new(Component::Api))
            .step(EdgeStep::new(Component::Gateway)),
        Phase::new("compute-pass-2").step(ApiPatchStep),
        Phase::new("static-site")
            .step(SyncAssetsStep)
            .step(OacStep)
            .step(AppEdgeStep)
            .step(AppBucketPolicyStep),
        Phase::new("seeding").step(AdminTokenStep).step(TenantStep),
        Phase::new("validation").non_fatal().step(HealthStep),
    ]
}

/// Runs a pipeline against one deployment
pub struct Deployer {
    ctx: DeployContext,
    phases: Vec<Phase<DeployContext>>,
    state: Option<StateManager>,
    observer: Option<Box<dyn ProgressObserver>>,
}

impl Deployer {
    pub fn new(ctx: DeployContext) -> Self {
        Self {
            ctx,
            phases: deployment_phases(),
            state: None,
            observer: None,
        }
    }

    /// Replace the phase list (used to stop a run early)
    pub fn with_phases(mut self, phases: Vec<Phase<DeployContext>>) -> Self {
        self.phases = phases;
        self
    }

    /// Snapshot progress and hold the per-prefix lock in this directory
    pub fn with_state(mut self, manager: StateManager) -> Self {
        self.state = Some(manager);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn context(&self) -> &DeployContext {
        &self.ctx
    }

    pub async fn run(self) -> Result<DeploymentResult> {
        let Deployer {
            ctx,
            phases,
            state,
            observer,
        } = self;

        let mut orchestrator = Orchestrator::new(Pipeline::new(phases));
        let lock = match state {
            Some(manager) => {
                let lock = manager.acquire_lock().await?;
                orchestrator = orchestrator.with_state(manager, &ctx.config.prefix);
                Some(lock)
            }
            None => None,
        };
        if let Some(observer) = observer {
            orchestrator = orchestrator.with_observer(observer);
        }

        let result = orchestrator.run(&ctx).await;

        if let Some(lock) = lock {
            if let Err(e) = lock.release().await {
                tracing::warn!("Could not release deploy lock: {}", e);
            }
        }

        let mut result = result?;
        result.health = ctx.take_health();
        tracing::info!(
            "Deployment {} finished: {}",
            ctx.config.prefix,
            result.summary()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_is_statically_valid() {
        let pipeline = Pipeline::new(deployment_phases());
        pipeline.validate().unwrap();

        let names: Vec<_> = pipeline.phases().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "storage",
                "identity",
                "artifacts",
                "compute",
                "edge",
                "compute-pass-2",
                "static-site",
                "seeding",
                "validation"
            ]
        );
        assert!(pipeline.phases().iter().take(8).all(|p| p.fatal));
        assert!(!pipeline.phases()[8].fatal);
    }

    #[test]
    fn test_gateway_function_depends_on_api_url() {
        let step = FunctionStep::new(Component::Gateway);
        assert!(step.requires().contains(&ArtifactKey::ApiFunctionUrl));
        let log_summary = FunctionStep::new(Component::LogSummary);
        assert_eq!(log_summary.produces(), &[ArtifactKey::LogSummaryFunctionArn]);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("assets/app.JS")), "application/javascript");
        assert_eq!(content_type_for(Path::new("LICENSE")), "application/octet-stream");
    }

    #[test]
    fn test_collect_assets_uses_relative_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>").unwrap();
        std::fs::write(dir.path().join("assets/app.js"), "x").unwrap();

        let keys: Vec<_> = collect_assets(dir.path())
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["assets/app.js", "index.html"]);
    }

    #[test]
    fn test_health_endpoints() {
        let mut registry = ArtifactRegistry::new();
        registry
            .insert(ArtifactKey::ApiFunctionUrl, "https://abc.lambda-url.us-west-2.on.aws/")
            .unwrap();
        registry
            .insert(ArtifactKey::AppCdnDomain, "d3.cloudfront.net")
            .unwrap();

        let urls: Vec<_> = health_endpoints(&registry).into_iter().map(|e| e.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://abc.lambda-url.us-west-2.on.aws/health",
                "https://d3.cloudfront.net/"
            ]
        );
    }
}
