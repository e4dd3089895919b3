mod common;

use airbrx_cloud::{ActionType, RunOutcome, StateManager};
use airbrx_core::environment::is_unset;
use airbrx_core::{
    ArtifactKey, ArtifactSource, Component, DeployContext, Deployer, DirectorySource,
    HealthVerdict, ResourceNames, deployment_phases,
};
use async_trait::async_trait;
use common::{AlwaysUp, TestDeployment};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Source whose fetch never completes, like a hung clone
struct StalledSource;

#[async_trait]
impl ArtifactSource for StalledSource {
    fn describe(&self) -> String {
        "stalled".to_string()
    }

    async fn fetch(&self, _component: Component) -> airbrx_core::Result<PathBuf> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_fresh_deploy_produces_every_artifact() {
    let deployment = TestDeployment::new();
    let result = deployment.deploy().await;

    assert_eq!(result.phases.len(), 9);
    for key in ArtifactKey::ALL {
        assert!(result.registry.contains(key), "missing {}", key);
    }
    assert_eq!(
        result.registry.get(ArtifactKey::GatewayFqdn),
        result.registry.get(ArtifactKey::GatewayCdnDomain)
    );
    assert_eq!(
        result.registry.get(ArtifactKey::TenantId),
        result.registry.get(ArtifactKey::GatewayFqdn)
    );
    assert_eq!(result.health.as_ref().unwrap().verdict, HealthVerdict::Healthy);
    assert!(result.warnings().is_empty());

    let summary = result.summary();
    // 3 buckets, 3 roles, 3 functions, 2 URLs, 3 distributions, 1 OAC, 3 seed objects
    assert_eq!(summary.create, 18);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let deployment = TestDeployment::new();
    let first = deployment.deploy().await;

    deployment.provider.clear_calls();
    let second = deployment.deploy().await;

    assert_eq!(deployment.provider.creation_calls(), 0);
    assert_eq!(second.summary().create, 0);
    for key in ArtifactKey::ALL {
        if matches!(
            key,
            ArtifactKey::ApiPackage
                | ArtifactKey::GatewayPackage
                | ArtifactKey::LogSummaryPackage
                | ArtifactKey::AppAssets
        ) {
            continue;
        }
        assert_eq!(first.registry.get(key), second.registry.get(key), "{}", key);
    }
    assert_eq!(deployment.provider.distributions().len(), 3);
    assert_eq!(deployment.provider.function_names().len(), 3);
}

#[tokio::test]
async fn test_environments_never_carry_unset_values() {
    let deployment = TestDeployment::new();
    deployment.deploy().await;

    let names = ResourceNames::new("acme-dev");
    for function in names.functions() {
        let stored = deployment.provider.function(function).unwrap();
        for configuration in &stored.configurations {
            for (key, value) in &configuration.environment {
                assert!(!is_unset(value), "{} has unset {}", function, key);
            }
        }
    }

    let api = deployment.provider.function(&names.api_function).unwrap();
    assert_eq!(api.spec.env("GOOGLE_OAUTH_PROJECT_ID"), None);
    assert_eq!(api.spec.env("JWT_SECRET"), Some("sign\\ing\"secret"));

    let summary = deployment
        .provider
        .function(&names.log_summary_function)
        .unwrap();
    assert_eq!(summary.spec.env("AI_API_KEY"), None);
    assert_eq!(
        summary.spec.env("NOTIFICATION_WEBHOOK_URL"),
        Some("https://hooks.example.com/airbrx")
    );
}

#[tokio::test]
async fn test_api_configuration_applied_twice() {
    let deployment = TestDeployment::new();
    let result = deployment.deploy().await;

    let names = ResourceNames::new("acme-dev");
    let api = deployment.provider.function(&names.api_function).unwrap();
    assert_eq!(api.configurations.len(), 2);

    let first = &api.configurations[0];
    let second = &api.configurations[1];
    for (key, value) in &first.environment {
        assert_eq!(second.env(key), Some(value.as_str()), "{} changed", key);
    }
    let api_cdn = result.registry.get(ArtifactKey::ApiCdnDomain).unwrap();
    let gateway_cdn = result.registry.get(ArtifactKey::GatewayCdnDomain).unwrap();
    assert_eq!(second.env("API_BASE_URL"), Some(format!("https://{}", api_cdn).as_str()));
    assert_eq!(
        second.env("GATEWAY_URL"),
        Some(format!("https://{}", gateway_cdn).as_str())
    );
    assert!(second.env("DASHBOARD_URL").is_some());
    assert!(
        second
            .env("ALLOWED_REDIRECT_ORIGINS")
            .unwrap()
            .contains(gateway_cdn)
    );
    assert_eq!(second.environment.len(), first.environment.len() + 4);

    // Gateway and log-summary are configured once
    let gateway = deployment.provider.function(&names.gateway_function).unwrap();
    assert_eq!(gateway.configurations.len(), 1);
}

#[tokio::test]
async fn test_rerun_keeps_two_api_updates_per_run() {
    let deployment = TestDeployment::new();
    deployment.deploy().await;
    deployment.provider.clear_calls();
    deployment.deploy().await;

    assert_eq!(
        deployment
            .provider
            .call_count_for("update_function_configuration", "acme-dev-airbrx-api"),
        2
    );
}

#[tokio::test]
async fn test_gateway_token_matches_uploaded_record() {
    let deployment = TestDeployment::new();
    let result = deployment.deploy().await;
    let names = ResourceNames::new("acme-dev");

    let gateway = deployment.provider.function(&names.gateway_function).unwrap();
    let god_pat = gateway.spec.env("GOD_PAT").unwrap();
    assert_eq!(
        gateway.spec.env("ADMIN_API_URL"),
        result.registry.get(ArtifactKey::ApiFunctionUrl)
    );

    let key = format!("pats/{}.json", god_pat);
    assert_eq!(result.registry.get(ArtifactKey::AdminPatKey), Some(key.as_str()));
    let body = deployment
        .provider
        .object(&names.admin_bucket, &key)
        .unwrap();
    assert_eq!(body, deployment.token.bytes);

    let record: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(record["token"], god_pat);
    assert_eq!(record["tenants"], serde_json::json!(["*"]));
    assert!(record["expiresAt"].is_null());
}

#[tokio::test]
async fn test_static_site_is_locked_to_its_distribution() {
    let deployment = TestDeployment::new();
    let result = deployment.deploy().await;
    let names = ResourceNames::new("acme-dev");

    let bucket = deployment.provider.bucket(&names.app_bucket).unwrap();
    let policy = bucket.policy.unwrap();
    let app_id = result.registry.get(ArtifactKey::AppDistributionId).unwrap();
    assert_eq!(
        policy["Statement"][0]["Condition"]["StringEquals"]["AWS:SourceArn"],
        format!("arn:aws:cloudfront::123456789012:distribution/{}", app_id)
    );

    let app = deployment
        .provider
        .distributions()
        .into_iter()
        .find(|d| d.info.id == app_id)
        .unwrap();
    assert_eq!(
        app.spec.origin_access_control_id.as_deref(),
        result.registry.get(ArtifactKey::AppOacId)
    );
    assert_eq!(app.spec.default_root_object.as_deref(), Some("index.html"));

    assert!(deployment.provider.object(&names.app_bucket, "index.html").is_some());
    assert!(deployment.provider.object(&names.app_bucket, "assets/app.js").is_some());
    let runtime: serde_json::Value = serde_json::from_slice(
        &deployment
            .provider
            .object(&names.app_bucket, "config.json")
            .unwrap(),
    )
    .unwrap();
    assert_eq!(
        runtime["apiBaseUrl"],
        format!("https://{}", result.registry.get(ArtifactKey::ApiCdnDomain).unwrap())
    );
}

#[tokio::test]
async fn test_tenant_seeded_once() {
    let deployment = TestDeployment::new();
    let first = deployment.deploy().await;
    let names = ResourceNames::new("acme-dev");
    let tenant = first.registry.get(ArtifactKey::TenantId).unwrap().to_string();
    let conf_key = format!("config/tenants/{}/conf.json", tenant);

    let conf: serde_json::Value = serde_json::from_slice(
        &deployment
            .provider
            .object(&names.admin_bucket, &conf_key)
            .unwrap(),
    )
    .unwrap();
    assert_eq!(conf["tenantId"], tenant.as_str());
    assert_eq!(conf["tenantName"], "acme-dev");

    let second = deployment.deploy().await;
    let seeding = second.phases.iter().find(|p| p.name == "seeding").unwrap();
    assert!(
        seeding
            .actions
            .iter()
            .all(|a| a.action_type == ActionType::NoOp)
    );
    let versions = deployment
        .provider
        .bucket(&names.admin_bucket)
        .unwrap()
        .objects
        .iter()
        .filter(|o| o.key == conf_key)
        .count();
    assert_eq!(versions, 1);
}

#[tokio::test]
async fn test_acme_dev_scenario_names() {
    let deployment = TestDeployment::new();
    deployment.deploy().await;

    assert_eq!(
        deployment.provider.bucket_names(),
        vec![
            "acme-dev-airbrx-admin-storage",
            "acme-dev-airbrx-app",
            "acme-dev-airbrx-gateway-storage"
        ]
    );
    assert_eq!(
        deployment.provider.function_names(),
        vec![
            "acme-dev-airbrx-api",
            "acme-dev-airbrx-gateway",
            "acme-dev-airbrx-log-summary"
        ]
    );
    assert_eq!(
        deployment.provider.role_names(),
        vec![
            "acme-dev-airbrx-api-role",
            "acme-dev-airbrx-gateway-role",
            "acme-dev-airbrx-log-summary-role"
        ]
    );
    assert_eq!(
        deployment.provider.bucket("acme-dev-airbrx-app").unwrap().region,
        "us-west-2"
    );
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_recreating_functions() {
    let deployment = TestDeployment::new();

    let partial: Vec<_> = deployment_phases().into_iter().take(4).collect();
    let interrupted = deployment.deploy_phases(partial).await;
    assert_eq!(interrupted.phases.len(), 4);
    assert!(deployment.provider.distributions().is_empty());
    assert_eq!(deployment.provider.call_count("create_function"), 3);

    let resumed = deployment.deploy().await;
    assert_eq!(resumed.phases.len(), 9);
    assert_eq!(deployment.provider.call_count("create_function"), 3);
    assert_eq!(deployment.provider.distributions().len(), 3);

    let compute = resumed.phases.iter().find(|p| p.name == "compute").unwrap();
    assert!(
        compute
            .actions
            .iter()
            .filter(|a| a.resource_kind == airbrx_cloud::ResourceKind::Function)
            .all(|a| a.action_type == ActionType::Update)
    );
}

#[tokio::test]
async fn test_failed_phase_is_recorded_in_run_state() {
    let deployment = TestDeployment::new();
    let state_dir = tempfile::tempdir().unwrap();
    deployment.provider.inject_failure(
        "create_distribution",
        "acme-dev/gateway",
        airbrx_cloud::InjectedFailure::AccessDenied,
    );

    let err = Deployer::new(deployment.context().await)
        .with_state(StateManager::new(state_dir.path()))
        .run()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("gateway-edge"));

    let state = StateManager::new(state_dir.path())
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_phase(), Some("compute"));
    assert!(matches!(state.outcome, RunOutcome::Failed { ref phase, .. } if phase == "edge"));
    assert!(state.artifacts.contains_key("api.cdnDomain"));
    assert!(!state_dir.path().join("lock.json").exists());

    // The api distribution created before the failure is reused
    deployment.provider.clear_failures();
    deployment.provider.clear_calls();
    Deployer::new(deployment.context().await)
        .with_state(StateManager::new(state_dir.path()))
        .run()
        .await
        .unwrap();
    assert_eq!(deployment.provider.call_count("create_distribution"), 2);

    let state = StateManager::new(state_dir.path())
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.outcome, RunOutcome::Succeeded);
    assert_eq!(state.completed_phases.len(), 9);
}

#[tokio::test]
async fn test_blank_secret_aborts_before_any_cloud_call() {
    let mut deployment = TestDeployment::new();
    deployment.config.signing_secret = "   ".to_string();

    let err = DeployContext::connect(
        deployment.provider.clone(),
        deployment.config.clone(),
        Arc::new(DirectorySource::new(deployment.artifacts.path())),
        Arc::new(common::AlwaysUp),
        deployment.token.clone(),
    )
    .await
    .err()
    .unwrap();

    assert!(err.to_string().contains("SIGNING_SECRET"));
    assert!(deployment.provider.calls().is_empty());
}

#[tokio::test]
async fn test_interrupted_run_releases_lock() {
    let deployment = TestDeployment::new();
    let state_dir = tempfile::tempdir().unwrap();
    let stalled = DeployContext::connect(
        deployment.provider.clone(),
        deployment.config.clone(),
        Arc::new(StalledSource),
        Arc::new(AlwaysUp),
        deployment.token.clone(),
    )
    .await
    .unwrap();

    let run = Deployer::new(stalled)
        .with_state(StateManager::new(state_dir.path()))
        .run();
    assert!(
        tokio::time::timeout(Duration::from_millis(200), run)
            .await
            .is_err()
    );
    assert!(!state_dir.path().join("lock.json").exists());

    let state = StateManager::new(state_dir.path())
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.outcome, RunOutcome::InProgress);

    let result = Deployer::new(deployment.context().await)
        .with_state(StateManager::new(state_dir.path()))
        .run()
        .await
        .unwrap();
    assert_eq!(result.phases.len(), 9);
}
