use airbrx_cloud::MemoryProvider;
use airbrx_config::{AdminToken, DeploymentConfig, StoredToken};
use airbrx_core::health::{HealthProbe, ProbeOutcome};
use airbrx_core::{DeployContext, Deployer, DeploymentResult, DirectorySource, Phase};
use async_trait::async_trait;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

pub const CONFIG: &str = "\
# test deployment
AIRBRX_PREFIX=acme-dev
AWS_REGION=us-west-2
GIT_TOKEN=ghp_test
GOD_PAT=pat_0123456789abcdef
SIGNING_SECRET=\"sign\\\\ing\\\"secret\"
OAUTH_PROJECT_ID=NOT_CONFIGURED
AI_API_KEY=
NOTIFICATION_WEBHOOK_URL=https://hooks.example.com/airbrx
";

/// Probe that reports every endpoint as up
pub struct AlwaysUp;

#[async_trait]
impl HealthProbe for AlwaysUp {
    async fn probe(&self, _url: &str) -> ProbeOutcome {
        ProbeOutcome {
            status: Some(200),
            error: None,
            elapsed_ms: 1,
        }
    }
}

/// A deployment against an in-memory account with pre-built artifacts
pub struct TestDeployment {
    pub provider: Arc<MemoryProvider>,
    pub config: DeploymentConfig,
    pub token: StoredToken,
    pub artifacts: TempDir,
}

impl TestDeployment {
    pub fn new() -> Self {
        Self::with_config(CONFIG)
    }

    pub fn with_config(document: &str) -> Self {
        let config = DeploymentConfig::parse(document).unwrap();

        let artifacts = tempfile::tempdir().unwrap();
        for component in ["api", "gateway", "log-summary"] {
            fs::write(
                artifacts.path().join(format!("{}.zip", component)),
                format!("PK {} package", component),
            )
            .unwrap();
        }
        let app = artifacts.path().join("app");
        fs::create_dir_all(app.join("assets")).unwrap();
        fs::write(app.join("index.html"), "<!doctype html>").unwrap();
        fs::write(app.join("assets/app.js"), "console.log(1)").unwrap();

        let record = AdminToken::from_token(&config.admin_token);
        let token = StoredToken {
            bytes: record.to_bytes().unwrap(),
            record,
        };

        Self {
            provider: Arc::new(MemoryProvider::new(&config.region)),
            config,
            token,
            artifacts,
        }
    }

    pub async fn context(&self) -> DeployContext {
        DeployContext::connect(
            self.provider.clone(),
            self.config.clone(),
            Arc::new(DirectorySource::new(self.artifacts.path())),
            Arc::new(AlwaysUp),
            self.token.clone(),
        )
        .await
        .unwrap()
    }

    pub async fn deploy(&self) -> DeploymentResult {
        Deployer::new(self.context().await).run().await.unwrap()
    }

    #[allow(dead_code)]
    pub async fn deploy_phases(&self, phases: Vec<Phase<DeployContext>>) -> DeploymentResult {
        Deployer::new(self.context().await)
            .with_phases(phases)
            .run()
            .await
            .unwrap()
    }
}
