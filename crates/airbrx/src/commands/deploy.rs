use crate::progress::DeployProgress;
use crate::utils;
use airbrx_cloud::{CloudProvider, MemoryProvider, StateManager};
use airbrx_core::{
    ArtifactKey, ArtifactSource, DeployContext, Deployer, DeploymentResult, DirectorySource,
    EnvironmentDocument, GitSource, HealthVerdict, HttpProbe, ResourceNames, deployment_phases,
};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct DeployOptions {
    pub dry_run: bool,
    pub yes: bool,
    pub force_unlock: bool,
    pub print_env: bool,
}

pub async fn handle(
    config_path: Option<&Path>,
    artifacts: Option<PathBuf>,
    options: DeployOptions,
) -> anyhow::Result<()> {
    let DeployOptions {
        dry_run,
        yes,
        force_unlock,
        print_env,
    } = options;
    let deployment = utils::load_deployment(config_path)?;
    let config = &deployment.config;
    let names = ResourceNames::new(&config.prefix);

    println!("{}", "Deploying airbrx".blue().bold());
    utils::print_loaded_config(&deployment);
    match &artifacts {
        Some(dir) => println!("Artifacts:     {}", dir.display()),
        None => println!(
            "Artifacts:     {} (branch {})",
            config.git_repo_base, config.git_branch
        ),
    }
    println!();
    println!("{}", "Resources:".bold());
    for function in names.functions() {
        println!("  • function {}", function.cyan());
    }
    for bucket in names.buckets() {
        println!("  • bucket   {}", bucket.cyan());
    }
    println!("  • 3 CloudFront distributions, 1 origin access control");

    if dry_run {
        println!();
        println!(
            "{}",
            "Dry run: resources are simulated in memory, AWS is not touched.".yellow()
        );
    } else if !yes {
        println!();
        if !utils::confirm("Create or update these resources in AWS?")? {
            println!("Aborted. Pass --yes to deploy without the prompt.");
            return Ok(());
        }
    }

    let simulated = dry_run.then(|| Arc::new(MemoryProvider::new(&config.region)));
    let provider: Arc<dyn CloudProvider> = match &simulated {
        Some(memory) => memory.clone() as Arc<dyn CloudProvider>,
        None => utils::connect_aws(&config.region).await?,
    };

    let source: Arc<dyn ArtifactSource> = match artifacts {
        Some(dir) => Arc::new(DirectorySource::new(dir)),
        None => Arc::new(GitSource::new(
            &config.git_repo_base,
            &config.git_branch,
            &config.git_token,
            airbrx_config::state_dir(&config.prefix)?.join("checkout"),
        )),
    };

    let ctx = DeployContext::connect(
        provider,
        config.clone(),
        source,
        Arc::new(HttpProbe::default()),
        deployment.token.clone(),
    )
    .await?;

    println!();
    let progress = DeployProgress::new();
    let mut deployer = Deployer::new(ctx).with_observer(progress.observer());
    if dry_run {
        // Simulated endpoints do not answer
        deployer = deployer.with_phases(
            deployment_phases()
                .into_iter()
                .filter(|phase| phase.name != "validation")
                .collect(),
        );
    } else {
        let manager = StateManager::new(airbrx_config::state_dir(&config.prefix)?);
        if force_unlock && manager.force_unlock().await? {
            println!("{}", "⚠ Removed an existing deploy lock".yellow());
        }
        deployer = deployer.with_state(manager);
    }

    // Dropping the run on a signal releases the deploy lock; the next run
    // reconciles whatever was half-created
    let result = tokio::select! {
        result = deployer.run() => result,
        _ = interrupted() => {
            progress.finish();
            anyhow::bail!("Interrupted; run `airbrx deploy` again to pick up where it stopped");
        }
    };
    progress.finish();
    let result = result?;

    print_result(&result);
    if print_env {
        if let Some(memory) = &simulated {
            print_environments(memory, &names);
        }
    }
    Ok(())
}

fn print_environments(memory: &MemoryProvider, names: &ResourceNames) {
    println!();
    println!("{}", "Function environments:".bold());
    for function in names.functions() {
        if let Some(stored) = memory.function(function) {
            let document = EnvironmentDocument::from_vars(&stored.spec.environment);
            println!("  {}", function.cyan());
            println!("  {}", document.to_json());
        }
    }
}

async fn interrupted() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("Received Ctrl+C, stopping the deploy"),
        _ = terminate => tracing::warn!("Received SIGTERM, stopping the deploy"),
    }
}

fn print_result(result: &DeploymentResult) {
    println!();
    for phase in &result.phases {
        println!("  {}", phase.name.bold());
        for action in &phase.actions {
            utils::print_action(action);
        }
        for warning in &phase.warnings {
            println!("    {} {}", "⚠".yellow(), warning.yellow());
        }
    }

    println!();
    println!(
        "{} {} in {:.1}s",
        "✓ Deployment finished:".green().bold(),
        result.summary(),
        result.duration_ms as f64 / 1000.0
    );

    println!();
    println!("{}", "Endpoints:".bold());
    for (label, key) in [
        ("Dashboard", ArtifactKey::AppCdnDomain),
        ("Admin API", ArtifactKey::ApiCdnDomain),
        ("Gateway  ", ArtifactKey::GatewayCdnDomain),
    ] {
        if let Some(domain) = result.registry.get(key) {
            println!("  {}  {}", label, format!("https://{}", domain).cyan());
        }
    }
    if let Some(tenant) = result.registry.get(ArtifactKey::TenantId) {
        println!("  Tenant     {}", tenant);
    }

    if let Some(health) = &result.health {
        println!();
        let verdict = match health.verdict {
            HealthVerdict::Healthy => health.verdict.to_string().green(),
            HealthVerdict::Degraded => health.verdict.to_string().yellow(),
            HealthVerdict::Failed => health.verdict.to_string().red(),
        };
        println!("Health: {}", verdict);
        for endpoint in health.unhealthy() {
            let reason = match (&endpoint.status, &endpoint.error) {
                (_, Some(error)) => error.clone(),
                (Some(status), None) => format!("HTTP {}", status),
                (None, None) => "no answer".to_string(),
            };
            println!("  {} {} ({})", "✗".red(), endpoint.url, reason);
        }
        if health.verdict != HealthVerdict::Healthy {
            println!(
                "{}",
                "CloudFront can take several minutes to propagate; re-check with `airbrx status`."
                    .dimmed()
            );
        }
    }
}
