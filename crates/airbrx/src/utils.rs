use airbrx_cloud::{Action, ActionType, CloudProvider, WaitConfig};
use airbrx_cloud_aws::AwsProvider;
use airbrx_config::{ConfigError, DeploymentConfig, StoredToken};
use colored::Colorize;
use dialoguer::{Confirm, Select};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A configuration document with its admin token record
pub struct LoadedDeployment {
    pub path: PathBuf,
    pub config: DeploymentConfig,
    pub token: StoredToken,
}

/// Locate the configuration file. Several candidates turn into a selection
/// prompt when a terminal is attached.
pub fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match airbrx_config::find_config_file(explicit) {
        Ok(path) => Ok(path),
        Err(ConfigError::Ambiguous { candidates }) if std::io::stdin().is_terminal() => {
            let items: Vec<String> = candidates
                .iter()
                .map(|path| path.display().to_string())
                .collect();
            let selection = Select::new()
                .with_prompt("Several deployments found. Which one?")
                .items(&items)
                .default(0)
                .interact()?;
            Ok(candidates[selection].clone())
        }
        Err(ConfigError::Ambiguous { candidates }) => Err(anyhow::anyhow!(
            "Several deployment configurations found; pick one with --config:\n{}",
            candidates
                .iter()
                .map(|path| format!("  {}", path.display()))
                .collect::<Vec<_>>()
                .join("\n")
        )),
        Err(e) => Err(e.into()),
    }
}

pub fn load_deployment(explicit: Option<&Path>) -> anyhow::Result<LoadedDeployment> {
    let path = resolve_config_path(explicit)?;
    let config = DeploymentConfig::load(&path)?;
    let token_path = airbrx_config::token_file_path(&path, &config.prefix);
    let token = airbrx_config::load_or_synthesize(&token_path, &config.admin_token)?;
    Ok(LoadedDeployment {
        path,
        config,
        token,
    })
}

pub async fn connect_aws(region: &str) -> anyhow::Result<Arc<dyn CloudProvider>> {
    let provider = AwsProvider::new(region, WaitConfig::default()).await?;
    Ok(Arc::new(provider))
}

/// Ask a yes/no question; `false` without a terminal
pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(false);
    }
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

pub fn print_loaded_config(deployment: &LoadedDeployment) {
    println!(
        "Configuration: {}",
        deployment.path.display().to_string().cyan()
    );
    println!(
        "Deployment:    {} ({})",
        deployment.config.prefix.cyan(),
        deployment.config.region
    );
}

pub fn print_action(action: &Action) {
    let marker = match action.action_type {
        ActionType::Create => "+".green(),
        ActionType::Update => "~".yellow(),
        ActionType::Delete => "-".red(),
        ActionType::NoOp => "=".dimmed(),
    };
    println!(
        "    {} {} {} {}",
        marker,
        action.resource_kind.to_string().dimmed(),
        action.resource_id,
        action.description.dimmed()
    );
}
