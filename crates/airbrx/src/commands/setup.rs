use crate::utils;
use airbrx_config::{AdminToken, DeploymentConfig, validate_prefix, validate_region};
use airbrx_core::{PolicySet, ResourceNames};
use clap::Args;
use colored::Colorize;
use dialoguer::{Input, Password};
use rand::RngCore;
use std::path::PathBuf;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Args)]
pub struct SetupArgs {
    /// Deployment prefix, e.g. acme-dev
    #[arg(long)]
    pub prefix: Option<String>,

    /// AWS region
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Token with read access to the application repositories
    #[arg(long, env = "AIRBRX_GIT_TOKEN", hide_env_values = true)]
    pub git_token: Option<String>,

    /// Branch to deploy (defaults to the prefix)
    #[arg(long)]
    pub git_branch: Option<String>,

    /// Base URL of the application repositories
    #[arg(long)]
    pub git_repo_base: Option<String>,

    /// Session signing secret (generated when omitted)
    #[arg(long, hide_env_values = true)]
    pub signing_secret: Option<String>,

    #[arg(long)]
    pub oauth_project_id: Option<String>,

    #[arg(long, hide_env_values = true)]
    pub ai_api_key: Option<String>,

    #[arg(long)]
    pub notification_webhook_url: Option<String>,

    /// AWS account id used in the generated IAM policies (looked up via STS
    /// when omitted)
    #[arg(long)]
    pub account_id: Option<String>,

    /// Directory for the configuration document
    #[arg(long, env = "AIRBRX_CONFIG_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Never prompt; missing required values are an error
    #[arg(long)]
    pub non_interactive: bool,

    /// Overwrite an existing configuration
    #[arg(short, long)]
    pub force: bool,
}

/// Take the flag value, or prompt for it
fn text(
    value: Option<String>,
    interactive: bool,
    prompt: &str,
    default: Option<String>,
) -> anyhow::Result<Option<String>> {
    if value.is_some() || !interactive {
        return Ok(value.or(default));
    }
    let mut input = Input::<String>::new().with_prompt(prompt).allow_empty(true);
    if let Some(default) = default {
        input = input.default(default);
    }
    let answer = input.interact_text()?;
    Ok(Some(answer.trim().to_string()).filter(|a| !a.is_empty()))
}

fn secret(
    value: Option<String>,
    interactive: bool,
    prompt: &str,
) -> anyhow::Result<Option<String>> {
    if value.is_some() || !interactive {
        return Ok(value);
    }
    let answer = Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()?;
    Ok(Some(answer).filter(|a| !a.trim().is_empty()))
}

fn required(value: Option<String>, flag: &str) -> anyhow::Result<String> {
    value.ok_or_else(|| anyhow::anyhow!("--{} is required", flag))
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub async fn handle(args: SetupArgs) -> anyhow::Result<()> {
    let interactive = !args.non_interactive;
    println!("{}", "airbrx setup".blue().bold());
    println!();

    let prefix = required(
        text(args.prefix, interactive, "Deployment prefix (e.g. acme-dev)", None)?,
        "prefix",
    )?;
    validate_prefix(&prefix)?;

    let region = required(
        text(
            args.region,
            interactive,
            "AWS region",
            Some(DEFAULT_REGION.to_string()),
        )?,
        "region",
    )?;
    validate_region(&region)?;

    let git_token = required(
        secret(args.git_token, interactive, "Git token")?,
        "git-token",
    )?;
    let git_branch = text(
        args.git_branch,
        interactive,
        "Git branch",
        Some(prefix.clone()),
    )?
    .unwrap_or_else(|| prefix.clone());
    let git_repo_base = text(
        args.git_repo_base,
        interactive,
        "Repository base URL",
        Some(airbrx_config::deployment::DEFAULT_REPO_BASE.to_string()),
    )?
    .unwrap_or_else(|| airbrx_config::deployment::DEFAULT_REPO_BASE.to_string());

    let signing_secret = match secret(
        args.signing_secret,
        interactive,
        "Signing secret (empty to generate)",
    )? {
        Some(secret) => secret,
        None => generate_secret(),
    };
    let oauth_project_id = text(
        args.oauth_project_id,
        interactive,
        "OAuth project id (optional)",
        None,
    )?;
    let ai_api_key = secret(args.ai_api_key, interactive, "AI API key (optional)")?;
    let notification_webhook_url = text(
        args.notification_webhook_url,
        interactive,
        "Notification webhook URL (optional)",
        None,
    )?;

    let token = AdminToken::generate();
    let config = DeploymentConfig {
        prefix: prefix.clone(),
        region: region.clone(),
        git_token,
        git_branch,
        git_repo_base,
        admin_token: token.token.clone(),
        signing_secret,
        oauth_project_id,
        ai_api_key,
        notification_webhook_url,
    };
    config.validate()?;

    let dir = match args.output_dir {
        Some(dir) => dir,
        None => airbrx_config::deployments_dir()?,
    };
    let config_path = dir.join(format!("{}.env", prefix));
    if config_path.exists() && !args.force {
        let overwrite = interactive
            && utils::confirm(&format!(
                "{} exists. Overwrite it and generate a new admin token?",
                config_path.display()
            ))?;
        if !overwrite {
            anyhow::bail!(
                "{} already exists; pass --force to replace it",
                config_path.display()
            );
        }
    }

    config.write(&config_path)?;
    let token_path = airbrx_config::token_file_path(&config_path, &prefix);
    token.save(&token_path)?;

    println!();
    println!("{}", "✓ Configuration written".green());
    println!("  {}", config_path.display().to_string().cyan());
    println!("  {}", token_path.display().to_string().cyan());

    let account_id = match args.account_id {
        Some(account_id) => Some(account_id),
        None => lookup_account_id(&region).await,
    };
    match account_id {
        Some(account_id) => {
            let names = ResourceNames::new(&prefix);
            let written = PolicySet::new(&names, &region, &account_id).write(&dir)?;
            println!("{}", "✓ IAM policy documents written".green());
            for path in written {
                println!("  {}", path.display().to_string().cyan());
            }
            println!(
                "Attach {} to the identity that runs `airbrx deploy`.",
                format!("{}-airbrx-deployer-policy.json", prefix).bold()
            );
        }
        None => {
            println!(
                "{}",
                "⚠ No AWS account id (pass --account-id); IAM policy documents were not written"
                    .yellow()
            );
        }
    }

    println!();
    println!("{}", "Next:".bold());
    println!("  {} deploy --config {}", "airbrx".cyan(), config_path.display());
    Ok(())
}

async fn lookup_account_id(region: &str) -> Option<String> {
    let provider = match utils::connect_aws(region).await {
        Ok(provider) => provider,
        Err(e) => {
            tracing::warn!("Could not load AWS configuration: {}", e);
            return None;
        }
    };
    match provider.check_auth().await {
        Ok(auth) if auth.authenticated => auth.account_id,
        Ok(auth) => {
            tracing::warn!("AWS credentials rejected: {:?}", auth.error);
            None
        }
        Err(e) => {
            tracing::warn!("Could not look up the AWS account: {}", e);
            None
        }
    }
}
