use crate::utils;
use airbrx_core::{ResourceNames, Teardown};
use colored::Colorize;
use dialoguer::Input;
use std::io::IsTerminal;
use std::path::Path;

pub async fn handle(config_path: Option<&Path>, confirm: Option<String>) -> anyhow::Result<()> {
    let deployment = utils::load_deployment(config_path)?;
    let prefix = deployment.config.prefix.clone();
    let names = ResourceNames::new(&prefix);

    println!("{}", "Tearing down airbrx".red().bold());
    utils::print_loaded_config(&deployment);
    println!();
    println!("{}", "The following will be deleted permanently:".bold());
    println!("  • CloudFront distributions for api, gateway and app");
    println!("  • origin access control {}", names.app_oac);
    for function in names.functions() {
        println!("  • function {}", function);
    }
    for bucket in names.buckets() {
        println!("  • bucket {} with every object version", bucket);
    }
    for role in names.roles() {
        println!("  • role {}", role);
    }
    println!();

    let confirmation = match confirm {
        Some(value) => value,
        None if std::io::stdin().is_terminal() => Input::<String>::new()
            .with_prompt(format!("Type the deployment prefix ({}) to confirm", prefix))
            .allow_empty(true)
            .interact_text()?,
        None => anyhow::bail!(
            "Refusing to tear down without confirmation; pass --confirm {}",
            prefix
        ),
    };
    if confirmation != prefix {
        anyhow::bail!(
            "Confirmation '{}' does not match prefix '{}'; nothing was deleted",
            confirmation,
            prefix
        );
    }

    let provider = utils::connect_aws(&deployment.config.region).await?;
    println!(
        "{}",
        "Deleting... (disabling distributions takes several minutes)".dimmed()
    );
    let report = Teardown::new(provider, &prefix).run(&confirmation).await?;

    println!();
    for success in &report.result.succeeded {
        println!(
            "  {} {} {}",
            "✓".green(),
            success.action_id,
            success.message.dimmed()
        );
    }
    for failure in &report.result.failed {
        println!(
            "  {} {} {}",
            "✗".red(),
            failure.action_id,
            failure.error.as_deref().unwrap_or("failed").red()
        );
    }
    for warning in &report.result.warnings {
        println!("  {} {}", "⚠".yellow(), warning.yellow());
    }

    if !report.manual_followups.is_empty() {
        println!();
        println!("{}", "Remove by hand if no longer needed:".bold());
        for followup in &report.manual_followups {
            println!("  • {}", followup);
        }
    }

    if !report.is_success() {
        anyhow::bail!(
            "{} resources could not be deleted; re-run teardown after fixing the errors above",
            report.result.failed.len()
        );
    }

    println!();
    println!("{}", format!("✓ {} torn down", prefix).green().bold());
    Ok(())
}
