use crate::utils;
use airbrx_cloud::{RunOutcome, StateManager};
use airbrx_core::health::HealthProbe;
use airbrx_core::{HttpProbe, StatusReport, inspect};
use colored::Colorize;
use std::path::Path;

pub async fn handle(config_path: Option<&Path>, probe: bool, json: bool) -> anyhow::Result<()> {
    let deployment = utils::load_deployment(config_path)?;
    let config = &deployment.config;

    let last_run = StateManager::new(airbrx_config::state_dir(&config.prefix)?)
        .load()
        .await?;
    let provider = utils::connect_aws(&config.region).await?;
    let http = HttpProbe::default();
    let probe: Option<&dyn HealthProbe> = if probe { Some(&http) } else { None };

    let report = inspect(provider.as_ref(), &config.prefix, last_run, probe).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        utils::print_loaded_config(&deployment);
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &StatusReport) {
    println!();
    println!("{}", "Resources:".bold());
    for resource in &report.resources {
        let marker = if resource.present {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {:<22} {}  {}",
            marker,
            resource.kind.to_string(),
            resource.name,
            resource.detail.as_deref().unwrap_or("").dimmed()
        );
    }
    println!(
        "  {} of {} present",
        report.present(),
        report.resources.len()
    );

    if let Some(run) = &report.last_run {
        println!();
        let outcome = match &run.outcome {
            RunOutcome::Succeeded => "succeeded".green().to_string(),
            RunOutcome::InProgress => "in progress (or interrupted)".yellow().to_string(),
            RunOutcome::Failed { phase, error } => {
                format!("{} in {}: {}", "failed".red(), phase, error)
            }
        };
        println!(
            "Last deploy: {} ({})",
            outcome,
            run.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if let Some(phase) = run.last_phase() {
            println!("  last completed phase: {}", phase);
        }
    }

    if let Some(health) = &report.health {
        println!();
        println!("{} {}", "Health:".bold(), health.verdict);
        for endpoint in &health.endpoints {
            let marker = if endpoint.healthy {
                "✓".green()
            } else {
                "✗".red()
            };
            let detail = match (endpoint.status, &endpoint.error) {
                (Some(status), _) => format!("HTTP {}", status),
                (None, Some(error)) => error.clone(),
                (None, None) => String::new(),
            };
            println!(
                "  {} {} {} ({} ms)",
                marker,
                endpoint.url,
                detail,
                endpoint.elapsed_ms
            );
        }
    }

    if !report.is_complete() {
        println!();
        println!(
            "{}",
            "Some resources are missing. Run `airbrx deploy` to create them.".yellow()
        );
    }
}
