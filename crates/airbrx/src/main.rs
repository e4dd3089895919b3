mod commands;
mod progress;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "airbrx")]
#[command(about = "Deploy the airbrx data proxy to AWS", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a deployment configuration, admin token and IAM policy documents
    Setup(commands::setup::SetupArgs),
    /// Provision or update every resource of a deployment
    Deploy {
        /// Deployment configuration file
        #[arg(short, long, env = "AIRBRX_CONFIG")]
        config: Option<PathBuf>,
        /// Directory with pre-built packages instead of cloning the repositories
        #[arg(short, long, env = "AIRBRX_ARTIFACTS")]
        artifacts: Option<PathBuf>,
        /// Run against an in-memory account; nothing in AWS changes
        #[arg(long)]
        dry_run: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
        /// Remove the deploy lock left behind by a crashed run
        #[arg(long)]
        force_unlock: bool,
        /// With --dry-run, print each function's environment document
        /// (includes secrets)
        #[arg(long, requires = "dry_run")]
        print_env: bool,
    },
    /// Show which resources exist and whether the endpoints answer
    Status {
        /// Deployment configuration file
        #[arg(short, long, env = "AIRBRX_CONFIG")]
        config: Option<PathBuf>,
        /// Skip the endpoint health probes
        #[arg(long)]
        no_health: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every resource of a deployment
    Teardown {
        /// Deployment configuration file
        #[arg(short, long, env = "AIRBRX_CONFIG")]
        config: Option<PathBuf>,
        /// Deployment prefix, typed out to confirm
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is for the progress report
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Setup(args) => {
            commands::setup::handle(args).await?;
        }
        Commands::Deploy {
            config,
            artifacts,
            dry_run,
            yes,
            force_unlock,
            print_env,
        } => {
            commands::deploy::handle(
                config.as_deref(),
                artifacts,
                commands::deploy::DeployOptions {
                    dry_run,
                    yes,
                    force_unlock,
                    print_env,
                },
            )
            .await?;
        }
        Commands::Status {
            config,
            no_health,
            json,
        } => {
            commands::status::handle(config.as_deref(), !no_health, json).await?;
        }
        Commands::Teardown { config, confirm } => {
            commands::teardown::handle(config.as_deref(), confirm).await?;
        }
        Commands::Version => {
            println!("airbrx {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
