mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::target::TargetSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "relwatch",
    about = "Watch GitHub release feeds and restart Kubernetes deployments on new releases",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: $RELWATCH_CONFIG_DIR/config.yaml, else ./config.yaml)
    #[arg(long, global = true, env = "RELWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watch engine and its HTTP control plane
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on (0 = OS-assigned)
        #[arg(long, default_value = "8080")]
        port: u16,
    },

    /// Manage monitored targets in the config file
    Target {
        #[command(subcommand)]
        subcommand: TargetSubcommand,
    },

    /// Fetch releases for a target now and record the latest
    Check { id: String },

    /// Show the rollout state of a target's deployment
    Status { id: String },

    /// Point a target's deployment at an earlier release tag
    Rollback { id: String, tag: String },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let config = relwatch_core::config::resolve_config_path(cli.config.as_deref());

    let result = match cli.command {
        Commands::Serve { host, port } => cmd::serve::run(&config, &host, port),
        Commands::Target { subcommand } => cmd::target::run(&config, subcommand, cli.json),
        Commands::Check { id } => cmd::check::run(&config, &id, cli.json),
        Commands::Status { id } => cmd::deploy::status(&config, &id, cli.json),
        Commands::Rollback { id, tag } => cmd::deploy::rollback(&config, &id, &tag, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
