pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file (the data directory when no path is given)
    #[arg(long, global = true)]
    pub log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit the form once per dataset row and available date
    Run(RunArgs),

    /// Infer the field map and column mapping for a form and print them as YAML
    Analyze(AnalyzeArgs),

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Options of the `run` command; each one overrides the profile
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Dataset file (JSON or YAML list of rows)
    #[arg(required = true)]
    pub dataset: PathBuf,

    /// Site profile to use (the default configuration when omitted)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Target form URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// Number of concurrent browser sessions
    #[arg(short = 'n', long)]
    pub pool_size: Option<usize>,

    /// Run browsers without a window
    #[arg(long)]
    pub headless: bool,

    /// Keep the browser of a failed task open for inspection
    #[arg(long)]
    pub keep_failed: Option<bool>,

    /// Solve CAPTCHAs with the inference service
    #[arg(long)]
    pub solve: bool,

    /// Inference API key, tried in the order given (repeatable)
    #[arg(short = 'k', long = "api-key")]
    pub api_keys: Vec<String>,

    /// Value to pick in the session dropdown
    #[arg(short, long)]
    pub session: Option<String>,

    /// Write the run report as JSON to this file
    #[arg(short, long)]
    pub report: Option<PathBuf>,
}

/// Options of the `analyze` command
#[derive(Args, Debug, Clone, Default)]
pub struct AnalyzeArgs {
    /// Site profile to use (the default configuration when omitted)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Target form URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// Read the page markup from this file instead of loading the URL
    #[arg(long)]
    pub html: Option<PathBuf>,

    /// Dataset whose column names are mapped to fields
    #[arg(short, long)]
    pub dataset: Option<PathBuf>,

    /// Inference API key, tried in the order given (repeatable)
    #[arg(short = 'k', long = "api-key")]
    pub api_keys: Vec<String>,

    /// Store the inferred mapping in this profile
    #[arg(long)]
    pub save: Option<String>,
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => {
            info!("Starting run with dataset {}", args.dataset.display());
            commands::run(args).await
        },
        Commands::Analyze(args) => {
            info!("Analysing form");
            commands::analyze(args).await
        },
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles().await
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name).await
            } else {
                info!("Showing current configuration");
                commands::show_config().await
            }
        },
    }
}
