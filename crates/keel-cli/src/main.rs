//! keel: provision a declarative manifest.
//!
//! Exit codes: 0 on success, 1 when a run failed or partially failed, 2 for
//! anything that stopped the run from starting (bad manifest, bad config,
//! missing parameters, I/O).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod params;
mod simulator;

#[derive(Parser, Debug)]
#[command(name = "keel", version, about = "Declarative infrastructure provisioning")]
struct Cli {
    /// Deployment config file. Defaults to the platform config dir.
    #[arg(long, global = true, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "KEEL_LOG_JSON", default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a manifest and its dependency graph without touching the cloud
    Validate(ManifestArgs),

    /// Show the order descriptors would be handled in
    Plan {
        #[command(flatten)]
        manifest: ManifestArgs,
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Provision the manifest and write a run report
    Apply {
        #[command(flatten)]
        manifest: ManifestArgs,
        /// Parameter value, `name=value`. Repeatable.
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        #[arg(long)]
        report_dir: Option<PathBuf>,
        /// Print the full report as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Manage the deployment config file
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Args, Debug)]
struct ManifestArgs {
    /// Manifest file. Defaults to the built-in web stack.
    #[arg(long, short)]
    manifest: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a new config file
    Init(InitArgs),
    /// Print the current config
    Show,
}

#[derive(Args, Debug)]
struct InitArgs {
    #[arg(long)]
    environment: String,
    #[arg(long)]
    region: String,
    #[arg(long)]
    subscription_id: String,
    #[arg(long)]
    resource_group: String,
    #[arg(long)]
    naming_prefix: Option<String>,
    #[arg(long)]
    image_tag: Option<String>,
    #[arg(long)]
    parallelism: Option<usize>,
    #[arg(long)]
    report_dir: Option<PathBuf>,
    /// Overwrite an existing config file.
    #[arg(long, default_value_t = false)]
    force: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error handler: {e}");
        return ExitCode::from(2);
    }

    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> eyre::Result<ExitCode> {
    // validate and plan never read the config
    let config_path = || match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::default_path(),
    };

    match cli.command {
        Command::Validate(args) => commands::validate::run(args.manifest.as_deref()),
        Command::Plan { manifest, json } => commands::plan::run(manifest.manifest.as_deref(), json),
        Command::Apply {
            manifest,
            params,
            report_dir,
            json,
        } => {
            commands::apply::run(commands::apply::ApplyArgs {
                config_path: &config_path()?,
                manifest: manifest.manifest.as_deref(),
                params: &params,
                report_dir: report_dir.as_deref(),
                json,
            })
            .await
        }
        Command::Config { cmd } => match cmd {
            ConfigCommand::Init(args) => commands::config::init(&config_path()?, args),
            ConfigCommand::Show => commands::config::show(&config_path()?),
        },
    }
}
