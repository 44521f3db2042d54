use std::path::Path;
use std::process::ExitCode;

use keel_provisioner::DeploymentConfig;

use crate::InitArgs;
use crate::config::{self, KeelConfig};

pub fn init(path: &Path, args: InitArgs) -> eyre::Result<ExitCode> {
    if path.exists() && !args.force {
        return Err(eyre::eyre!(
            "config already exists at {}. Use --force to overwrite.",
            path.display()
        ));
    }

    let mut deployment = DeploymentConfig::new(
        args.environment,
        args.region,
        args.subscription_id,
        args.resource_group,
    );
    if let Some(prefix) = args.naming_prefix {
        deployment.naming_prefix = prefix;
    }
    if let Some(parallelism) = args.parallelism {
        deployment.parallelism = parallelism;
    }
    deployment.image_tag = args.image_tag;
    deployment.validate()?;

    let mut config = KeelConfig::new(deployment);
    config.report_dir = args.report_dir;
    config::save(&config, path)?;

    println!("config written to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

pub fn show(path: &Path) -> eyre::Result<ExitCode> {
    let config = config::load(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(ExitCode::SUCCESS)
}
