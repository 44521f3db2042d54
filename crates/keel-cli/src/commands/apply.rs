use std::path::Path;
use std::process::ExitCode;

use keel_provisioner::{Orchestrator, ReportPersistence, RunReport, RunState};

use super::load_manifest;
use crate::{config, params, simulator};

pub struct ApplyArgs<'a> {
    pub config_path: &'a Path,
    pub manifest: Option<&'a Path>,
    pub params: &'a [String],
    pub report_dir: Option<&'a Path>,
    pub json: bool,
}

pub async fn run(args: ApplyArgs<'_>) -> eyre::Result<ExitCode> {
    let config = config::load(args.config_path)?;
    config.deployment.validate()?;
    let manifest = load_manifest(args.manifest)?;

    let supplied = params::collect(&manifest, args.params, std::env::vars())?;

    let bound = config.deployment.bind(&manifest, &supplied)?;
    let missing: Vec<&str> = bound.missing().collect();
    if !missing.is_empty() {
        tracing::warn!(
            missing = %missing.join(", "),
            "parameters without a value; descriptors reading them will fail"
        );
    }
    let provider = simulator::provider(&manifest, &bound, &config.deployment)?;

    let orchestrator = Orchestrator::new(provider, config.deployment.clone());
    let report = orchestrator.run(&manifest, &bound).await?;

    let store = ReportPersistence::new(config.report_dir(args.report_dir)?);
    let path = store.flush(&report).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
        println!("report written to {}", path.display());
    }

    Ok(match report.state {
        RunState::Succeeded => ExitCode::SUCCESS,
        _ => ExitCode::from(1),
    })
}

fn print_summary(report: &RunReport) {
    println!("run {} {}", report.run_id, report.state.as_str());
    for resource in &report.resources {
        match &resource.error {
            Some(error) => println!(
                "  {:<8} {}  ({} attempts): {error}",
                resource.state.as_str(),
                resource.addr,
                resource.attempts
            ),
            None => println!(
                "  {:<8} {}  ({} attempts)",
                resource.state.as_str(),
                resource.addr,
                resource.attempts
            ),
        }
    }
    if let Some(error) = &report.error {
        println!("  run error: {error}");
    }
    for (name, output) in &report.outputs {
        println!("  output {name} = {}", output.value);
    }
}
