use std::path::Path;
use std::process::ExitCode;

use keel_core::Mode;
use keel_provisioner::Plan;

use super::load_manifest;

pub fn run(manifest: Option<&Path>, json: bool) -> eyre::Result<ExitCode> {
    let manifest = load_manifest(manifest)?;
    let plan = Plan::build(&manifest)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(ExitCode::SUCCESS);
    }

    for (wave, entries) in plan.waves.iter().enumerate() {
        println!("wave {wave}:");
        for entry in entries {
            let action = match entry.mode {
                Mode::Managed => "apply",
                Mode::Existing => "read",
            };
            let deps: Vec<String> = entry.depends_on.iter().map(|d| d.name.clone()).collect();
            if deps.is_empty() {
                println!("  {action:<5} {}", entry.addr);
            } else {
                println!("  {action:<5} {}  <- {}", entry.addr, deps.join(", "));
            }
        }
    }
    println!(
        "{} descriptors, {} to apply",
        plan.len(),
        plan.managed().count()
    );
    Ok(ExitCode::SUCCESS)
}
