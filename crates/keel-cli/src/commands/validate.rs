use std::path::Path;
use std::process::ExitCode;

use keel_core::Mode;
use keel_provisioner::DependencyGraph;

use super::load_manifest;

pub fn run(manifest: Option<&Path>) -> eyre::Result<ExitCode> {
    let manifest = load_manifest(manifest)?;
    let graph = DependencyGraph::build(&manifest)?;

    let existing = manifest
        .resources
        .iter()
        .filter(|d| d.mode == Mode::Existing)
        .count();
    println!(
        "manifest ok: {} resources ({existing} existing), {} edges, {} waves",
        graph.len(),
        graph.edges().len(),
        graph.waves().len()
    );

    if !manifest.parameters.is_empty() {
        println!("parameters:");
        for (name, parameter) in &manifest.parameters {
            let mut notes = Vec::new();
            if parameter.secret {
                notes.push("secret".to_string());
            }
            match &parameter.default {
                Some(default) if !parameter.secret => notes.push(format!("default {default}")),
                Some(_) => notes.push("has default".to_string()),
                None => notes.push("required".to_string()),
            }
            println!("  {name} ({})", notes.join(", "));
        }
    }

    Ok(ExitCode::SUCCESS)
}
