pub mod apply;
pub mod config;
pub mod plan;
pub mod validate;

use std::path::Path;

use keel_core::Manifest;

/// Load `path`, or the built-in web stack when no path was given.
pub fn load_manifest(path: Option<&Path>) -> eyre::Result<Manifest> {
    let manifest = match path {
        Some(path) => Manifest::load(path)
            .map_err(|e| eyre::eyre!("failed to load manifest {}: {e}", path.display()))?,
        None => Manifest::web_stack()?,
    };
    tracing::debug!(resources = manifest.resources.len(), "manifest loaded");
    Ok(manifest)
}
