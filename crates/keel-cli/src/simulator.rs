//! Local stand-in for the cloud.
//!
//! `keel apply` runs against the in-memory provider. Resources a manifest
//! only reads (`mode: existing`) are owned by someone else, so they are
//! seeded into the simulated cloud before the run starts.

use keel_core::{BoundParameters, Manifest, Mode};
use keel_provisioner::{DeploymentConfig, MemoryProvider, OutputBroker, ScopeResolver};

pub fn provider(
    manifest: &Manifest,
    params: &BoundParameters,
    config: &DeploymentConfig,
) -> eyre::Result<MemoryProvider> {
    let provider = MemoryProvider::new();
    let resolver = ScopeResolver::new(config.primary_scope()?, params);
    // existing descriptors only read parameters, never outputs
    let broker = OutputBroker::new(manifest, params);

    for descriptor in manifest.resources.iter().filter(|d| d.mode == Mode::Existing) {
        let addr = descriptor.addr();
        // Left unseeded on failure; the run reports the same error against
        // the descriptor.
        let scope = match resolver.resolve(descriptor) {
            Ok(scope) => scope,
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "existing resource not seeded");
                continue;
            }
        };
        let name = match descriptor.properties.get("name") {
            Some(value) => {
                let resolved = broker.resolve_value(&descriptor.name, value).ok();
                match resolved.as_ref().and_then(|v| v.as_str()) {
                    Some(name) => name.to_string(),
                    None => {
                        tracing::warn!(addr = %addr, "existing resource not seeded, name unresolved");
                        continue;
                    }
                }
            }
            None => config.resource_name(&descriptor.name),
        };
        let resource_id = provider.seed_existing(descriptor.kind, &scope.handle, &name);
        tracing::info!(addr = %addr, %resource_id, "seeded existing resource");
    }
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use keel_core::ParameterValues;
    use keel_provisioner::{Orchestrator, RunState};

    use super::*;

    const PRIMARY: &str = "11111111-1111-1111-1111-111111111111";
    const SHARED: &str = "22222222-2222-2222-2222-222222222222";

    fn config() -> DeploymentConfig {
        let mut config = DeploymentConfig::new("dev", "westeurope", PRIMARY, "rg-keel-dev");
        config.retry.initial_delay_ms = 1;
        config.retry.max_delay_ms = 2;
        config
    }

    fn supplied() -> ParameterValues {
        ParameterValues::new()
            .with("registry_subscription", SHARED)
            .with("registry_resource_group", "rg-shared")
            .with("registry_name", "sharedacr")
            .with("admin_password", "pw-1")
            .with("signing_seed", "seed-1")
            .with("storage_password", "pw-2")
            .with("master_secret", "secret-1")
    }

    #[tokio::test]
    async fn seeded_web_stack_applies() {
        let manifest = Manifest::web_stack().unwrap();
        let config = config();
        let bound = config.bind(&manifest, &supplied()).unwrap();

        let provider = provider(&manifest, &bound, &config).unwrap();
        let report = Orchestrator::new(provider, config).run(&manifest, &bound).await.unwrap();

        assert_eq!(report.state, RunState::Succeeded);
    }

    #[tokio::test]
    async fn unresolvable_existing_is_left_to_the_run() {
        let manifest = Manifest::web_stack().unwrap();
        let config = config();
        let supplied = supplied().with("registry_subscription", "not-a-guid");
        let bound = config.bind(&manifest, &supplied).unwrap();

        let provider = provider(&manifest, &bound, &config).unwrap();
        assert_eq!(provider.call_count(), 0);

        let report = Orchestrator::new(provider, config).run(&manifest, &bound).await.unwrap();
        assert_ne!(report.state, RunState::Succeeded);
        assert!(report.resource("registry").unwrap().error.is_some());
    }
}
