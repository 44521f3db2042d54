#![allow(dead_code)]

use keel_core::{Manifest, ParameterValues, ResourceKind};
use keel_provisioner::{DeploymentConfig, MemoryProvider, RetrySettings, ScopeHandle};

pub const PRIMARY_SUBSCRIPTION: &str = "11111111-1111-1111-1111-111111111111";
pub const SHARED_SUBSCRIPTION: &str = "22222222-2222-2222-2222-222222222222";
pub const PRIMARY_GROUP: &str = "rg-keel-dev";
pub const SHARED_GROUP: &str = "rg-shared";
pub const REGISTRY: &str = "sharedacr";

pub const ADMIN_PASSWORD: &str = "Db-Pa55word-7f3a";
pub const SIGNING_SEED: &str = "seed-91c2d4e8b0a7";
pub const STORAGE_PASSWORD: &str = "minio-Pa55-e61b";
pub const MASTER_SECRET: &str = "master-4d2f90aa13";

pub fn config() -> DeploymentConfig {
    let mut config = DeploymentConfig::new("dev", "westeurope", PRIMARY_SUBSCRIPTION, PRIMARY_GROUP);
    config.retry = RetrySettings {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    };
    config
}

pub fn shared_scope() -> ScopeHandle {
    ScopeHandle::new(SHARED_SUBSCRIPTION, SHARED_GROUP).unwrap()
}

pub fn primary_scope() -> ScopeHandle {
    ScopeHandle::new(PRIMARY_SUBSCRIPTION, PRIMARY_GROUP).unwrap()
}

/// Memory provider with the shared registry already in place.
pub fn provider() -> MemoryProvider {
    let provider = MemoryProvider::new();
    seed_registry(&provider);
    provider
}

pub fn seed_registry(provider: &MemoryProvider) -> String {
    provider.seed_existing(ResourceKind::ContainerRegistry, &shared_scope(), REGISTRY)
}

pub fn web_stack_params() -> ParameterValues {
    ParameterValues::new()
        .with("registry_subscription", SHARED_SUBSCRIPTION)
        .with("registry_resource_group", SHARED_GROUP)
        .with("registry_name", REGISTRY)
        .with("admin_password", ADMIN_PASSWORD)
        .with("signing_seed", SIGNING_SEED)
        .with("storage_password", STORAGE_PASSWORD)
        .with("master_secret", MASTER_SECRET)
}

pub fn web_stack() -> Manifest {
    Manifest::web_stack().unwrap()
}

pub fn secrets() -> [&'static str; 4] {
    [ADMIN_PASSWORD, SIGNING_SEED, STORAGE_PASSWORD, MASTER_SECRET]
}
