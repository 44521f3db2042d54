//! keel-provisioner
//!
//! Engine that provisions a keel manifest against a cloud provider.
//!
//! Public API:
//! - `DependencyGraph::build()`: derive and cycle-check the DAG
//! - `Plan::build()`: waves of independent descriptors, no provider calls
//! - `Orchestrator::run()`: apply the graph, returning a redacted `RunReport`
//! - `GrantModule::grant()`: idempotent cross-scope role assignment
//! - `deploy()`: convenience: bind parameters → run

pub mod broker;
pub mod config;
pub mod error;
pub mod grant;
pub mod graph;
pub mod orchestrate;
pub mod plan;
pub mod provider;
pub mod providers;
pub mod report;
pub mod retry;
pub mod scope;

pub use crate::broker::{OutputBroker, Redactor, ResolvedProperties, ResolvedValue};
pub use crate::config::{ACR_PULL_ROLE_ID, DeploymentConfig, RetrySettings};
pub use crate::error::{ProviderError, ProvisionerError, format_err_chain};
pub use crate::grant::{GrantModule, GrantOutcome, GrantResult, RoleGrant, grant_key};
pub use crate::graph::DependencyGraph;
pub use crate::orchestrate::Orchestrator;
pub use crate::plan::{Plan, PlanEntry};
pub use crate::provider::{ApplyRequest, AttributeValue, Attributes, BoxFuture, Provider};
pub use crate::providers::{MemoryProvider, ProviderEvent};
pub use crate::report::{
    DescriptorReport, DescriptorState, ReportPersistence, RunOutput, RunReport, RunState,
};
pub use crate::retry::{RetryConfig, RetryOutcome, retry_transient};
pub use crate::scope::{ResolvedScope, ScopeHandle, ScopeResolver};

use keel_core::{Manifest, ParameterValues};

/// Bind `supplied` against the manifest and run it once.
pub async fn deploy<P: Provider>(
    provider: P,
    config: DeploymentConfig,
    manifest: &Manifest,
    supplied: &ParameterValues,
) -> Result<RunReport, ProvisionerError> {
    let orchestrator = Orchestrator::new(provider, config);
    let params = orchestrator.bind(manifest, supplied)?;
    orchestrator.run(manifest, &params).await
}
