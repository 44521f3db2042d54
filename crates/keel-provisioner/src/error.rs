use keel_core::{ManifestError, ResourceAddr, ResourceKind};
use thiserror::Error;

/// Failure reported by the provider collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Timeouts, throttling, conflicts that clear on their own. Retried.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider rejected the request: {0}")]
    Permanent(String),

    #[error("{kind} `{name}` not found")]
    NotFound { kind: ResourceKind, name: String },

    /// The caller lacks rights for the operation (e.g. assigning roles).
    #[error("access denied: {0}")]
    Forbidden(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("dependency cycle between: {}", join(.ids))]
    Cycle { ids: Vec<ResourceAddr> },

    #[error("{addr}: scope cannot be resolved: {reason}")]
    ScopeUnresolved { addr: ResourceAddr, reason: String },

    #[error("{consumer}: reference `{reference}` resolved before its producer was applied")]
    UnresolvedReference { consumer: String, reference: String },

    #[error("{consumer}: provider did not report output `{reference}`")]
    MissingOutput { consumer: String, reference: String },

    #[error("{consumer}: parameter `{name}` was never supplied")]
    MissingParameter { consumer: String, name: String },

    #[error("{addr}: invalid property `{property}`: {reason}")]
    InvalidProperty {
        addr: ResourceAddr,
        property: String,
        reason: String,
    },

    #[error("role `{role_id}` for principal `{principal_id}` on `{target}` denied: {message}")]
    GrantDenied {
        principal_id: String,
        target: String,
        role_id: String,
        message: String,
    },

    #[error("role `{role_id}` on `{target}` could not be assigned: {source}")]
    GrantFailed {
        target: String,
        role_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("unknown role `{0}`: not configured and not a role definition id")]
    UnknownRole(String),

    #[error("grant target `{0}` is not a fully-qualified resource id")]
    InvalidGrantTarget(String),

    #[error("{addr}: {source}")]
    Provider {
        addr: ResourceAddr,
        #[source]
        source: ProviderError,
    },

    #[error("{addr}: not applied because dependency {dependency} failed")]
    DependencyFailed {
        addr: ResourceAddr,
        dependency: ResourceAddr,
    },

    #[error("{addr}: not started because the run was aborted")]
    Aborted { addr: ResourceAddr },

    #[error("{0} is not part of this run")]
    UnknownResource(ResourceAddr),

    #[error("outputs for {0} were captured twice")]
    DuplicateCapture(ResourceAddr),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionerError {
    /// Errors that stop the whole run rather than just the failing subtree.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::GrantDenied { .. } | Self::UnresolvedReference { .. }
        )
    }
}

fn join(ids: &[ResourceAddr]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Walk the full error chain and join all causes into one string.
///
/// Provider errors often have terse `Display` impls but useful detail in
/// the source chain.
pub fn format_err_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !msg.ends_with(&cause_msg) {
            msg.push_str(": ");
            msg.push_str(&cause_msg);
        }
        source = cause.source();
    }
    msg
}
