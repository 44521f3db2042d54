//! Cross-scope role grants.
//!
//! A grant binds a principal to a role on a target resource that usually
//! lives in another administrative scope (a shared registry owned by a
//! different subscription). Grants are keyed by a deterministic id derived
//! from `(target, role, principal)`, so assigning the same grant twice is a
//! no-op on the provider side. Grants are never deleted by the engine.

use keel_core::ResourceKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::Redactor;
use crate::config::DeploymentConfig;
use crate::error::{ProviderError, ProvisionerError};
use crate::provider::{Attributes, Provider};
use crate::retry::{RetryOutcome, retry_transient};
use crate::scope::ScopeHandle;

/// Namespace for grant keys. Changing it re-keys every grant.
const GRANT_NAMESPACE: Uuid = Uuid::from_u128(0x5d0c_7a3e_1b44_4f6e_9a8d_2c1e_0b7f_4e21);

/// Deterministic idempotency key. Resource ids and GUIDs compare
/// case-insensitively on the provider, so inputs are lower-cased.
pub fn grant_key(target: &str, role_id: &str, principal_id: &str) -> Uuid {
    let name = format!(
        "{}|{}|{}",
        target.to_ascii_lowercase(),
        role_id.to_ascii_lowercase(),
        principal_id.to_ascii_lowercase()
    );
    Uuid::new_v5(&GRANT_NAMESPACE, name.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub key: Uuid,
    pub principal_id: String,
    /// Fully-qualified id of the resource the role applies to.
    pub target: String,
    pub role_id: String,
}

impl RoleGrant {
    pub fn new(
        principal_id: impl Into<String>,
        target: impl Into<String>,
        role_id: impl Into<String>,
    ) -> Self {
        let principal_id = principal_id.into();
        let target = target.into();
        let role_id = role_id.into();
        Self {
            key: grant_key(&target, &role_id, &principal_id),
            principal_id,
            target,
            role_id,
        }
    }

    /// Provider id of the role assignment itself.
    pub fn resource_id(&self) -> String {
        format!(
            "{}/providers/{}/{}",
            self.target,
            ResourceKind::RoleAssignment.provider_type(),
            self.key
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantResult {
    pub grant: RoleGrant,
    pub outcome: GrantOutcome,
    /// The target lives outside the deployment's primary scope.
    pub cross_scope: bool,
}

impl GrantResult {
    /// Outputs of a `role_assignment` descriptor.
    pub fn attributes(&self) -> Attributes {
        Attributes::new()
            .with("name", self.grant.key.to_string())
            .with("resource_id", self.grant.resource_id())
            .with("grant_key", self.grant.key.to_string())
    }
}

pub struct GrantModule<'a, P: ?Sized> {
    provider: &'a P,
    config: &'a DeploymentConfig,
}

impl<'a, P: Provider + ?Sized> GrantModule<'a, P> {
    pub fn new(provider: &'a P, config: &'a DeploymentConfig) -> Self {
        Self { provider, config }
    }

    /// Assign `role` (a configured role name or a role definition id) to
    /// `principal_id` on `target`.
    ///
    /// Transient provider errors are retried. A provider refusal is
    /// [`ProvisionerError::GrantDenied`] and is fatal to the run.
    pub async fn grant(
        &self,
        principal_id: &str,
        target: &str,
        role: &str,
    ) -> Result<GrantResult, ProvisionerError> {
        self.grant_with_attempts(principal_id, target, role, &Redactor::default())
            .await
            .result
    }

    /// Provider errors are logged through `redactor` while retrying.
    pub(crate) async fn grant_with_attempts(
        &self,
        principal_id: &str,
        target: &str,
        role: &str,
        redactor: &Redactor,
    ) -> RetryOutcome<GrantResult, ProvisionerError> {
        let prepared = self.prepare(principal_id, target, role);
        let (grant, cross_scope) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                return RetryOutcome {
                    result: Err(e),
                    attempts: 0,
                };
            }
        };

        tracing::info!(
            key = %grant.key,
            role_id = %grant.role_id,
            target = %grant.target,
            cross_scope,
            "assigning role"
        );

        let outcome = retry_transient(&self.config.retry_config(), "assign_role", redactor, |_| {
            self.provider.assign_role(&grant)
        })
        .await;

        let attempts = outcome.attempts;
        let result = match outcome.result {
            Ok(outcome) => {
                tracing::info!(key = %grant.key, ?outcome, "role assignment in place");
                Ok(GrantResult {
                    grant,
                    outcome,
                    cross_scope,
                })
            }
            Err(ProviderError::Forbidden(message)) => Err(ProvisionerError::GrantDenied {
                principal_id: grant.principal_id,
                target: grant.target,
                role_id: grant.role_id,
                message,
            }),
            Err(source) => Err(ProvisionerError::GrantFailed {
                target: grant.target,
                role_id: grant.role_id,
                source,
            }),
        };
        RetryOutcome { result, attempts }
    }

    fn prepare(
        &self,
        principal_id: &str,
        target: &str,
        role: &str,
    ) -> Result<(RoleGrant, bool), ProvisionerError> {
        let role_id = self
            .config
            .role_id(role)
            .ok_or_else(|| ProvisionerError::UnknownRole(role.to_string()))?;
        let target_scope = ScopeHandle::from_resource_id(target)
            .ok_or_else(|| ProvisionerError::InvalidGrantTarget(target.to_string()))?;
        let cross_scope = !target_scope.same_as(&self.config.primary_scope()?);
        Ok((RoleGrant::new(principal_id, target, role_id), cross_scope))
    }
}
