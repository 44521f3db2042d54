//! Scope resolution.
//!
//! Maps a descriptor to the administrative boundary it is created in or read
//! from. The resolver never creates boundaries; it evaluates the declaration
//! against the bound parameters, checks the result is well-formed and passes
//! it through to the provider.

use std::fmt;

use keel_core::{
    BoundParameters, ParameterValue, ResourceDescriptor, ResourceKind, ScopeField,
};
use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;

const MAX_RESOURCE_GROUP_LEN: usize = 90;

/// A validated subscription + resource group pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeHandle {
    pub subscription_id: String,
    pub resource_group: String,
}

impl ScopeHandle {
    pub fn new(subscription_id: &str, resource_group: &str) -> Result<Self, String> {
        let subscription = uuid::Uuid::parse_str(subscription_id)
            .map_err(|_| format!("subscription `{subscription_id}` is not a GUID"))?;
        validate_resource_group(resource_group)?;
        Ok(Self {
            subscription_id: subscription.hyphenated().to_string(),
            resource_group: resource_group.to_string(),
        })
    }

    /// Fully-qualified id of a resource living in this scope.
    pub fn resource_id(&self, kind: ResourceKind, name: &str) -> String {
        format!("{self}/providers/{}/{name}", kind.provider_type())
    }

    /// Recover the scope a fully-qualified resource id lives in.
    pub fn from_resource_id(resource_id: &str) -> Option<Self> {
        let mut parts = resource_id.trim_start_matches('/').split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(sub), Some(g), Some(rg))
                if s.eq_ignore_ascii_case("subscriptions")
                    && g.eq_ignore_ascii_case("resourceGroups") =>
            {
                Self::new(sub, rg).ok()
            }
            _ => None,
        }
    }

    /// Scopes compare case-insensitively on the provider side.
    pub fn same_as(&self, other: &ScopeHandle) -> bool {
        self.subscription_id.eq_ignore_ascii_case(&other.subscription_id)
            && self.resource_group.eq_ignore_ascii_case(&other.resource_group)
    }
}

impl fmt::Display for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )
    }
}

fn validate_resource_group(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_RESOURCE_GROUP_LEN {
        return Err(format!(
            "resource group `{name}` must be 1-{MAX_RESOURCE_GROUP_LEN} characters"
        ));
    }
    if name.ends_with('.') {
        return Err(format!("resource group `{name}` must not end with a period"));
    }
    let valid = name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')'));
    if !valid {
        return Err(format!("resource group `{name}` contains invalid characters"));
    }
    Ok(())
}

/// Where one descriptor lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    pub handle: ScopeHandle,
    /// True when the boundary differs from the deployment's primary scope.
    pub foreign: bool,
}

pub struct ScopeResolver<'a> {
    primary: ScopeHandle,
    params: &'a BoundParameters,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(primary: ScopeHandle, params: &'a BoundParameters) -> Self {
        Self { primary, params }
    }

    pub fn resolve(&self, descriptor: &ResourceDescriptor) -> Result<ResolvedScope, ProvisionerError> {
        let Some(spec) = &descriptor.scope else {
            return Ok(ResolvedScope {
                handle: self.primary.clone(),
                foreign: false,
            });
        };

        let unresolved = |reason: String| ProvisionerError::ScopeUnresolved {
            addr: descriptor.addr(),
            reason,
        };

        let subscription = match &spec.subscription {
            Some(field) => self.evaluate(field).map_err(unresolved)?,
            None => self.primary.subscription_id.clone(),
        };
        let resource_group = self.evaluate(&spec.resource_group).map_err(unresolved)?;

        let handle = ScopeHandle::new(&subscription, &resource_group).map_err(unresolved)?;
        let foreign = !handle.same_as(&self.primary);
        Ok(ResolvedScope { handle, foreign })
    }

    fn evaluate(&self, field: &ScopeField) -> Result<String, String> {
        let name = match field {
            ScopeField::Literal(value) => return Ok(value.clone()),
            ScopeField::Parameter(p) => p.param.as_str(),
        };
        match self.params.get(name) {
            Some(ParameterValue::Plain(value)) => value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| format!("parameter `{name}` is not a string")),
            Some(ParameterValue::Secret(_)) => {
                Err(format!("parameter `{name}` is secret and cannot name a scope"))
            }
            None => Err(format!("parameter `{name}` was never supplied")),
        }
    }
}
