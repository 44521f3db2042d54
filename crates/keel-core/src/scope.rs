//! Administrative boundary declarations.
//!
//! Only the declaration lives here. Evaluation against parameters and
//! validation of the resulting boundary happen in the provisioner's scope
//! resolver.

use serde::{Deserialize, Serialize};

/// Parameter lookup inside a scope declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeParam {
    pub param: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeField {
    Literal(String),
    Parameter(ScopeParam),
}

impl ScopeField {
    pub fn param(name: impl Into<String>) -> Self {
        Self::Parameter(ScopeParam { param: name.into() })
    }

    pub fn parameter_name(&self) -> Option<&str> {
        match self {
            Self::Literal(_) => None,
            Self::Parameter(p) => Some(&p.param),
        }
    }
}

/// Where a descriptor lives. A missing subscription means the deployment's
/// own subscription; a descriptor without any scope lives in the primary scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<ScopeField>,
    pub resource_group: ScopeField,
}

impl ScopeSpec {
    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.subscription
            .iter()
            .chain(std::iter::once(&self.resource_group))
            .filter_map(ScopeField::parameter_name)
    }
}
