use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use keel_core::secret::REDACTED;
use keel_core::{ResourceAddr, ResourceKind, Secret};
use serde_json::Value;

use crate::broker::ResolvedProperties;
use crate::error::ProviderError;
use crate::grant::{GrantOutcome, RoleGrant};
use crate::scope::ScopeHandle;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One live attribute reported by the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Plain(Value),
    Secret(Secret),
}

/// Live attributes of one resource, keyed by output name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), AttributeValue::Plain(value.into()));
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<Secret>) -> Self {
        self.0.insert(name.into(), AttributeValue::Secret(value.into()));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(AttributeValue::Plain(Value::String(s))) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON rendering safe for logs and reports.
    pub fn redacted(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        AttributeValue::Plain(value) => value.clone(),
                        AttributeValue::Secret(_) => Value::String(REDACTED.to_string()),
                    };
                    (k.clone(), rendered)
                })
                .collect(),
        )
    }

    pub(crate) fn into_inner(self) -> BTreeMap<String, AttributeValue> {
        self.0
    }
}

/// A fully resolved create-or-update call for one managed descriptor.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub addr: ResourceAddr,
    pub kind: ResourceKind,
    pub scope: ScopeHandle,
    /// Provider-facing resource name.
    pub name: String,
    pub resource_id: String,
    pub properties: ResolvedProperties,
}

/// The cloud resource API.
///
/// Implementations must give `apply_resource` upsert semantics: applying a
/// request that matches the live resource is a no-op, and the same request
/// always yields the same attributes.
pub trait Provider: Send + Sync {
    fn apply_resource<'a>(
        &'a self,
        request: &'a ApplyRequest,
    ) -> BoxFuture<'a, Result<Attributes, ProviderError>>;

    /// Read a resource owned elsewhere. `ProviderError::NotFound` when absent.
    fn read_existing<'a>(
        &'a self,
        kind: ResourceKind,
        scope: &'a ScopeHandle,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Attributes, ProviderError>>;

    fn assign_role<'a>(
        &'a self,
        grant: &'a RoleGrant,
    ) -> BoxFuture<'a, Result<GrantOutcome, ProviderError>>;
}

impl<T: Provider + ?Sized> Provider for &T {
    fn apply_resource<'a>(
        &'a self,
        request: &'a ApplyRequest,
    ) -> BoxFuture<'a, Result<Attributes, ProviderError>> {
        (**self).apply_resource(request)
    }

    fn read_existing<'a>(
        &'a self,
        kind: ResourceKind,
        scope: &'a ScopeHandle,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Attributes, ProviderError>> {
        (**self).read_existing(kind, scope, name)
    }

    fn assign_role<'a>(
        &'a self,
        grant: &'a RoleGrant,
    ) -> BoxFuture<'a, Result<GrantOutcome, ProviderError>> {
        (**self).assign_role(grant)
    }
}

impl<T: Provider + ?Sized> Provider for std::sync::Arc<T> {
    fn apply_resource<'a>(
        &'a self,
        request: &'a ApplyRequest,
    ) -> BoxFuture<'a, Result<Attributes, ProviderError>> {
        (**self).apply_resource(request)
    }

    fn read_existing<'a>(
        &'a self,
        kind: ResourceKind,
        scope: &'a ScopeHandle,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Attributes, ProviderError>> {
        (**self).read_existing(kind, scope, name)
    }

    fn assign_role<'a>(
        &'a self,
        grant: &'a RoleGrant,
    ) -> BoxFuture<'a, Result<GrantOutcome, ProviderError>> {
        (**self).assign_role(grant)
    }
}
