//! In-process simulated cloud.
//!
//! Implements [`Provider`] with the semantics the engine relies on: upsert
//! per resource id, deterministic identifiers, keys generated once and kept
//! across re-applies, and grants keyed by their idempotency key. Faults can
//! be injected per descriptor name, and every call is recorded so callers can
//! inspect ordering and concurrency afterwards.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use keel_core::{ResourceAddr, ResourceKind};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::grant::{GrantOutcome, RoleGrant};
use crate::provider::{ApplyRequest, AttributeValue, Attributes, BoxFuture, Provider};
use crate::scope::ScopeHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    ApplyStarted(ResourceAddr),
    ApplyFinished { addr: ResourceAddr, changed: bool },
    ApplyFailed(ResourceAddr),
    Read { kind: ResourceKind, name: String },
    RoleRequested { key: Uuid },
    RoleAssigned { key: Uuid, created: bool },
    RoleDenied { key: Uuid },
}

#[derive(Debug, Clone)]
struct StoredResource {
    kind: ResourceKind,
    properties: Value,
    attributes: Attributes,
    revision: u32,
}

#[derive(Default)]
struct Inner {
    /// Keyed by lower-cased resource id.
    resources: BTreeMap<String, StoredResource>,
    grants: BTreeMap<Uuid, RoleGrant>,
    next_faults: HashMap<String, VecDeque<ProviderError>>,
    permanent_faults: HashMap<String, ProviderError>,
    grant_faults: VecDeque<ProviderError>,
    grants_denied: Option<String>,
    events: Vec<ProviderEvent>,
    received: HashMap<String, Value>,
    in_flight: usize,
    max_in_flight: usize,
}

impl Inner {
    fn begin(&mut self, event: ProviderEvent) {
        self.in_flight += 1;
        self.max_in_flight = self.max_in_flight.max(self.in_flight);
        self.events.push(event);
    }

    fn take_fault(&mut self, name: &str) -> Option<ProviderError> {
        if let Some(err) = self.permanent_faults.get(name) {
            return Some(err.clone());
        }
        self.next_faults.get_mut(name).and_then(VecDeque::pop_front)
    }

    fn find(&self, resource_id: &str) -> Option<&StoredResource> {
        self.resources.get(&resource_id.to_ascii_lowercase())
    }

    fn environment_domain(&self, properties: &Value) -> Result<Option<String>, ProviderError> {
        let Some(env_id) = properties.get("environment_id").and_then(Value::as_str) else {
            return Ok(None);
        };
        self.find(env_id)
            .filter(|r| r.kind == ResourceKind::ContainerEnvironment)
            .and_then(|r| r.attributes.get_str("default_domain").map(str::to_string))
            .map(Some)
            .ok_or_else(|| ProviderError::Permanent(format!("environment `{env_id}` not found")))
    }

    /// A container app pulling with a managed identity needs a role on the
    /// registry before its first revision can start.
    fn check_pull_access(&self, properties: &Value) -> Result<(), ProviderError> {
        let Some(registry) = properties.get("registry") else {
            return Ok(());
        };
        let (Some(server), Some(identity_id)) = (
            registry.get("server").and_then(Value::as_str),
            registry.get("identity").and_then(Value::as_str),
        ) else {
            return Ok(());
        };

        let principal = self
            .find(identity_id)
            .and_then(|r| r.attributes.get_str("principal_id"))
            .ok_or_else(|| ProviderError::Permanent(format!("identity `{identity_id}` not found")))?;
        let registry_id = self
            .resources
            .iter()
            .find(|(_, r)| {
                r.kind == ResourceKind::ContainerRegistry
                    && r.attributes.get_str("login_server") == Some(server)
            })
            .map(|(id, _)| id.as_str())
            .ok_or_else(|| ProviderError::Permanent(format!("registry `{server}` not found")))?;

        let authorized = self.grants.values().any(|g| {
            g.principal_id.eq_ignore_ascii_case(principal)
                && g.target.eq_ignore_ascii_case(registry_id)
        });
        if authorized {
            Ok(())
        } else {
            Err(ProviderError::Permanent(format!(
                "identity `{identity_id}` is not authorized to pull from `{server}`"
            )))
        }
    }
}

#[derive(Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated network time per call. Needed to observe concurrency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Create a resource owned by someone else, e.g. a shared registry.
    pub fn seed_existing(&self, kind: ResourceKind, scope: &ScopeHandle, name: &str) -> String {
        let resource_id = scope.resource_id(kind, name);
        let attributes = generate(kind, name, &resource_id, &Value::Null, None, None);
        self.lock().resources.insert(
            resource_id.to_ascii_lowercase(),
            StoredResource {
                kind,
                properties: Value::Null,
                attributes,
                revision: 1,
            },
        );
        resource_id
    }

    /// Fail the next call for descriptor (or existing resource) `name`.
    /// Queued faults are consumed in order.
    pub fn fail_next(&self, name: &str, error: ProviderError) {
        self.lock()
            .next_faults
            .entry(name.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn fail_always(&self, name: &str, error: ProviderError) {
        self.lock().permanent_faults.insert(name.to_string(), error);
    }

    pub fn fail_next_grant(&self, error: ProviderError) {
        self.lock().grant_faults.push_back(error);
    }

    /// Refuse every role assignment, as for a caller without rights in the
    /// target scope.
    pub fn deny_grants(&self, message: &str) {
        self.lock().grants_denied = Some(message.to_string());
    }

    pub fn events(&self) -> Vec<ProviderEvent> {
        self.lock().events.clone()
    }

    /// Descriptors in the order their applies completed successfully.
    pub fn applied(&self) -> Vec<ResourceAddr> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ProviderEvent::ApplyFinished { addr, .. } => Some(addr.clone()),
                _ => None,
            })
            .collect()
    }

    /// Apply attempts made for descriptor `name`, failed ones included.
    pub fn apply_calls(&self, name: &str) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, ProviderEvent::ApplyStarted(addr) if addr.name == name))
            .count()
    }

    pub fn read_calls(&self, name: &str) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, ProviderEvent::Read { name: n, .. } if n == name))
            .count()
    }

    /// Total provider calls of any kind.
    pub fn call_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    ProviderEvent::ApplyStarted(_)
                        | ProviderEvent::Read { .. }
                        | ProviderEvent::RoleRequested { .. }
                )
            })
            .count()
    }

    pub fn grants(&self) -> Vec<RoleGrant> {
        self.lock().grants.values().cloned().collect()
    }

    /// Plaintext properties last delivered for descriptor `name`.
    pub fn received_properties(&self, name: &str) -> Option<Value> {
        self.lock().received.get(name).cloned()
    }

    pub fn revision(&self, resource_id: &str) -> Option<u32> {
        self.lock().find(resource_id).map(|r| r.revision)
    }

    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    async fn apply(&self, request: &ApplyRequest) -> Result<Attributes, ProviderError> {
        let fault = {
            let mut inner = self.lock();
            inner.begin(ProviderEvent::ApplyStarted(request.addr.clone()));
            inner.take_fault(&request.addr.name)
        };

        self.delay().await;

        let mut inner = self.lock();
        inner.in_flight -= 1;
        let result = match fault {
            Some(err) => Err(err),
            None => upsert(&mut inner, request),
        };
        match &result {
            Ok((_, changed)) => inner.events.push(ProviderEvent::ApplyFinished {
                addr: request.addr.clone(),
                changed: *changed,
            }),
            Err(_) => inner.events.push(ProviderEvent::ApplyFailed(request.addr.clone())),
        }
        result.map(|(attributes, _)| attributes)
    }

    async fn read(
        &self,
        kind: ResourceKind,
        scope: &ScopeHandle,
        name: &str,
    ) -> Result<Attributes, ProviderError> {
        let fault = {
            let mut inner = self.lock();
            inner.begin(ProviderEvent::Read {
                kind,
                name: name.to_string(),
            });
            inner.take_fault(name)
        };

        self.delay().await;

        let mut inner = self.lock();
        inner.in_flight -= 1;
        if let Some(err) = fault {
            return Err(err);
        }
        inner
            .find(&scope.resource_id(kind, name))
            .filter(|r| r.kind == kind)
            .map(|r| r.attributes.clone())
            .ok_or_else(|| ProviderError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    async fn assign(&self, grant: &RoleGrant) -> Result<GrantOutcome, ProviderError> {
        let fault = {
            let mut inner = self.lock();
            inner.begin(ProviderEvent::RoleRequested { key: grant.key });
            match &inner.grants_denied {
                Some(message) => Some(ProviderError::Forbidden(message.clone())),
                None => inner.grant_faults.pop_front(),
            }
        };

        self.delay().await;

        let mut inner = self.lock();
        inner.in_flight -= 1;
        if let Some(err) = fault {
            if matches!(err, ProviderError::Forbidden(_)) {
                inner.events.push(ProviderEvent::RoleDenied { key: grant.key });
            }
            return Err(err);
        }

        let principal_exists = inner.resources.values().any(|r| {
            r.kind == ResourceKind::ManagedIdentity
                && r.attributes
                    .get_str("principal_id")
                    .is_some_and(|p| p.eq_ignore_ascii_case(&grant.principal_id))
        });
        if !principal_exists {
            return Err(ProviderError::NotFound {
                kind: ResourceKind::ManagedIdentity,
                name: grant.principal_id.clone(),
            });
        }
        if inner.find(&grant.target).is_none() {
            return Err(ProviderError::Permanent(format!(
                "grant target `{}` not found",
                grant.target
            )));
        }

        let created = !inner.grants.contains_key(&grant.key);
        if created {
            inner.grants.insert(grant.key, grant.clone());
        }
        inner.events.push(ProviderEvent::RoleAssigned {
            key: grant.key,
            created,
        });
        Ok(if created {
            GrantOutcome::Created
        } else {
            GrantOutcome::AlreadyExists
        })
    }
}

/// Create or update, returning the attributes and whether anything changed.
fn upsert(inner: &mut Inner, request: &ApplyRequest) -> Result<(Attributes, bool), ProviderError> {
    if request.kind == ResourceKind::RoleAssignment {
        return Err(ProviderError::Permanent(
            "role assignments are created through assign_role".into(),
        ));
    }

    let properties = request.properties.expose();
    if request.kind == ResourceKind::ContainerApp {
        inner.check_pull_access(&properties)?;
    }
    let domain = inner.environment_domain(&properties)?;

    let key = request.resource_id.to_ascii_lowercase();
    let existing = inner.resources.get(&key);
    if let Some(existing) = existing
        && existing.kind != request.kind
    {
        return Err(ProviderError::Permanent(format!(
            "`{}` already exists as {}",
            request.resource_id, existing.kind
        )));
    }

    let (changed, revision) = match existing {
        Some(existing) if existing.properties == properties => (false, existing.revision),
        Some(existing) => (true, existing.revision + 1),
        None => (true, 1),
    };

    let attributes = match existing {
        Some(existing) if !changed => existing.attributes.clone(),
        _ => {
            let mut stored_revision = existing.cloned();
            if let Some(stored) = &mut stored_revision {
                stored.revision = revision;
            }
            generate(
                request.kind,
                &request.name,
                &request.resource_id,
                &properties,
                domain.as_deref(),
                stored_revision.as_ref(),
            )
        }
    };

    inner.received.insert(request.addr.name.clone(), properties.clone());
    inner.resources.insert(
        key,
        StoredResource {
            kind: request.kind,
            properties,
            attributes: attributes.clone(),
            revision,
        },
    );
    Ok((attributes, changed))
}

fn stable_id(label: &str, resource_id: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{label}:{}", resource_id.to_ascii_lowercase()).as_bytes(),
    )
}

/// Keys are generated once and survive updates.
fn keep_or_generate(previous: Option<&StoredResource>, name: &str) -> String {
    previous
        .and_then(|r| match r.attributes.get(name) {
            Some(AttributeValue::Secret(s)) => Some(s.expose().to_string()),
            _ => None,
        })
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}

fn generate(
    kind: ResourceKind,
    name: &str,
    resource_id: &str,
    properties: &Value,
    domain: Option<&str>,
    previous: Option<&StoredResource>,
) -> Attributes {
    let base = Attributes::new()
        .with("name", name)
        .with("resource_id", resource_id);
    let domain = domain.unwrap_or("internal");
    let revision = previous.map_or(1, |r| r.revision);

    match kind {
        ResourceKind::ManagedIdentity => base
            .with("principal_id", stable_id("principal", resource_id).to_string())
            .with("client_id", stable_id("client", resource_id).to_string()),
        ResourceKind::ContainerRegistry => {
            base.with("login_server", format!("{}.azurecr.io", name.to_ascii_lowercase()))
        }
        ResourceKind::RoleAssignment => base.with("grant_key", name),
        ResourceKind::Cache => base
            .with("host_name", format!("{name}.redis.cache.windows.net"))
            .with("ssl_port", 6380)
            .with_secret("primary_key", keep_or_generate(previous, "primary_key")),
        ResourceKind::Database => base
            .with("fqdn", format!("{name}.postgres.database.azure.com"))
            .with(
                "admin_login",
                properties
                    .get("administrator_login")
                    .cloned()
                    .unwrap_or(Value::Null),
            ),
        ResourceKind::ObjectStorage => base
            .with("internal_url", format!("http://{name}.internal.{domain}"))
            .with_secret("access_key", keep_or_generate(previous, "access_key")),
        ResourceKind::ContainerEnvironment => {
            let location = properties
                .get("location")
                .and_then(Value::as_str)
                .unwrap_or("westeurope");
            let label = stable_id("domain", resource_id).simple().to_string();
            base.with(
                "default_domain",
                format!("{}.{location}.azurecontainerapps.io", &label[..10]),
            )
        }
        ResourceKind::ContainerApp => {
            let fqdn = format!("{name}.{domain}");
            base.with("url", format!("https://{fqdn}"))
                .with("fqdn", fqdn)
                .with("latest_revision", format!("{name}--{revision:07}"))
        }
    }
}

impl Provider for MemoryProvider {
    fn apply_resource<'a>(
        &'a self,
        request: &'a ApplyRequest,
    ) -> BoxFuture<'a, Result<Attributes, ProviderError>> {
        Box::pin(self.apply(request))
    }

    fn read_existing<'a>(
        &'a self,
        kind: ResourceKind,
        scope: &'a ScopeHandle,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Attributes, ProviderError>> {
        Box::pin(self.read(kind, scope, name))
    }

    fn assign_role<'a>(
        &'a self,
        grant: &'a RoleGrant,
    ) -> BoxFuture<'a, Result<GrantOutcome, ProviderError>> {
        Box::pin(self.assign(grant))
    }
}
