use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::addr::ResourceAddr;
use crate::error::ManifestError;
use crate::kind::ResourceKind;
use crate::params::{self, BoundParameters, Parameter, ParameterValue, ParameterValues};
use crate::scope::ScopeSpec;
use crate::value::{PropertyValue, Reference};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Created, updated and owned by this deployment.
    #[default]
    Managed,
    /// Read-only reference to a resource owned elsewhere, usually in a
    /// foreign scope. Never applied, only read.
    Existing,
}

/// Immutable declaration of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Symbolic name, unique within the manifest. Other descriptors refer to
    /// this resource's outputs through it.
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeSpec>,
    /// Ordering constraints that no property reference expresses
    /// (e.g. an app that needs a pull grant but reads none of its outputs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl ResourceDescriptor {
    pub fn addr(&self) -> ResourceAddr {
        ResourceAddr::new(self.kind, self.name.clone())
    }

    /// All references made by properties and the scope declaration.
    pub fn references(&self) -> Vec<Reference> {
        let mut refs: Vec<Reference> = self
            .properties
            .values()
            .flat_map(PropertyValue::references)
            .collect();
        if let Some(scope) = &self.scope {
            refs.extend(scope.parameters().map(|p| Reference::Parameter(p.to_string())));
        }
        refs
    }

    /// Names of the descriptors that must be applied before this one.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps: BTreeSet<String> = self
            .references()
            .into_iter()
            .filter_map(|r| match r {
                Reference::Output(output) => Some(output.resource),
                Reference::Parameter(_) => None,
            })
            .collect();
        deps.extend(self.depends_on.iter().cloned());
        deps
    }
}

/// The full declaration: parameters, resources and run outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub parameters: BTreeMap<String, Parameter>,
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub outputs: BTreeMap<String, PropertyValue>,
}

impl Manifest {
    /// Bump when the manifest shape changes.
    pub const VERSION: u32 = 1;

    /// Names that would collide with template syntax.
    pub const RESERVED_NAMES: &'static [&'static str] = &["params", "outputs"];

    pub fn from_json(source: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_str(source)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_value(value: Value) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_value(value)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|d| d.name == name)
    }

    /// Check every structural rule that can be decided without a provider:
    /// unique names, resolvable references, known output attributes,
    /// required properties, and read-only existing resources.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.version != Self::VERSION {
            return Err(ManifestError::UnsupportedVersion {
                found: self.version,
                supported: Self::VERSION,
            });
        }

        let mut kinds: HashMap<&str, ResourceKind> = HashMap::new();
        for descriptor in &self.resources {
            let name = descriptor.name.as_str();
            if Self::RESERVED_NAMES.contains(&name) {
                return Err(ManifestError::ReservedName(name.to_string()));
            }
            if !is_valid_name(name) {
                return Err(ManifestError::InvalidName(name.to_string()));
            }
            if kinds.insert(name, descriptor.kind).is_some() {
                return Err(ManifestError::DuplicateResource(name.to_string()));
            }
        }

        for descriptor in &self.resources {
            match descriptor.mode {
                Mode::Managed => {
                    for property in descriptor.kind.required_properties() {
                        if !descriptor.properties.contains_key(*property) {
                            return Err(ManifestError::MissingProperty {
                                resource: descriptor.name.clone(),
                                kind: descriptor.kind,
                                property: property.to_string(),
                            });
                        }
                    }
                }
                Mode::Existing => {
                    if !descriptor.dependencies().is_empty() {
                        return Err(ManifestError::ExistingWithDependencies(
                            descriptor.name.clone(),
                        ));
                    }
                }
            }

            for target in &descriptor.depends_on {
                if !kinds.contains_key(target.as_str()) {
                    return Err(ManifestError::UnknownResource {
                        from: descriptor.name.clone(),
                        target: target.clone(),
                    });
                }
            }
            for reference in descriptor.references() {
                self.check_reference(&descriptor.name, &reference, &kinds)?;
            }
        }

        for (name, value) in &self.outputs {
            let from = format!("outputs.{name}");
            for reference in value.references() {
                self.check_reference(&from, &reference, &kinds)?;
            }
        }

        Ok(())
    }

    fn check_reference(
        &self,
        from: &str,
        reference: &Reference,
        kinds: &HashMap<&str, ResourceKind>,
    ) -> Result<(), ManifestError> {
        match reference {
            Reference::Parameter(name) => {
                if !self.parameters.contains_key(name) {
                    return Err(ManifestError::UnknownParameter {
                        from: from.to_string(),
                        name: name.clone(),
                    });
                }
            }
            Reference::Output(output) => {
                let kind = kinds.get(output.resource.as_str()).ok_or_else(|| {
                    ManifestError::UnknownResource {
                        from: from.to_string(),
                        target: output.resource.clone(),
                    }
                })?;
                if !kind.has_output(&output.attribute) {
                    return Err(ManifestError::UnknownAttribute {
                        from: from.to_string(),
                        target: output.resource.clone(),
                        kind: *kind,
                        attribute: output.attribute.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Match supplied values against the declared parameters.
    ///
    /// Supplied values win over defaults. Secret parameters are sealed here,
    /// so nothing downstream ever holds them as plain JSON. Declared
    /// parameters with no value end up in [`BoundParameters::missing`]; they
    /// only become an error once a descriptor actually needs them.
    pub fn bind(&self, supplied: &ParameterValues) -> Result<BoundParameters, ManifestError> {
        if let Some(unknown) = supplied.names().find(|n| !self.parameters.contains_key(*n)) {
            return Err(ManifestError::UndeclaredParameter(unknown.to_string()));
        }

        let mut bound = BoundParameters::default();
        for (name, declared) in &self.parameters {
            let value = supplied.get(name).cloned().or_else(|| declared.default.clone());
            match value {
                Some(value) if declared.secret => {
                    bound
                        .values
                        .insert(name.clone(), ParameterValue::Secret(params::seal(value)));
                }
                Some(value) => {
                    bound.values.insert(name.clone(), ParameterValue::Plain(value));
                }
                None => {
                    bound.missing.insert(name.clone());
                }
            }
        }
        Ok(bound)
    }

    /// The reference web stack: a managed identity granted pull access on a
    /// shared registry in a foreign scope, a cache, a database, an object
    /// storage emulator and an autoscaled container app wired to all of them
    /// through composite connection strings.
    pub fn web_stack() -> Result<Self, ManifestError> {
        Self::from_value(json!({
            "version": Self::VERSION,
            "parameters": {
                "environment": {"default": "dev", "description": "Environment label used in resource names"},
                "location": {"default": "westeurope", "description": "Region every managed resource is placed in"},
                "image_tag": {"default": "latest", "description": "Application image version"},
                "registry_subscription": {"description": "Subscription that owns the shared container registry"},
                "registry_resource_group": {"description": "Resource group of the shared container registry"},
                "registry_name": {"description": "Name of the shared container registry"},
                "admin_password": {"secret": true, "description": "Database administrator password"},
                "signing_seed": {"secret": true, "description": "Seed for application token signing"},
                "storage_password": {"secret": true, "description": "Object storage root password"},
                "master_secret": {"secret": true, "description": "Application master secret"},
            },
            "resources": [
                {
                    "name": "identity",
                    "kind": "managed_identity",
                    "properties": {"location": {"param": "location"}},
                },
                {
                    "name": "registry",
                    "kind": "container_registry",
                    "mode": "existing",
                    "scope": {
                        "subscription": {"param": "registry_subscription"},
                        "resource_group": {"param": "registry_resource_group"},
                    },
                    "properties": {"name": {"param": "registry_name"}},
                },
                {
                    "name": "registry_pull",
                    "kind": "role_assignment",
                    "properties": {
                        "principal_id": {"output": "identity.principal_id"},
                        "target": {"output": "registry.resource_id"},
                        "role": "pull",
                    },
                },
                {
                    "name": "cache",
                    "kind": "cache",
                    "properties": {
                        "location": {"param": "location"},
                        "sku": {"name": "Basic", "family": "C", "capacity": 0},
                        "enable_non_ssl_port": false,
                        "minimum_tls_version": "1.2",
                    },
                },
                {
                    "name": "database",
                    "kind": "database",
                    "properties": {
                        "location": {"param": "location"},
                        "version": "16",
                        "administrator_login": "keeladmin",
                        "administrator_password": {"param": "admin_password"},
                        "sku": {"name": "Standard_B1ms", "tier": "Burstable"},
                        "storage_gb": 32,
                        "databases": ["app"],
                    },
                },
                {
                    "name": "environment",
                    "kind": "container_environment",
                    "properties": {"location": {"param": "location"}},
                },
                {
                    "name": "storage",
                    "kind": "object_storage",
                    "properties": {
                        "location": {"param": "location"},
                        "environment_id": {"output": "environment.resource_id"},
                        "image": "minio/minio:RELEASE.2024-06-13T22-53-53Z",
                        "root_user": "keel",
                        "root_password": {"param": "storage_password"},
                        "ingress": {"external": false, "target_port": 9000},
                    },
                },
                {
                    "name": "app",
                    "kind": "container_app",
                    "depends_on": ["registry_pull"],
                    "properties": {
                        "location": {"param": "location"},
                        "environment_id": {"output": "environment.resource_id"},
                        "identity": {"output": "identity.resource_id"},
                        "image": {"template": "${registry.login_server}/keel-app:${params.image_tag}"},
                        "registry": {
                            "server": {"output": "registry.login_server"},
                            "identity": {"output": "identity.resource_id"},
                        },
                        "ingress": {"external": true, "target_port": 8080},
                        "scale": {
                            "min_replicas": 1,
                            "max_replicas": 10,
                            "rules": [
                                {"name": "http-concurrency", "http": {"concurrent_requests": 50}},
                            ],
                        },
                        "env": {
                            "APP_ENV": {"param": "environment"},
                            "AZURE_CLIENT_ID": {"output": "identity.client_id"},
                            "DATABASE_URL": {"template": "postgres://${database.admin_login}:${params.admin_password}@${database.fqdn}:5432/app?sslmode=require"},
                            "REDIS_URL": {"template": "rediss://:${cache.primary_key}@${cache.host_name}:${cache.ssl_port}"},
                            "STORAGE_ENDPOINT": {"output": "storage.internal_url"},
                            "STORAGE_ACCESS_KEY": {"output": "storage.access_key"},
                            "STORAGE_PASSWORD": {"param": "storage_password"},
                            "SIGNING_SEED": {"param": "signing_seed"},
                            "MASTER_SECRET": {"param": "master_secret"},
                        },
                    },
                },
            ],
            "outputs": {
                "public_url": {"output": "app.url"},
                "latest_revision": {"output": "app.latest_revision"},
                "storage_url": {"output": "storage.internal_url"},
                "identity_client_id": {"output": "identity.client_id"},
            },
        }))
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
