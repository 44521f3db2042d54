use std::fmt;

use serde::{Deserialize, Serialize};

/// Every resource type the engine knows how to provision.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ManagedIdentity,
    ContainerRegistry,
    RoleAssignment,
    Cache,
    Database,
    ObjectStorage,
    ContainerEnvironment,
    ContainerApp,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManagedIdentity => "managed_identity",
            Self::ContainerRegistry => "container_registry",
            Self::RoleAssignment => "role_assignment",
            Self::Cache => "cache",
            Self::Database => "database",
            Self::ObjectStorage => "object_storage",
            Self::ContainerEnvironment => "container_environment",
            Self::ContainerApp => "container_app",
        }
    }

    /// Provider namespace and type segment used in fully-qualified resource ids.
    pub fn provider_type(&self) -> &'static str {
        match self {
            Self::ManagedIdentity => "Microsoft.ManagedIdentity/userAssignedIdentities",
            Self::ContainerRegistry => "Microsoft.ContainerRegistry/registries",
            Self::RoleAssignment => "Microsoft.Authorization/roleAssignments",
            Self::Cache => "Microsoft.Cache/redis",
            Self::Database => "Microsoft.DBforPostgreSQL/flexibleServers",
            // The storage emulator runs as a regular container app.
            Self::ObjectStorage => "Microsoft.App/containerApps",
            Self::ContainerEnvironment => "Microsoft.App/managedEnvironments",
            Self::ContainerApp => "Microsoft.App/containerApps",
        }
    }

    /// Output attributes a successful apply (or read) reports.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Self::ManagedIdentity => &["name", "resource_id", "principal_id", "client_id"],
            Self::ContainerRegistry => &["name", "resource_id", "login_server"],
            Self::RoleAssignment => &["name", "resource_id", "grant_key"],
            Self::Cache => &["name", "resource_id", "host_name", "ssl_port", "primary_key"],
            Self::Database => &["name", "resource_id", "fqdn", "admin_login"],
            Self::ObjectStorage => &["name", "resource_id", "internal_url", "access_key"],
            Self::ContainerEnvironment => &["name", "resource_id", "default_domain"],
            Self::ContainerApp => &["name", "resource_id", "fqdn", "url", "latest_revision"],
        }
    }

    /// Outputs that carry credentials and are sealed as secrets on capture.
    pub fn secret_outputs(&self) -> &'static [&'static str] {
        match self {
            Self::Cache => &["primary_key"],
            Self::ObjectStorage => &["access_key"],
            _ => &[],
        }
    }

    pub fn has_output(&self, attribute: &str) -> bool {
        self.outputs().contains(&attribute)
    }

    pub fn is_secret_output(&self, attribute: &str) -> bool {
        self.secret_outputs().contains(&attribute)
    }

    /// Properties a managed descriptor of this kind must declare.
    pub fn required_properties(&self) -> &'static [&'static str] {
        match self {
            Self::RoleAssignment => &["principal_id", "target", "role"],
            Self::Database => &["administrator_login", "administrator_password"],
            Self::ContainerApp => &["image"],
            _ => &[],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
