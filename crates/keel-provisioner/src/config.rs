//! Per-deployment configuration.
//!
//! Built once per run and passed down to the scope resolver, the grant module
//! and the orchestrator. Naming prefixes, role identifiers and the primary
//! administrative boundary all live here instead of in statics.

use std::collections::BTreeMap;
use std::time::Duration;

use keel_core::{BoundParameters, Manifest, ParameterValues};
use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;
use crate::retry::RetryConfig;
use crate::scope::ScopeHandle;

/// Built-in `AcrPull` role definition.
pub const ACR_PULL_ROLE_ID: &str = "7f951dda-4ed3-4680-a7ca-43fe172d538d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Environment label, e.g. "dev" or "prod". Part of every generated name.
    pub environment: String,
    /// Region managed resources are placed in.
    pub region: String,
    /// Application image version. Supplied as the `image_tag` parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    #[serde(default = "default_naming_prefix")]
    pub naming_prefix: String,
    /// Primary scope: where managed resources without an explicit scope live.
    pub subscription_id: String,
    pub resource_group: String,
    /// Role name → role definition id.
    #[serde(default = "default_roles")]
    pub roles: BTreeMap<String, String>,
    /// Maximum number of concurrent provider calls.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

fn default_naming_prefix() -> String {
    "keel".to_string()
}

fn default_roles() -> BTreeMap<String, String> {
    BTreeMap::from([("pull".to_string(), ACR_PULL_ROLE_ID.to_string())])
}

fn default_parallelism() -> usize {
    4
}

impl DeploymentConfig {
    pub fn new(
        environment: impl Into<String>,
        region: impl Into<String>,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            region: region.into(),
            image_tag: None,
            naming_prefix: default_naming_prefix(),
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            roles: default_roles(),
            parallelism: default_parallelism(),
            retry: RetrySettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ProvisionerError> {
        if self.environment.is_empty() {
            return Err(ProvisionerError::Config("environment must not be empty".into()));
        }
        if self.parallelism == 0 {
            return Err(ProvisionerError::Config("parallelism must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ProvisionerError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ProvisionerError::Config(format!(
                "retry.backoff_multiplier must be a finite number of at least 1, got {multiplier}"
            )));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ProvisionerError::Config(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        self.primary_scope()?;
        Ok(())
    }

    pub fn primary_scope(&self) -> Result<ScopeHandle, ProvisionerError> {
        ScopeHandle::new(&self.subscription_id, &self.resource_group)
            .map_err(|reason| ProvisionerError::Config(format!("primary scope: {reason}")))
    }

    /// Generated provider-facing name for a descriptor without a `name` property.
    pub fn resource_name(&self, symbolic: &str) -> String {
        format!(
            "{}-{}-{}",
            self.naming_prefix,
            self.environment,
            symbolic.replace('_', "-")
        )
    }

    /// Look up a role by name; a value that already is a role definition id
    /// passes through unchanged.
    pub fn role_id(&self, role: &str) -> Option<String> {
        if let Some(id) = self.roles.get(role) {
            return Some(id.clone());
        }
        uuid::Uuid::parse_str(role).ok().map(|_| role.to_string())
    }

    /// Seed the parameters this configuration knows values for. Explicitly
    /// supplied values are left alone.
    pub fn apply_parameter_defaults(&self, values: &mut ParameterValues, declared: &[&str]) {
        let mut seed = |name: &str, value: &str| {
            if declared.contains(&name) {
                values.set_default(name, value);
            }
        };
        seed("environment", self.environment.as_str());
        seed("location", self.region.as_str());
        if let Some(tag) = &self.image_tag {
            seed("image_tag", tag.as_str());
        }
    }

    /// Bind supplied values, filling `environment`, `location` and
    /// `image_tag` from this configuration where the manifest declares them.
    pub fn bind(
        &self,
        manifest: &Manifest,
        supplied: &ParameterValues,
    ) -> Result<BoundParameters, ProvisionerError> {
        let declared: Vec<&str> = manifest.parameters.keys().map(String::as_str).collect();
        let mut values = supplied.clone();
        self.apply_parameter_defaults(&mut values, &declared);
        Ok(manifest.bind(&values)?)
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.to_retry_config()
    }
}
