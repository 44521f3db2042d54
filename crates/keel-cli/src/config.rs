use std::path::{Path, PathBuf};

use keel_provisioner::DeploymentConfig;
use serde::{Deserialize, Serialize};

/// Current config version. Bump this when adding fields or changing shape.
/// Each bump requires a corresponding entry in [`migrate`].
const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeelConfig {
    /// Schema version. Missing in hand-written configs.
    #[serde(default)]
    pub config_version: u32,
    #[serde(default = "jiff::Timestamp::now")]
    pub created_at: jiff::Timestamp,
    #[serde(flatten)]
    pub deployment: DeploymentConfig,
    /// Where run reports are written. Defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_dir: Option<PathBuf>,
}

impl KeelConfig {
    pub fn new(deployment: DeploymentConfig) -> Self {
        Self {
            config_version: CURRENT_VERSION,
            created_at: jiff::Timestamp::now(),
            deployment,
            report_dir: None,
        }
    }

    /// `--report-dir` wins, then the configured directory, then the
    /// platform default.
    pub fn report_dir(&self, flag: Option<&Path>) -> eyre::Result<PathBuf> {
        if let Some(dir) = flag.or(self.report_dir.as_deref()) {
            return Ok(dir.to_path_buf());
        }
        let base = dirs::data_local_dir().ok_or_else(|| eyre::eyre!("no data directory found"))?;
        Ok(base.join("keel").join("runs"))
    }
}

pub fn default_path() -> eyre::Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| eyre::eyre!("no config directory found"))?;
    Ok(base.join("keel").join("config.json"))
}

pub fn load(path: &Path) -> eyre::Result<KeelConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        eyre::eyre!(
            "failed to read config at {}: {e} (run `keel config init` first)",
            path.display()
        )
    })?;

    // Parse as raw JSON so we can run migrations before deserializing.
    let json: serde_json::Value = serde_json::from_str(&contents)?;
    let on_disk_version = json
        .get("config_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    let migrated = migrate(json, on_disk_version)?;
    let config: KeelConfig = serde_json::from_value(migrated)?;
    Ok(config)
}

/// Run sequential migrations from `from_version` up to [`CURRENT_VERSION`].
/// Each migration is a pure transform on the raw JSON value.
fn migrate(mut json: serde_json::Value, from_version: u32) -> eyre::Result<serde_json::Value> {
    if from_version > CURRENT_VERSION {
        return Err(eyre::eyre!(
            "config_version {from_version} is newer than this build supports ({CURRENT_VERSION}). \
             Please update keel."
        ));
    }

    let obj = json
        .as_object_mut()
        .ok_or_else(|| eyre::eyre!("config is not a JSON object"))?;

    // No shape changes yet; an unversioned config is read as the current one.
    if from_version < CURRENT_VERSION {
        obj.insert(
            "config_version".to_string(),
            serde_json::Value::Number(CURRENT_VERSION.into()),
        );
        tracing::debug!(from_version, "stamped config with current version");
    }

    Ok(json)
}

pub fn save(config: &KeelConfig, path: &Path) -> eyre::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| eyre::eyre!("config path {} has no parent", path.display()))?;
    std::fs::create_dir_all(dir)?;

    // Always write the current version, regardless of what was loaded.
    let mut stamped = config.clone();
    stamped.config_version = CURRENT_VERSION;

    let json = serde_json::to_string_pretty(&stamped)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;

    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
