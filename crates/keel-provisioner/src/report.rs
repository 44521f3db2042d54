use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use keel_core::{Mode, ResourceAddr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProvisionerError;

/// Per-descriptor state machine:
/// `Pending -> Resolving -> Applying -> Applied | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorState {
    Pending,
    Resolving,
    Applying,
    Applied,
    Failed,
}

impl DescriptorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorReport {
    pub addr: ResourceAddr,
    pub mode: Mode,
    pub state: DescriptorState,
    /// Phase the descriptor was in when it failed. `Pending` means it never
    /// started because a dependency failed or the run was aborted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_during: Option<DescriptorState>,
    /// Provider calls made, retries included.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Descriptor whose failure caused this one to fail. Itself for the
    /// descriptor that failed first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ResourceAddr>,
    /// Innermost originating error, with secrets redacted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    /// `"<redacted>"` for secret outputs.
    pub value: Value,
    pub secret: bool,
}

/// Outcome of one run. Contains no plaintext secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub state: RunState,
    /// Descriptors in manifest declaration order.
    pub resources: Vec<DescriptorReport>,
    /// Only populated when the run succeeded.
    #[serde(default)]
    pub outputs: BTreeMap<String, RunOutput>,
    /// Run-level failure not tied to a descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn resource(&self, name: &str) -> Option<&DescriptorReport> {
        self.resources.iter().find(|r| r.addr.name == name)
    }

    pub fn state_of(&self, name: &str) -> Option<DescriptorState> {
        self.resource(name).map(|r| r.state)
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name).map(|o| &o.value)
    }

    pub fn failed(&self) -> impl Iterator<Item = &DescriptorReport> {
        self.resources
            .iter()
            .filter(|r| r.state == DescriptorState::Failed)
    }

    pub fn applied_count(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.state == DescriptorState::Applied)
            .count()
    }
}

/// Local report store: one file per run plus `latest.json`.
pub struct ReportPersistence {
    pub dir: PathBuf,
}

impl ReportPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    fn latest_path(&self) -> PathBuf {
        self.dir.join("latest.json")
    }

    /// Write the report atomically (tmp + rename), then point `latest.json`
    /// at the same content.
    pub async fn flush(&self, report: &RunReport) -> Result<PathBuf, ProvisionerError> {
        let json = serde_json::to_vec_pretty(report)?;
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(report.run_id);
        write_atomic(&path, &json)?;
        write_atomic(&self.latest_path(), &json)?;

        tracing::debug!(path = %path.display(), run_id = %report.run_id, "run report flushed");
        Ok(path)
    }

    pub async fn load_latest(&self) -> Result<Option<RunReport>, ProvisionerError> {
        let path = self.latest_path();
        if !path.exists() {
            tracing::debug!(dir = %self.dir.display(), "no previous run report");
            return Ok(None);
        }
        let json = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&json)?))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ProvisionerError> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
