use keel_core::{Manifest, Mode, ResourceAddr};
use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;
use crate::graph::DependencyGraph;

/// One descriptor as it would be handled by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub addr: ResourceAddr,
    pub mode: Mode,
    pub depends_on: Vec<ResourceAddr>,
    pub wave: usize,
}

/// Preview of a run, computed without any provider call.
///
/// Entries in the same wave have no edge between them and may be applied
/// concurrently; wave `n + 1` only starts reading from wave `n` and earlier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub waves: Vec<Vec<PlanEntry>>,
}

impl Plan {
    pub fn build(manifest: &Manifest) -> Result<Self, ProvisionerError> {
        let graph = DependencyGraph::build(manifest)?;
        Ok(Self::from_graph(manifest, &graph))
    }

    pub fn from_graph(manifest: &Manifest, graph: &DependencyGraph) -> Self {
        let waves = graph
            .waves()
            .into_iter()
            .enumerate()
            .map(|(wave, addrs)| {
                addrs
                    .into_iter()
                    .map(|addr| PlanEntry {
                        addr: addr.clone(),
                        mode: manifest.get(&addr.name).map(|d| d.mode).unwrap_or_default(),
                        depends_on: graph.dependencies(&addr.name).into_iter().cloned().collect(),
                        wave,
                    })
                    .collect()
            })
            .collect();
        Self { waves }
    }

    pub fn entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.waves.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptors the run would create or update.
    pub fn managed(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries().filter(|e| e.mode == Mode::Managed)
    }
}
