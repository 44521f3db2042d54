//! Dependency graph builder.
//!
//! Edges are derived, never declared by hand: every output reference in a
//! descriptor's properties adds an edge from the consumer to the producer,
//! and `depends_on` adds the edges no property expresses. The graph is
//! checked for cycles before anything else happens, so a cyclic manifest
//! never reaches the provider.
//!
//! Node indices follow declaration order in the manifest. Topological order
//! uses Kahn's algorithm with a min-heap on that index, so independent
//! descriptors come out in the order they were declared.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use keel_core::{Manifest, ResourceAddr};

use crate::error::ProvisionerError;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<ResourceAddr>,
    index: HashMap<String, usize>,
    /// `dependencies[i]`: nodes `i` reads from.
    dependencies: Vec<BTreeSet<usize>>,
    /// `dependents[i]`: nodes that read from `i`.
    dependents: Vec<BTreeSet<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Validate the manifest and derive its DAG.
    ///
    /// Fails with [`ProvisionerError::Cycle`] naming every descriptor that
    /// sits on a cycle.
    pub fn build(manifest: &Manifest) -> Result<Self, ProvisionerError> {
        manifest.validate()?;

        let nodes: Vec<ResourceAddr> = manifest.resources.iter().map(|d| d.addr()).collect();
        let index: HashMap<String, usize> = manifest
            .resources
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();

        let mut dependencies = vec![BTreeSet::new(); nodes.len()];
        let mut dependents = vec![BTreeSet::new(); nodes.len()];
        for (i, descriptor) in manifest.resources.iter().enumerate() {
            for target in descriptor.dependencies() {
                // validate() guarantees every target exists
                if let Some(&j) = index.get(&target) {
                    dependencies[i].insert(j);
                    dependents[j].insert(i);
                }
            }
        }

        let order = topological_sort(&dependencies, &dependents);
        if order.len() < nodes.len() {
            let ids = cycle_members(&dependencies, &dependents, &order)
                .into_iter()
                .map(|i| nodes[i].clone())
                .collect();
            return Err(ProvisionerError::Cycle { ids });
        }

        tracing::debug!(
            nodes = nodes.len(),
            edges = dependencies.iter().map(BTreeSet::len).sum::<usize>(),
            "dependency graph built"
        );

        Ok(Self {
            nodes,
            index,
            dependencies,
            dependents,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Addresses in declaration order.
    pub fn nodes(&self) -> &[ResourceAddr] {
        &self.nodes
    }

    pub fn addr(&self, name: &str) -> Option<&ResourceAddr> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn dependencies(&self, name: &str) -> Vec<&ResourceAddr> {
        self.lookup(name, &self.dependencies)
    }

    pub fn dependents(&self, name: &str) -> Vec<&ResourceAddr> {
        self.lookup(name, &self.dependents)
    }

    /// Everything that directly or indirectly reads from `name`.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&ResourceAddr> {
        match self.index.get(name) {
            Some(&i) => self
                .transitive_dependent_indices(i)
                .into_iter()
                .map(|j| &self.nodes[j])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Descriptors with no dependencies.
    pub fn roots(&self) -> Vec<&ResourceAddr> {
        self.root_indices().map(|i| &self.nodes[i]).collect()
    }

    pub fn topological_order(&self) -> impl Iterator<Item = &ResourceAddr> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// Layers of mutually independent descriptors. Every descriptor sits one
    /// wave after its deepest dependency.
    pub fn waves(&self) -> Vec<Vec<&ResourceAddr>> {
        let mut depth = vec![0usize; self.nodes.len()];
        for &i in &self.order {
            depth[i] = self.dependencies[i]
                .iter()
                .map(|&j| depth[j] + 1)
                .max()
                .unwrap_or(0);
        }

        let count = depth.iter().max().map_or(0, |d| d + 1);
        let mut waves = vec![Vec::new(); count];
        for &i in &self.order {
            waves[depth[i]].push(&self.nodes[i]);
        }
        waves
    }

    /// `(consumer, producer)` pairs.
    pub fn edges(&self) -> Vec<(&ResourceAddr, &ResourceAddr)> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(i, deps)| deps.iter().map(move |&j| (&self.nodes[i], &self.nodes[j])))
            .collect()
    }

    fn lookup(&self, name: &str, adjacency: &[BTreeSet<usize>]) -> Vec<&ResourceAddr> {
        match self.index.get(name) {
            Some(&i) => adjacency[i].iter().map(|&j| &self.nodes[j]).collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    pub(crate) fn dependency_indices(&self, i: usize) -> &BTreeSet<usize> {
        &self.dependencies[i]
    }

    pub(crate) fn dependent_indices(&self, i: usize) -> &BTreeSet<usize> {
        &self.dependents[i]
    }

    pub(crate) fn root_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&i| self.dependencies[i].is_empty())
    }

    pub(crate) fn transitive_dependent_indices(&self, i: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<usize> = self.dependents[i].iter().copied().collect();
        while let Some(j) = stack.pop() {
            if seen.insert(j) {
                stack.extend(self.dependents[j].iter().copied());
            }
        }
        seen
    }
}

fn topological_sort(dependencies: &[BTreeSet<usize>], dependents: &[BTreeSet<usize>]) -> Vec<usize> {
    let mut remaining: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = remaining
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &j in &dependents[i] {
            remaining[j] -= 1;
            if remaining[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }
    order
}

/// Nodes left after Kahn's pass include cycle members and anything that
/// depends on a cycle. Strip the latter by repeatedly removing nodes no
/// remaining node depends on.
fn cycle_members(
    dependencies: &[BTreeSet<usize>],
    dependents: &[BTreeSet<usize>],
    sorted: &[usize],
) -> Vec<usize> {
    let mut residual: BTreeSet<usize> = (0..dependencies.len()).collect();
    for i in sorted {
        residual.remove(i);
    }

    loop {
        let sinks: Vec<usize> = residual
            .iter()
            .copied()
            .filter(|i| !dependents[*i].iter().any(|j| residual.contains(j)))
            .collect();
        if sinks.is_empty() {
            break;
        }
        for i in sinks {
            residual.remove(&i);
        }
    }

    residual.into_iter().collect()
}
